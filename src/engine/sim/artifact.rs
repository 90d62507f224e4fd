//! Reader for files produced by the simulated muxer and file sink.
//!
//! The simulated container format is line based: a `ftyp` header line, one line
//! per frame, and a `moov` trailer line written only on end-of-stream.

use std::path::Path;

pub const HEADER: &str = "ftyp";
pub const TRAILER: &str = "moov";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReport {
    pub has_header: bool,
    pub frames: usize,
    pub finalized: bool,
}

impl ArtifactReport {
    pub fn read(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        let lines: Vec<&str> = contents.lines().collect();
        let has_header = lines.first() == Some(&HEADER);
        let finalized = has_header && lines.len() > 1 && lines.last() == Some(&TRAILER);
        let frames = lines
            .iter()
            .filter(|l| **l != HEADER && **l != TRAILER)
            .count();
        Self {
            has_header,
            frames,
            finalized,
        }
    }

    /// Header, at least one frame, and a trailer.
    pub fn is_well_formed(&self) -> bool {
        self.has_header && self.finalized && self.frames > 0
    }
}
