//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use taprec::engine::sim::ArtifactReport;

/// Upper bound for anything that crosses threads
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Poll `pred` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    pred()
}

/// Recording artifacts in `dir`, sorted by name
pub fn artifacts_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "mp4"))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Assert the artifact at `path` has a header, frames and a trailer
pub fn assert_well_formed(path: &Path) -> ArtifactReport {
    let report = ArtifactReport::read(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    assert!(
        report.is_well_formed(),
        "{} is not well formed: {:?}",
        path.display(),
        report
    );
    report
}
