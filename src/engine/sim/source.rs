//! Scripted frame production for simulated sources.

use crate::engine::buffer::{Buffer, Region};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A label that is "detected" on every frame whose timestamp falls inside
/// `[start_ms, end_ms)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionWindow {
    pub label: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl DetectionWindow {
    pub fn new(label: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        Self {
            label: label.into(),
            start_ms,
            end_ms,
        }
    }

    fn covers(&self, pts: Duration) -> bool {
        let ms = pts.as_millis() as u64;
        ms >= self.start_ms && ms < self.end_ms
    }
}

/// Describes the frames a source stage produces once it is Playing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceScript {
    /// Frames to produce before end-of-stream; `None` runs until stopped.
    #[serde(default)]
    pub frame_count: Option<u64>,
    /// Stream time covered by one frame.
    #[serde(default = "default_frame_duration_ms")]
    pub frame_duration_ms: u64,
    /// Wall-clock pause between frames.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default)]
    pub detections: Vec<DetectionWindow>,
}

fn default_frame_duration_ms() -> u64 {
    40
}

fn default_frame_interval_ms() -> u64 {
    40
}

impl Default for SourceScript {
    fn default() -> Self {
        Self {
            frame_count: None,
            frame_duration_ms: default_frame_duration_ms(),
            frame_interval_ms: default_frame_interval_ms(),
            detections: Vec::new(),
        }
    }
}

impl SourceScript {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn pts_of(&self, index: u64) -> Duration {
        Duration::from_millis(index * self.frame_duration_ms)
    }

    /// Build frame `index` with the regions active at its timestamp.
    pub fn frame(&self, index: u64) -> Buffer {
        let pts = self.pts_of(index);
        let mut buffer = Buffer::new(pts).with_payload(format!("frame {}", index));
        for window in self.detections.iter().filter(|w| w.covers(pts)) {
            buffer = buffer.with_region(Region::new(window.label.clone(), 1.0));
        }
        buffer
    }

    pub fn is_finished(&self, index: u64) -> bool {
        self.frame_count.is_some_and(|n| index >= n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_carry_windowed_labels() {
        let script = SourceScript {
            frame_count: Some(10),
            frame_duration_ms: 100,
            frame_interval_ms: 0,
            detections: vec![DetectionWindow::new("vehicle", 200, 500)],
        };

        assert!(!script.frame(1).has_label("vehicle"));
        assert!(script.frame(2).has_label("vehicle"));
        assert!(script.frame(4).has_label("vehicle"));
        assert!(!script.frame(5).has_label("vehicle"));
        assert_eq!(script.frame(3).pts, Duration::from_millis(300));
        assert!(script.is_finished(10));
        assert!(!script.is_finished(9));
    }
}
