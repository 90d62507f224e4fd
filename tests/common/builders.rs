//! Test data builders for scripts and configs

use std::path::Path;
use taprec::config::AppConfig;
use taprec::engine::sim::{DetectionWindow, SourceScript};
use taprec::recording::AttachPolicy;
use taprec::session::SequenceStep;

/// Builder for fast-running source scripts
pub struct ScriptBuilder {
    script: SourceScript,
}

impl ScriptBuilder {
    /// 40 ms frames produced every 2 ms of wall time, running until stopped
    pub fn new() -> Self {
        Self {
            script: SourceScript {
                frame_count: None,
                frame_duration_ms: 40,
                frame_interval_ms: 2,
                detections: Vec::new(),
            },
        }
    }

    pub fn frames(mut self, count: u64) -> Self {
        self.script.frame_count = Some(count);
        self
    }

    pub fn interval_ms(mut self, ms: u64) -> Self {
        self.script.frame_interval_ms = ms;
        self
    }

    pub fn vehicle(mut self, start_ms: u64, end_ms: u64) -> Self {
        self.script
            .detections
            .push(DetectionWindow::new("vehicle", start_ms, end_ms));
        self
    }

    pub fn build(self) -> SourceScript {
        self.script
    }
}

/// Builder for configs that write into a temporary directory
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    pub fn new(output_dir: &Path) -> Self {
        let mut config = AppConfig::default();
        config.branch.output_dir = output_dir.to_path_buf();
        config.control.poll_interval_ms = 10;
        config.source.script = ScriptBuilder::new().build();
        Self { config }
    }

    pub fn script(mut self, script: SourceScript) -> Self {
        self.config.source.script = script;
        self
    }

    pub fn policy(mut self, policy: AttachPolicy) -> Self {
        self.config.lifecycle.attach_policy = policy;
        self
    }

    pub fn sequence(mut self, steps: Vec<SequenceStep>) -> Self {
        self.config.source.sequence = steps;
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.config.branch.file_prefix = prefix.to_string();
        self
    }

    pub fn dot_dir(mut self, dir: &Path) -> Self {
        self.config.debug.dot_dir = Some(dir.to_path_buf());
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_builder() {
        let script = ScriptBuilder::new().frames(10).vehicle(0, 200).build();
        assert_eq!(script.frame_count, Some(10));
        assert_eq!(script.detections.len(), 1);
        assert!(script.frame(2).has_label("vehicle"));
        assert!(!script.frame(5).has_label("vehicle"));
    }
}
