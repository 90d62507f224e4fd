//! # taprec: presence-triggered recording branches
//!
//! Splices recording branches into a live media graph while it keeps
//! streaming, and removes them again without truncating the output. Start and
//! stop are driven by a debounced presence signal read from detector metadata,
//! or by a timed sequence.
//!
//! ## Architecture
//!
//! - **Engine**: the [`GraphEngine`] capability contract plus a simulated
//!   in-process implementation ([`engine::sim`])
//! - **Recording**: presence debouncing, branch construction and the
//!   attach/detach state machine
//! - **Control**: a deferred-call queue that moves everything off streaming
//!   threads onto one control thread per session
//! - **Events**: the bus router that escalates errors and end-of-stream
//!
//! ## Configuration
//!
//! Settings are read from `config.toml` (or `.json`) in the platform config
//! directory under `taprec`:
//!
//! - **Linux**: `~/.config/taprec/`
//! - **macOS**: `~/Library/Application Support/taprec/`
//! - **Windows**: `%APPDATA%\taprec\`
//!
//! ## Example
//!
//! ```no_run
//! use taprec::{
//!     config::AppConfig,
//!     engine::sim::{DetectionPipeline, SimEngine},
//!     session::RecordingSession,
//! };
//!
//! fn main() -> taprec::Result<()> {
//!     let config = AppConfig::load_or_default(None);
//!     let engine = SimEngine::new();
//!     let graph = DetectionPipeline::build(&engine, "pipeline0", Some(config.source.script.clone()))?;
//!
//!     let mut session = RecordingSession::for_detection_pipeline("pipeline0", &engine, &graph, &config)?;
//!     let report = session.run()?;
//!     for file in report.recordings {
//!         println!("recorded {}", file.display());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod recording;
pub mod session;

// Re-export commonly used types
pub use config::AppConfig;
pub use control::{control_channel, ControlHandle, ControlQueue, DeferredCall};
pub use engine::{GraphEngine, RunState};
pub use error::{Result, TapRecError};
pub use events::GraphEventRouter;
pub use recording::{
    Branch, BranchFactory, BranchLifecycleController, BranchState, PresenceDebouncer, TapPoint,
};
pub use session::{RecordingSession, SessionReport};
