//! In-process implementation of the engine contract.
//!
//! Stages run real threads: scripted sources produce on their own thread and
//! every `queue` stage hands data to a worker, so hooks and bus callbacks fire
//! off the control thread exactly as they would against a media framework.

pub mod artifact;
pub mod engine;
pub mod journal;
pub mod registry;
pub mod source;
pub mod topology;

pub use artifact::ArtifactReport;
pub use engine::{FlowReturn, SimEngine, SinkReport};
pub use journal::{Journal, JournalEntry};
pub use registry::{StageKind, StageRegistry, StageType};
pub use source::{DetectionWindow, SourceScript};
pub use topology::DetectionPipeline;
