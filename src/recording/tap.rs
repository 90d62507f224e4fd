//! The junction in the live graph where recording branches attach.

use crate::engine::StageId;

/// A multiplexing junction (tee) inside a top-level container.
///
/// Held by value; the controller never looks the junction up by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapPoint {
    name: String,
    container: StageId,
    junction: StageId,
}

impl TapPoint {
    pub fn new(name: impl Into<String>, container: StageId, junction: StageId) -> Self {
        Self {
            name: name.into(),
            container,
            junction,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container that branches are added to.
    pub fn container(&self) -> StageId {
        self.container
    }

    /// Stage whose request ports feed the branches.
    pub fn junction(&self) -> StageId {
        self.junction
    }
}
