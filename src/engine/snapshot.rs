//! Point-in-time topology snapshots for debugging graph surgery.

use crate::engine::bus::RunState;
use crate::engine::id::{PortId, StageId};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Snapshot of a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub id: StageId,
    pub name: String,
    pub type_name: String,
    pub parent: Option<StageId>,
    pub state: RunState,
}

/// Snapshot of a single port-to-port link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSnapshot {
    pub src_stage: StageId,
    pub src_port: PortId,
    pub sink_stage: StageId,
    pub sink_port: PortId,
}

/// Complete topology snapshot under one container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub stages: Vec<StageSnapshot>,
    pub links: Vec<LinkSnapshot>,
}

impl TopologySnapshot {
    pub fn stage_named(&self, name: &str) -> Option<&StageSnapshot> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.stages.iter().any(|s| s.id == id)
    }

    /// Render as Graphviz DOT, one cluster per container.
    pub fn to_dot(&self, title: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", title);
        let _ = writeln!(out, "  rankdir=LR;");
        let _ = writeln!(out, "  node [shape=box];");

        let containers: Vec<StageId> = self
            .stages
            .iter()
            .filter_map(|s| s.parent)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        for stage in self
            .stages
            .iter()
            .filter(|s| s.parent.is_none() && !containers.contains(&s.id))
        {
            let _ = writeln!(
                out,
                "  s{} [label=\"{}\\n{} [{}]\"];",
                stage.id.0, stage.name, stage.type_name, stage.state
            );
        }

        for container in &containers {
            let name = self
                .stages
                .iter()
                .find(|s| s.id == *container)
                .map(|s| s.name.as_str())
                .unwrap_or("?");
            let _ = writeln!(out, "  subgraph cluster_{} {{", container.0);
            let _ = writeln!(out, "    label=\"{}\";", name);
            for stage in self.stages.iter().filter(|s| s.parent == Some(*container)) {
                if containers.contains(&stage.id) {
                    continue;
                }
                let _ = writeln!(
                    out,
                    "    s{} [label=\"{}\\n{} [{}]\"];",
                    stage.id.0, stage.name, stage.type_name, stage.state
                );
            }
            let _ = writeln!(out, "  }}");
        }

        for link in &self.links {
            let _ = writeln!(
                out,
                "  s{} -> s{} [label=\"{}->{}\"];",
                link.src_stage.0, link.sink_stage.0, link.src_port.0, link.sink_port.0
            );
        }
        out.push_str("}\n");
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
