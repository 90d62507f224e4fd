//! Prebuilt detection graph used by the demo binary and the tests.
//!
//! ```text
//! filesrc -> decodebin -> tee -> queue -> gvadetect -> gvatrack -> identity -> gvafpscounter -> fakesink
//! ```
//!
//! Recording branches attach to further request ports of the tee. Presence
//! sampling watches buffers leaving `identity`.

use crate::engine::error::EngineResult;
use crate::engine::id::{PortId, StageId};
use crate::engine::sim::engine::SimEngine;
use crate::engine::sim::source::SourceScript;
use crate::engine::traits::GraphEngine;
use std::sync::Arc;

const CHAIN_AFTER_TEE: &[(&str, &str)] = &[
    ("queue", "queue0"),
    ("gvadetect", "gvadetect0"),
    ("gvatrack", "gvatrack0"),
    ("identity", "identity0"),
    ("gvafpscounter", "gvafpscounter0"),
    ("fakesink", "fakesink0"),
];

/// Handles into a built detection graph.
#[derive(Debug, Clone, Copy)]
pub struct DetectionPipeline {
    pub pipeline: StageId,
    pub source: StageId,
    pub tee: StageId,
    /// Output of the last detector-side stage; carries region metadata.
    pub detector_out: PortId,
    pub fakesink: StageId,
}

impl DetectionPipeline {
    /// Build the graph inside a new top-level container called `name`.
    ///
    /// With a script the source produces frames on its own thread once Playing;
    /// without one, frames are pushed by the caller via [`SimEngine::push_frame`].
    pub fn build(
        engine: &Arc<SimEngine>,
        name: &str,
        script: Option<SourceScript>,
    ) -> EngineResult<Self> {
        let pipeline = engine.create_container(name)?;
        let source = engine.create_stage("filesrc", "filesrc0")?;
        let decode = engine.create_stage("decodebin", "decodebin0")?;
        let tee = engine.create_stage("tee", "tee")?;
        for stage in [source, decode, tee] {
            engine.add_to_container(pipeline, stage)?;
        }
        if let Some(script) = script {
            engine.set_source_script(source, script)?;
        }

        link_static(engine, source, decode)?;
        link_static(engine, decode, tee)?;

        let mut previous: Option<StageId> = None;
        let mut identity = None;
        let mut fakesink = StageId::INVALID;
        for (type_name, instance) in CHAIN_AFTER_TEE {
            let stage = engine.create_stage(type_name, instance)?;
            engine.add_to_container(pipeline, stage)?;
            match previous {
                None => {
                    let tee_port = engine.request_port(tee)?;
                    let sink = static_port(engine, stage, "sink")?;
                    engine.link_ports(tee_port, sink)?;
                }
                Some(prev) => link_static(engine, prev, stage)?,
            }
            if *type_name == "identity" {
                identity = Some(stage);
            }
            fakesink = stage;
            previous = Some(stage);
        }

        let identity = identity.unwrap_or(fakesink);
        let detector_out = static_port(engine, identity, "src")?;
        tracing::debug!("Built detection graph '{}'", name);

        Ok(Self {
            pipeline,
            source,
            tee,
            detector_out,
            fakesink,
        })
    }
}

fn static_port(engine: &SimEngine, stage: StageId, name: &str) -> EngineResult<PortId> {
    engine.static_port(stage, name).ok_or_else(|| {
        crate::engine::error::EngineError::InvalidOperation(format!(
            "{:?} has no '{}' port",
            stage, name
        ))
    })
}

fn link_static(engine: &SimEngine, src: StageId, sink: StageId) -> EngineResult<()> {
    let out = static_port(engine, src, "src")?;
    let input = static_port(engine, sink, "sink")?;
    engine.link_ports(out, input)
}
