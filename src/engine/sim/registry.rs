//! Stage type registry for the simulated engine.

use crate::engine::port::{MediaFormat, PortDescriptor};
use std::collections::HashMap;

/// Behaviour class of a simulated stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Produces frames from a script or from manual pushes.
    Source,
    /// Forwards everything unchanged (decoders, detectors, identity).
    Passthrough,
    /// Fans out to any number of request ports.
    Tee,
    /// Thread boundary: input is enqueued, a worker pushes downstream.
    Queue,
    /// Raw video to H.264.
    Encoder,
    Parser,
    /// Writes a header before the first frame and a trailer on end-of-stream.
    Muxer,
    /// Writes every buffer to the file named by its `location` property.
    FileSink,
    /// Discards everything.
    FakeSink,
}

impl StageKind {
    pub fn is_sink(self) -> bool {
        matches!(self, StageKind::FileSink | StageKind::FakeSink)
    }
}

/// A registered stage type.
#[derive(Debug, Clone)]
pub struct StageType {
    pub kind: StageKind,
    pub ports: &'static [PortDescriptor],
}

static SOURCE_PORTS: &[PortDescriptor] = &[PortDescriptor::output("src", MediaFormat::RawVideo)];

static PASSTHROUGH_PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("sink", MediaFormat::Any),
    PortDescriptor::output("src", MediaFormat::Any),
];

static RAW_FILTER_PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("sink", MediaFormat::RawVideo),
    PortDescriptor::output("src", MediaFormat::RawVideo),
];

static TEE_PORTS: &[PortDescriptor] = &[PortDescriptor::input("sink", MediaFormat::Any)];

static ENCODER_PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("sink", MediaFormat::RawVideo),
    PortDescriptor::output("src", MediaFormat::H264),
];

static PARSER_PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("sink", MediaFormat::H264),
    PortDescriptor::output("src", MediaFormat::H264),
];

static MUXER_PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("sink", MediaFormat::H264),
    PortDescriptor::output("src", MediaFormat::Mp4),
];

static SINK_PORTS: &[PortDescriptor] = &[PortDescriptor::input("sink", MediaFormat::Any)];

/// Name → type lookup. Removing an entry simulates a missing plugin.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    types: HashMap<String, StageType>,
}

impl StageRegistry {
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, kind: StageKind, ports: &'static [PortDescriptor]) {
        self.types
            .insert(name.to_string(), StageType { kind, ports });
    }

    /// Drop a type, e.g. to simulate a machine without hardware encoding.
    pub fn without(mut self, name: &str) -> Self {
        self.types.remove(name);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&StageType> {
        self.types.get(name)
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        let mut reg = Self::empty();
        reg.register("filesrc", StageKind::Source, SOURCE_PORTS);
        reg.register("videotestsrc", StageKind::Source, SOURCE_PORTS);
        reg.register("decodebin", StageKind::Passthrough, PASSTHROUGH_PORTS);
        reg.register("identity", StageKind::Passthrough, PASSTHROUGH_PORTS);
        reg.register("gvadetect", StageKind::Passthrough, RAW_FILTER_PORTS);
        reg.register("gvatrack", StageKind::Passthrough, RAW_FILTER_PORTS);
        reg.register("gvafpscounter", StageKind::Passthrough, PASSTHROUGH_PORTS);
        reg.register("tee", StageKind::Tee, TEE_PORTS);
        reg.register("queue", StageKind::Queue, PASSTHROUGH_PORTS);
        reg.register("vaapih264enc", StageKind::Encoder, ENCODER_PORTS);
        reg.register("x264enc", StageKind::Encoder, ENCODER_PORTS);
        reg.register("h264parse", StageKind::Parser, PARSER_PORTS);
        reg.register("mp4mux", StageKind::Muxer, MUXER_PORTS);
        reg.register("filesink", StageKind::FileSink, SINK_PORTS);
        reg.register("fakesink", StageKind::FakeSink, SINK_PORTS);
        reg
    }
}
