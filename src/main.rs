//! taprec demo launcher
//!
//! Runs the detection graph on the simulated engine and records every
//! presence episode to a timestamped file.
//!
//! ```text
//! taprec [CONFIG] [--dual]
//! ```

use anyhow::Context;
use std::path::PathBuf;
use taprec::{
    config::{AppConfig, LoggingConfig},
    engine::sim::{DetectionPipeline, SimEngine},
    session::{RecordingSession, ScriptedSequence, SessionReport},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info,taprec=debug"));

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "taprec.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .with(file_layer)
        .init();

    guard
}

/// Build one pipeline with its own engine and run it to completion.
fn run_pipeline(name: &str, config: &AppConfig) -> anyhow::Result<SessionReport> {
    let engine = SimEngine::new();
    let graph = DetectionPipeline::build(&engine, name, Some(config.source.script.clone()))
        .with_context(|| format!("Failed to build pipeline {}", name))?;
    let mut session = RecordingSession::for_detection_pipeline(name, &engine, &graph, config)?;

    let _sequence = if config.source.sequence.is_empty() {
        None
    } else {
        tracing::info!("Driving {} from a {}-step sequence", name, config.source.sequence.len());
        Some(ScriptedSequence::new(config.source.sequence.clone()).spawn(session.control())?)
    };

    Ok(session.run()?)
}

fn main() -> anyhow::Result<()> {
    let mut config_path = None;
    let mut dual = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--dual" => dual = true,
            other => config_path = Some(PathBuf::from(other)),
        }
    }

    let config = match &config_path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::load_or_default(None),
    };

    let _guard = init_logging(&config.logging);
    tracing::info!("Starting taprec");

    let names: &[&str] = if dual { &["Pipe1", "Pipe2"] } else { &["pipeline0"] };
    let handles = names
        .iter()
        .map(|name| {
            let name = name.to_string();
            let mut config = config.clone();
            if dual {
                config.branch.file_prefix = format!("{}-{}", config.branch.file_prefix, name);
            }
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_pipeline(&name, &config))
                .context("Failed to spawn pipeline thread")
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    for (name, handle) in names.iter().zip(handles) {
        let report = handle
            .join()
            .map_err(|_| anyhow::anyhow!("Pipeline {} panicked", name))??;
        for file in &report.recordings {
            tracing::info!("{}: recorded {}", name, file.display());
        }
        if let Some(fatal) = report.fatal {
            tracing::info!("{}: stopped by {:?}", name, fatal.kind());
        }
    }

    tracing::info!("Shutting down...");
    Ok(())
}
