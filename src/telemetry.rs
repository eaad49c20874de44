//! Tracing setup for the daemon.
//!
//! One registry, layered: an `EnvFilter` seeded from CLI verbosity and
//! overridable via `TAP_LOG`, a stderr layer (compact or JSON), and an
//! optional daily-rolling file layer. The returned guard must live for the
//! process lifetime or buffered file output is lost on exit.

use std::fs;
use std::path::Path;

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "tapd.log";

pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(verbosity: u8, logging: &LoggingConfig) -> TelemetryGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .with_env_var("TAP_LOG")
        .from_env_lossy()
        .add_directive(
            logging
                .filter
                .parse()
                .unwrap_or_else(|_| tracing::metadata::LevelFilter::INFO.into()),
        );

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    layers.push(build_stderr_layer(logging.json));

    let mut file_setup_error = None;
    if let Some(dir) = &logging.directory {
        match fs::create_dir_all(dir) {
            Ok(()) => {
                let (layer, guard) = build_file_layer(Path::new(dir), logging.json);
                layers.push(layer);
                guards.push(guard);
            }
            Err(err) => {
                file_setup_error = Some(format!("log dir init failed for {dir}: {err}"));
            }
        }
    }

    layers.push(Box::new(filter));

    Registry::default().with(layers).init();

    if let Some(error) = file_setup_error {
        tracing::warn!("{error}");
    }

    TelemetryGuard { _guards: guards }
}

fn build_stderr_layer(json: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
    if json {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true)
                .with_current_span(true),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true),
        )
    }
}

fn build_file_layer(
    dir: &Path,
    json: bool,
) -> (
    Box<dyn Layer<Registry> + Send + Sync>,
    tracing_appender::non_blocking::WorkerGuard,
) {
    let appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        dir,
        LOG_FILE_PREFIX,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_thread_names(true)
                .with_current_span(true),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_names(true),
        )
    };
    (layer, guard)
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::INFO,
        1 => tracing::metadata::LevelFilter::DEBUG,
        _ => tracing::metadata::LevelFilter::TRACE,
    }
}
