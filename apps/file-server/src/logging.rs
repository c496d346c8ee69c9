// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::{LogConfig, LogFormat, TelemetryConfig};
use crate::telemetry;

type DynLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// `RUST_LOG` wins over the configured level.
fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

fn file_layer(config: &LogConfig) -> Result<(DynLayer, WorkerGuard), Box<dyn std::error::Error>> {
    let path = Path::new(&config.file_path);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let name = path.file_name().unwrap_or_else(|| "file-server.log".as_ref());
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create log directory {}: {e}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    let layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
    let level = config.file_level.clone().into();
    let layer = match config.file_format {
        LogFormat::Json => layer.json().with_filter(filter(level)).boxed(),
        LogFormat::Text => layer.with_filter(filter(level)).boxed(),
    };
    Ok((layer, guard))
}

/// Spans exported over OTLP follow the most verbose enabled sink.
fn traces_level(config: &LogConfig) -> Level {
    let console: Level = config.console_level.clone().into();
    let file: Level = config.file_level.clone().into();
    match (config.console_enable, config.file_enable) {
        (true, true) => console.max(file),
        (true, false) => console,
        (false, true) => file,
        (false, false) => Level::INFO,
    }
}

const fn exports_traces(telemetry: &TelemetryConfig) -> bool {
    telemetry.enable && telemetry.tracing_enable && telemetry.otlp_traces_endpoint.is_some()
}

/// Installs the global subscriber: console and/or file output, plus an
/// OpenTelemetry span layer when an OTLP traces endpoint is configured.
///
/// The returned guard flushes the file writer on drop and must live as long
/// as the process.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or the OTLP span
/// exporter cannot be built.
pub fn init_logging(
    log_config: &LogConfig,
    telemetry_config: &TelemetryConfig,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let mut layers: Vec<DynLayer> = Vec::new();
    let mut guard = None;

    if log_config.file_enable {
        let (layer, file_guard) = file_layer(log_config)?;
        layers.push(layer);
        guard = Some(file_guard);
    }

    let no_sinks = !log_config.console_enable && !log_config.file_enable;
    if log_config.console_enable || no_sinks {
        let level = if no_sinks { Level::INFO } else { log_config.console_level.clone().into() };
        layers.push(tracing_subscriber::fmt::layer().with_filter(filter(level)).boxed());
    }

    if exports_traces(telemetry_config) {
        layers.push(
            telemetry::init_tracing_with_otlp(telemetry_config)?
                .with_filter(filter(traces_level(log_config)))
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).init();

    if no_sinks {
        tracing::warn!("Console and file logging are both disabled, logging to console");
    }
    if telemetry_config.tracing_enable && !exports_traces(telemetry_config) {
        tracing::warn!("OpenTelemetry tracing needs telemetry.enable and otlp_traces_endpoint; spans are not exported");
    }

    Ok(guard)
}
