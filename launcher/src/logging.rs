// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::env;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOG_ENV: &str = "LAUNCHER_LOG";
const LOG_FORMAT_ENV: &str = "LAUNCHER_LOG_FORMAT";
const LOG_SPAN_EVENTS_ENV: &str = "LAUNCHER_LOG_SPAN_EVENTS";
const LOG_FILE_ENV: &str = "LAUNCHER_LOG_FILE";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Installs the global subscriber. Logs go to stderr so that stdout carries
/// only the launch result; `LAUNCHER_LOG_FILE` adds a second, plain-text sink.
pub fn init(verbose: bool) {
    let format = parse_format(env_value(LOG_FORMAT_ENV).as_deref());
    let span_events = parse_span_events(env_value(LOG_SPAN_EVENTS_ENV).as_deref());

    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(
        format,
        span_events.clone(),
        std::io::stderr,
        true,
    )];
    if let Some((writer, guard)) = build_file_writer() {
        layers.push(fmt_layer(format, span_events, writer, false));
        let _ = FILE_GUARD.set(guard);
    }

    Registry::default()
        .with(layers)
        .with(tracing_error::ErrorLayer::default())
        .with(build_filter(verbose))
        .init();
}

fn fmt_layer<W>(format: LogFormat, span_events: FmtSpan, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_span_events(span_events)
        .with_ansi(ansi)
        .with_writer(writer);
    match format {
        LogFormat::Json => base.json().boxed(),
        LogFormat::Pretty => base.pretty().boxed(),
        LogFormat::Compact => base.compact().boxed(),
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn build_filter(verbose: bool) -> EnvFilter {
    match env_value(LOG_ENV) {
        Some(value) => EnvFilter::new(value),
        None if verbose => EnvFilter::new("debug"),
        None => EnvFilter::new("info"),
    }
}

fn parse_format(value: Option<&str>) -> LogFormat {
    match value.map(str::to_ascii_lowercase).as_deref() {
        Some("json") => LogFormat::Json,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::Compact,
    }
}

fn parse_span_events(value: Option<&str>) -> FmtSpan {
    match value.map(str::to_ascii_lowercase).as_deref() {
        Some("new") => FmtSpan::NEW,
        Some("enter") => FmtSpan::ENTER,
        Some("exit") => FmtSpan::EXIT,
        Some("close") => FmtSpan::CLOSE,
        Some("full") => FmtSpan::FULL,
        _ => FmtSpan::NONE,
    }
}

fn build_file_writer() -> Option<(NonBlocking, WorkerGuard)> {
    let file_path = env_value(LOG_FILE_ENV)?;
    let path = Path::new(&file_path);
    let file_name = path.file_name()?.to_string_lossy().to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}
