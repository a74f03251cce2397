//! Process-wide tracing subscriber.
//!
//! Without a log file every event at the configured level goes to stdout.
//! With one, the file gets the configured level and stdout keeps only
//! warnings and errors.

use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Filter, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use pipego_core::config::LoggerSpec;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("unknown log format: {0}")]
    UnknownFormat(String),

    #[error("unknown log rotation: {0}")]
    UnknownRotation(String),

    #[error("cannot open log file {path}: {reason}")]
    File { path: String, reason: String },

    #[error("logger initialization failed: {0}")]
    Init(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Json,
}

impl Format {
    fn parse(format: &str) -> Result<Self, LoggerError> {
        match format.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            other => Err(LoggerError::UnknownFormat(other.to_string())),
        }
    }
}

/// Install the subscriber described by `spec`. `RUST_LOG`, when set, wins
/// over the configured level.
///
/// The returned guard flushes the log file when dropped; hold it until exit.
pub fn init(spec: &LoggerSpec) -> Result<Option<WorkerGuard>, LoggerError> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = filter(env.as_deref(), &spec.level)?;
    let (layers, guard) = layers(spec, filter)?;

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| LoggerError::Init(e.to_string()))?;
    Ok(guard)
}

/// `env` directives when they parse, the configured level otherwise.
fn filter(env: Option<&str>, level: &str) -> Result<EnvFilter, LoggerError> {
    if let Some(filter) = env
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
    {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLevel(level.to_string()))
}

fn layers(
    spec: &LoggerSpec,
    filter: EnvFilter,
) -> Result<(Vec<BoxedLayer>, Option<WorkerGuard>), LoggerError> {
    let format = Format::parse(&spec.format)?;

    if !spec.logs_to_file() {
        return Ok((vec![fmt_layer(format, std::io::stdout, true, filter)], None));
    }

    let (writer, guard) = tracing_appender::non_blocking(appender(spec)?);
    let layers = vec![
        fmt_layer(format, std::io::stdout, true, LevelFilter::WARN),
        fmt_layer(format, writer, false, filter),
    ];
    Ok((layers, Some(guard)))
}

fn fmt_layer<W, F>(format: Format, writer: W, ansi: bool, filter: F) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    F: Filter<Registry> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        Format::Text => layer.with_filter(filter).boxed(),
        Format::Json => layer.json().with_filter(filter).boxed(),
    }
}

fn rotation(rotation: &str) -> Result<Rotation, LoggerError> {
    match rotation.trim().to_ascii_lowercase().as_str() {
        "never" => Ok(Rotation::NEVER),
        "minutely" => Ok(Rotation::MINUTELY),
        "hourly" => Ok(Rotation::HOURLY),
        "daily" => Ok(Rotation::DAILY),
        other => Err(LoggerError::UnknownRotation(other.to_string())),
    }
}

fn appender(spec: &LoggerSpec) -> Result<RollingFileAppender, LoggerError> {
    let path = Path::new(spec.file_name.trim());
    let file_error = |reason: String| LoggerError::File {
        path: path.display().to_string(),
        reason,
    };

    let prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| file_error("not a file path".to_string()))?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation(&spec.rotation)?)
        .filename_prefix(prefix);
    if spec.max_files > 0 {
        builder = builder.max_log_files(spec.max_files);
    }
    builder.build(dir).map_err(|e| file_error(e.to_string()))
}
