//! Plugin error types.

use std::path::PathBuf;
use std::time::Duration;

use pipego_core::{SourceError, Stage};
use thiserror::Error;

pub type PluginResult<T> = Result<T, PluginError>;

/// Errors raised while loading or calling plugins.
///
/// Everything except [`PluginError::DuplicateName`], [`PluginError::Load`],
/// [`PluginError::Source`] and [`PluginError::Spawn`] is a per-call failure
/// that the pipeline absorbs.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("duplicate {stage} plugin name: {name}")]
    DuplicateName { stage: Stage, name: String },

    #[error("failed to load {stage} plugin {name}: {reason}")]
    Load {
        stage: Stage,
        name: String,
        reason: String,
    },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("plugin call timed out after {0:?}")]
    Timeout(Duration),

    #[error("plugin {0} is no longer usable")]
    Broken(String),

    #[error("plugins not initialized")]
    NotInitialized,
}
