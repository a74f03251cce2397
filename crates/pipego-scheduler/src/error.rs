//! Scheduler error types.

use thiserror::Error;

use pipego_core::Stage;
use pipego_plugin::PluginError;

/// Errors that end a scheduling call or scheduler setup.
///
/// The display strings of the stage errors are the `error` values callers see.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid nodes")]
    InvalidNodes,

    /// More than one fetch plugin or no score plugin is enabled.
    #[error("invalid enabled")]
    InvalidEnabled { stage: Stage },

    #[error("invalid scores")]
    InvalidScores,

    #[error("scheduler not initialized")]
    NotInitialized,

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),
}

pub type SchedulerResult<T> = Result<T, ScheduleError>;
