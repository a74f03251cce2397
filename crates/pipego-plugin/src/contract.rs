//! Plugin capability traits and the executor contract.

use async_trait::async_trait;

use pipego_core::{Args, FetchResult, FilterResult, Node, ScoreResult, Task};

use crate::error::PluginResult;

/// Refreshes a node's resource figures from a live source.
#[async_trait]
pub trait FetchPlugin: Send + Sync {
    async fn fetch(&self, host: &str) -> PluginResult<FetchResult>;
}

/// Accepts or rejects a node for a task.
///
/// A rejection is an `Ok` result with a non-empty `error`; `Err` means the
/// plugin could not be asked at all.
#[async_trait]
pub trait FilterPlugin: Send + Sync {
    async fn filter(&self, args: &Args) -> PluginResult<FilterResult>;
}

/// Scores a node for a task, nominally in `0..=100`.
#[async_trait]
pub trait ScorePlugin: Send + Sync {
    async fn score(&self, args: &Args) -> PluginResult<ScoreResult>;
}

/// By-name dispatch to loaded plugins. This is the only boundary the
/// scheduling pipeline has with plugin hosting.
#[async_trait]
pub trait PluginExecutor: Send + Sync {
    /// Acquire a handle for every configured plugin.
    async fn init(&self) -> PluginResult<()>;

    /// Release every handle acquired by `init`.
    async fn deinit(&self) -> PluginResult<()>;

    /// Fails with `InvalidName` when `name` is not a loaded fetch plugin.
    async fn run_fetch(&self, name: &str, host: &str) -> PluginResult<FetchResult>;

    async fn run_filter(&self, name: &str, task: &Task, node: &Node) -> PluginResult<FilterResult>;

    async fn run_score(&self, name: &str, task: &Task, node: &Node) -> PluginResult<ScoreResult>;
}
