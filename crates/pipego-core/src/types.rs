//! Shared types used across pipego crates.
//!
//! Field names on the wire follow the scheduler protocol: camelCase, with
//! `milliCPU` for the CPU quantity.

use serde::{Deserialize, Serialize};

/// Maximum score a score plugin is expected to return.
pub const MAX_NODE_SCORE: i64 = 100;

/// Minimum score a score plugin is expected to return.
pub const MIN_NODE_SCORE: i64 = 0;

/// Default worker count for the fetch and score fan-out.
pub const DEFAULT_PARALLELISM: usize = 16;

/// Milli-CPU assumed for a task that requests none (0.1 core).
pub const DEFAULT_MILLI_CPU_REQUEST: i64 = 100;

/// Memory assumed for a task that requests none (200 MiB).
pub const DEFAULT_MEMORY_REQUEST: i64 = 200 * 1024 * 1024;

/// Resource weights used by the builtin resource scorers (1..=100).
pub const DEFAULT_CPU_WEIGHT: i64 = 1;
pub const DEFAULT_MEMORY_WEIGHT: i64 = 1;
pub const DEFAULT_STORAGE_WEIGHT: i64 = 1;

/// A capacity or usage triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resource {
    /// CPU in thousandths of a core (500 = 0.5 cores).
    #[serde(rename = "milliCPU")]
    pub milli_cpu: i64,
    /// Memory in bytes.
    pub memory: i64,
    /// Volume size in bytes.
    pub storage: i64,
}

impl Resource {
    pub fn new(milli_cpu: i64, memory: i64, storage: i64) -> Self {
        Self {
            milli_cpu,
            memory,
            storage,
        }
    }

    /// True when no field carries a positive quantity.
    pub fn is_unset(&self) -> bool {
        self.milli_cpu <= 0 && self.memory <= 0 && self.storage <= 0
    }
}

/// The unit of work to place on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Task {
    pub name: String,
    /// Pin to a node by name. Empty means any node.
    pub node_name: String,
    /// Node labels the task may run on. Empty means any label.
    pub node_selectors: Vec<String>,
    pub requested_resource: Resource,
    pub tolerates_unschedulable: bool,
}

/// A placement candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    pub host: String,
    pub label: String,
    pub allocatable_resource: Resource,
    pub requested_resource: Resource,
    pub unschedulable: bool,
}

/// Arguments handed to filter and score plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Args {
    pub node: Node,
    pub task: Task,
}

impl Args {
    pub fn new(task: &Task, node: &Node) -> Self {
        Self {
            node: node.clone(),
            task: task.clone(),
        }
    }
}

/// Resource snapshot reported by a fetch plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FetchResult {
    pub allocatable_resource: Resource,
    pub requested_resource: Resource,
}

impl FetchResult {
    /// A report whose six fields are all zero or negative carries no information.
    pub fn is_empty(&self) -> bool {
        self.allocatable_resource.is_unset() && self.requested_resource.is_unset()
    }
}

/// Verdict of a filter plugin. A non-empty `error` rejects the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterResult {
    pub error: String,
}

impl FilterResult {
    pub fn pass() -> Self {
        Self::default()
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            error: reason.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.error.is_empty()
    }
}

/// Raw suitability score from a score plugin, expected in
/// `MIN_NODE_SCORE..=MAX_NODE_SCORE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreResult {
    pub score: i64,
}

impl ScoreResult {
    pub fn new(score: i64) -> Self {
        Self { score }
    }

    pub fn in_range(&self) -> bool {
        (MIN_NODE_SCORE..=MAX_NODE_SCORE).contains(&self.score)
    }
}
