//! Stock plugins.
//!
//! Each type implements one or more capability traits and is registered by
//! [`Registry::with_builtins`](crate::Registry::with_builtins). The plugin
//! binaries under `src/bin` serve the same types over the subprocess protocol.

use std::net::IpAddr;

use async_trait::async_trait;

use pipego_core::{
    Args, DEFAULT_CPU_WEIGHT, DEFAULT_MEMORY_REQUEST, DEFAULT_MEMORY_WEIGHT,
    DEFAULT_MILLI_CPU_REQUEST, DEFAULT_STORAGE_WEIGHT, FetchResult, FilterResult, MAX_NODE_SCORE,
    MIN_NODE_SCORE, Resource, ScoreResult,
};

use crate::contract::{FetchPlugin, FilterPlugin, ScorePlugin};
use crate::error::PluginResult;

pub const ERR_REASON_NODE_NAME: &str = "node(s) didn't match the requested node name";
pub const ERR_REASON_NODE_AFFINITY: &str = "node(s) didn't match node selector";
pub const ERR_REASON_UNSCHEDULABLE: &str = "node(s) were unschedulable";

/// Reports the capacity of the machine it runs on for loopback hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHost;

impl LocalHost {
    fn is_local(host: &str) -> bool {
        host.eq_ignore_ascii_case("localhost")
            || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
    }
}

#[async_trait]
impl FetchPlugin for LocalHost {
    async fn fetch(&self, host: &str) -> PluginResult<FetchResult> {
        if !Self::is_local(host) {
            return Ok(FetchResult::default());
        }

        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as i64;

        Ok(FetchResult {
            allocatable_resource: Resource::new(cores * 1000, 0, 0),
            ..FetchResult::default()
        })
    }
}

/// Passes when the task is not pinned or is pinned to this node.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeName;

#[async_trait]
impl FilterPlugin for NodeName {
    async fn filter(&self, args: &Args) -> PluginResult<FilterResult> {
        let wanted = &args.task.node_name;
        if wanted.is_empty() || *wanted == args.node.name {
            Ok(FilterResult::pass())
        } else {
            Ok(FilterResult::reject(ERR_REASON_NODE_NAME))
        }
    }
}

/// Passes when the task has no selectors or the node label is among them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeAffinity;

#[async_trait]
impl FilterPlugin for NodeAffinity {
    async fn filter(&self, args: &Args) -> PluginResult<FilterResult> {
        let selectors = &args.task.node_selectors;
        if selectors.is_empty() || selectors.contains(&args.node.label) {
            Ok(FilterResult::pass())
        } else {
            Ok(FilterResult::reject(ERR_REASON_NODE_AFFINITY))
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeUnschedulable;

#[async_trait]
impl FilterPlugin for NodeUnschedulable {
    async fn filter(&self, args: &Args) -> PluginResult<FilterResult> {
        if args.node.unschedulable && !args.task.tolerates_unschedulable {
            Ok(FilterResult::reject(ERR_REASON_UNSCHEDULABLE))
        } else {
            Ok(FilterResult::pass())
        }
    }
}

/// Capacity check (filter) and least-allocated ranking (score).
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeResourcesFit;

impl NodeResourcesFit {
    /// Names of the resources the task asks for more of than the node has free.
    fn insufficient(args: &Args) -> Vec<&'static str> {
        let want = &args.task.requested_resource;
        let alloc = &args.node.allocatable_resource;
        let used = &args.node.requested_resource;

        [
            ("cpu", want.milli_cpu, alloc.milli_cpu, used.milli_cpu),
            ("memory", want.memory, alloc.memory, used.memory),
            ("storage", want.storage, alloc.storage, used.storage),
        ]
        .into_iter()
        .filter(|(_, want, alloc, used)| *want > 0 && *want > alloc.saturating_sub(*used))
        .map(|(name, ..)| name)
        .collect()
    }

    /// Share of `capacity` left free, on the node score scale. Widened to
    /// i128 so byte-sized capacities cannot overflow.
    fn least_allocated(requested: i64, capacity: i64) -> i64 {
        if capacity <= 0 || requested > capacity {
            return MIN_NODE_SCORE;
        }
        let free = i128::from(capacity) - i128::from(requested.max(0));
        let score = free * i128::from(MAX_NODE_SCORE) / i128::from(capacity);
        i64::try_from(score).unwrap_or(MAX_NODE_SCORE)
    }
}

#[async_trait]
impl FilterPlugin for NodeResourcesFit {
    async fn filter(&self, args: &Args) -> PluginResult<FilterResult> {
        let reasons = Self::insufficient(args);
        if reasons.is_empty() {
            return Ok(FilterResult::pass());
        }

        let reason = reasons
            .iter()
            .map(|r| format!("Insufficient {r}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(FilterResult::reject(reason))
    }
}

#[async_trait]
impl ScorePlugin for NodeResourcesFit {
    async fn score(&self, args: &Args) -> PluginResult<ScoreResult> {
        let (cpu, memory) = requested_with_task(args);
        let alloc = &args.node.allocatable_resource;

        let mut weighted = Self::least_allocated(cpu, alloc.milli_cpu) * DEFAULT_CPU_WEIGHT
            + Self::least_allocated(memory, alloc.memory) * DEFAULT_MEMORY_WEIGHT;
        let mut weights = DEFAULT_CPU_WEIGHT + DEFAULT_MEMORY_WEIGHT;

        // Storage only counts on nodes that advertise it.
        if alloc.storage > 0 {
            let storage = args
                .node
                .requested_resource
                .storage
                .saturating_add(args.task.requested_resource.storage);
            weighted += Self::least_allocated(storage, alloc.storage) * DEFAULT_STORAGE_WEIGHT;
            weights += DEFAULT_STORAGE_WEIGHT;
        }

        Ok(ScoreResult::new(weighted / weights))
    }
}

/// Favours nodes whose cpu and memory utilisation stay close to each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeResourcesBalancedAllocation;

#[async_trait]
impl ScorePlugin for NodeResourcesBalancedAllocation {
    async fn score(&self, args: &Args) -> PluginResult<ScoreResult> {
        let (cpu, memory) = requested_with_task(args);
        let alloc = &args.node.allocatable_resource;

        if alloc.milli_cpu <= 0 || alloc.memory <= 0 {
            return Ok(ScoreResult::new(MIN_NODE_SCORE));
        }

        let cpu_fraction = cpu as f64 / alloc.milli_cpu as f64;
        let memory_fraction = memory as f64 / alloc.memory as f64;
        if cpu_fraction >= 1.0 || memory_fraction >= 1.0 {
            return Ok(ScoreResult::new(MIN_NODE_SCORE));
        }

        let diff = (cpu_fraction - memory_fraction).abs();
        Ok(ScoreResult::new(
            ((1.0 - diff) * MAX_NODE_SCORE as f64) as i64,
        ))
    }
}

/// Node usage plus the task's request, with zero requests replaced by the
/// default request so empty tasks still spread.
fn requested_with_task(args: &Args) -> (i64, i64) {
    let want = &args.task.requested_resource;
    let used = &args.node.requested_resource;

    let cpu = match want.milli_cpu {
        0 => DEFAULT_MILLI_CPU_REQUEST,
        n => n,
    };
    let memory = match want.memory {
        0 => DEFAULT_MEMORY_REQUEST,
        n => n,
    };

    (
        used.milli_cpu.saturating_add(cpu),
        used.memory.saturating_add(memory),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipego_core::{Node, Task};

    const GIB: i64 = 1024 * 1024 * 1024;

    fn args(task: Task, node: Node) -> Args {
        Args { node, task }
    }

    fn node(name: &str, alloc: Resource, used: Resource) -> Node {
        Node {
            name: name.to_string(),
            allocatable_resource: alloc,
            requested_resource: used,
            ..Node::default()
        }
    }

    #[tokio::test]
    async fn localhost_reports_only_for_loopback() {
        let local = LocalHost.fetch("127.0.0.1").await.unwrap();
        assert!(local.allocatable_resource.milli_cpu >= 1000);
        assert_eq!(local.allocatable_resource.milli_cpu % 1000, 0);

        assert!(!LocalHost.fetch("localhost").await.unwrap().is_empty());
        assert!(!LocalHost.fetch("::1").await.unwrap().is_empty());
        assert!(LocalHost.fetch("10.0.0.7").await.unwrap().is_empty());
        assert!(LocalHost.fetch("example.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn node_name_pins_task() {
        let n = node("node1", Resource::default(), Resource::default());

        let free = Task::default();
        assert!(NodeName.filter(&args(free, n.clone())).await.unwrap().is_pass());

        let pinned = Task {
            node_name: "node1".to_string(),
            ..Task::default()
        };
        assert!(NodeName.filter(&args(pinned, n.clone())).await.unwrap().is_pass());

        let elsewhere = Task {
            node_name: "node2".to_string(),
            ..Task::default()
        };
        let res = NodeName.filter(&args(elsewhere, n)).await.unwrap();
        assert_eq!(res.error, ERR_REASON_NODE_NAME);
    }

    #[tokio::test]
    async fn node_affinity_matches_label() {
        let n = Node {
            label: "ssd".to_string(),
            ..Node::default()
        };

        assert!(NodeAffinity.filter(&args(Task::default(), n.clone())).await.unwrap().is_pass());

        let matching = Task {
            node_selectors: vec!["gpu".to_string(), "ssd".to_string()],
            ..Task::default()
        };
        assert!(NodeAffinity.filter(&args(matching, n.clone())).await.unwrap().is_pass());

        let other = Task {
            node_selectors: vec!["gpu".to_string()],
            ..Task::default()
        };
        assert!(!NodeAffinity.filter(&args(other, n)).await.unwrap().is_pass());
    }

    #[tokio::test]
    async fn unschedulable_node_needs_toleration() {
        let n = Node {
            unschedulable: true,
            ..Node::default()
        };

        let res = NodeUnschedulable.filter(&args(Task::default(), n.clone())).await.unwrap();
        assert_eq!(res.error, ERR_REASON_UNSCHEDULABLE);

        let tolerant = Task {
            tolerates_unschedulable: true,
            ..Task::default()
        };
        assert!(NodeUnschedulable.filter(&args(tolerant, n)).await.unwrap().is_pass());
    }

    #[tokio::test]
    async fn resources_fit_lists_every_short_resource() {
        let n = node("node1", Resource::new(4000, 8 * GIB, 0), Resource::new(3500, 2 * GIB, 0));

        let fits = Task {
            requested_resource: Resource::new(500, GIB, 0),
            ..Task::default()
        };
        assert!(NodeResourcesFit.filter(&args(fits, n.clone())).await.unwrap().is_pass());

        let too_big = Task {
            requested_resource: Resource::new(1000, 7 * GIB, 1),
            ..Task::default()
        };
        let res = NodeResourcesFit.filter(&args(too_big, n)).await.unwrap();
        assert_eq!(res.error, "Insufficient cpu, Insufficient memory, Insufficient storage");
    }

    #[tokio::test]
    async fn resources_fit_ignores_zero_requests() {
        let n = node("empty", Resource::default(), Resource::default());
        let res = NodeResourcesFit.filter(&args(Task::default(), n)).await.unwrap();
        assert!(res.is_pass());
    }

    #[tokio::test]
    async fn least_allocated_prefers_idle_nodes() {
        let task = Task {
            requested_resource: Resource::new(1000, 2 * GIB, 0),
            ..Task::default()
        };
        let idle = node("idle", Resource::new(4000, 8 * GIB, 0), Resource::default());
        let busy = node("busy", Resource::new(4000, 8 * GIB, 0), Resource::new(2000, 4 * GIB, 0));

        let idle_score = NodeResourcesFit.score(&args(task.clone(), idle)).await.unwrap();
        let busy_score = NodeResourcesFit.score(&args(task, busy)).await.unwrap();

        // cpu (3000/4000) and memory (6/8) both leave 75% free.
        assert_eq!(idle_score.score, 75);
        assert_eq!(busy_score.score, 25);
    }

    #[tokio::test]
    async fn least_allocated_handles_huge_capacities() {
        let task = Task {
            requested_resource: Resource::new(1000, GIB, 0),
            ..Task::default()
        };
        let n = node(
            "big",
            Resource::new(4000, 100_000_000_000_000_000, 0),
            Resource::default(),
        );

        // cpu leaves 75% free, memory rounds down to 99%.
        let res = NodeResourcesFit.score(&args(task, n)).await.unwrap();
        assert_eq!(res.score, 87);

        assert_eq!(NodeResourcesFit::least_allocated(0, i64::MAX), MAX_NODE_SCORE);
        assert_eq!(NodeResourcesFit::least_allocated(i64::MIN, i64::MAX), MAX_NODE_SCORE);
        assert_eq!(NodeResourcesFit::least_allocated(i64::MAX, i64::MAX), MIN_NODE_SCORE);
    }

    #[tokio::test]
    async fn least_allocated_counts_advertised_storage() {
        let task = Task {
            requested_resource: Resource::new(1000, 2 * GIB, 10 * GIB),
            ..Task::default()
        };
        let n = node(
            "disk",
            Resource::new(4000, 8 * GIB, 40 * GIB),
            Resource::new(0, 0, 30 * GIB),
        );

        // cpu 75, memory 75, storage 0
        let res = NodeResourcesFit.score(&args(task, n)).await.unwrap();
        assert_eq!(res.score, 50);
    }

    #[tokio::test]
    async fn least_allocated_is_zero_without_capacity() {
        let n = node("none", Resource::default(), Resource::default());
        let res = NodeResourcesFit.score(&args(Task::default(), n)).await.unwrap();
        assert_eq!(res.score, MIN_NODE_SCORE);
    }

    #[tokio::test]
    async fn balanced_allocation_rewards_even_usage() {
        let even = Task {
            requested_resource: Resource::new(2000, 4 * GIB, 0),
            ..Task::default()
        };
        let skewed = Task {
            requested_resource: Resource::new(3000, GIB, 0),
            ..Task::default()
        };
        let n = node("node1", Resource::new(4000, 8 * GIB, 0), Resource::default());

        let res = NodeResourcesBalancedAllocation.score(&args(even, n.clone())).await.unwrap();
        assert_eq!(res.score, MAX_NODE_SCORE);

        // |0.75 - 0.125| = 0.625
        let res = NodeResourcesBalancedAllocation.score(&args(skewed, n)).await.unwrap();
        assert_eq!(res.score, 37);
    }

    #[tokio::test]
    async fn balanced_allocation_is_zero_when_full() {
        let task = Task {
            requested_resource: Resource::new(4000, GIB, 0),
            ..Task::default()
        };
        let n = node("node1", Resource::new(4000, 8 * GIB, 0), Resource::default());
        let res = NodeResourcesBalancedAllocation.score(&args(task, n)).await.unwrap();
        assert_eq!(res.score, MIN_NODE_SCORE);
    }
}
