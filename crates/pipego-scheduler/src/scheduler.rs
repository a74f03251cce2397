//! Scheduler: runs the fetch, filter, score and select stages for a task.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pipego_core::config::Enabled;
use pipego_core::{FetchResult, Node, SchedulerConfig, Stage, Task};
use pipego_parallel::Parallelizer;
use pipego_plugin::PluginExecutor;

use crate::error::{ScheduleError, SchedulerResult};
use crate::select::{NodeScore, select_host};

/// Reply of one scheduling call: a node name, or the stage error that ended it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOutcome {
    pub name: String,
    pub error: String,
}

impl ScheduleOutcome {
    pub fn success(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: String::new(),
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            name: String::new(),
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

/// Where a scheduler is in `Created → Initialized → Deinitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Created = 0,
    Initialized = 1,
    Deinitialized = 2,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Lifecycle::Initialized,
            2 => Lifecycle::Deinitialized,
            _ => Lifecycle::Created,
        }
    }
}

/// The scheduling pipeline.
///
/// Built from the enabled plugins of a [`SchedulerConfig`]; disabled plugins
/// are the executor's concern and never run here.
pub struct Scheduler {
    executor: Arc<dyn PluginExecutor>,
    parallelizer: Parallelizer,
    parallelism: usize,
    fetch: Vec<Enabled>,
    /// Sorted by ascending priority, stable for equal priorities.
    filters: Vec<Enabled>,
    scores: Vec<Enabled>,
    state: AtomicU8,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig, executor: Arc<dyn PluginExecutor>) -> Self {
        let mut filters = config.spec.filter.enabled.clone();
        filters.sort_by_key(|p| p.priority);

        Self {
            executor,
            parallelizer: Parallelizer::default(),
            parallelism: config.spec.parallelism,
            fetch: config.spec.fetch.enabled.clone(),
            filters,
            scores: config.spec.score.enabled.clone(),
            state: AtomicU8::new(Lifecycle::Created as u8),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Set the fan-out parallelism and load every configured plugin.
    pub async fn init(&self) -> SchedulerResult<()> {
        self.parallelizer.init(self.parallelism);
        self.executor.init().await?;
        self.state
            .store(Lifecycle::Initialized as u8, Ordering::Release);

        info!(
            parallelism = self.parallelizer.parallelism(),
            fetch = self.fetch.len(),
            filter = self.filters.len(),
            score = self.scores.len(),
            "scheduler initialized"
        );
        Ok(())
    }

    /// Release plugin resources. Runs afterwards fail with
    /// [`ScheduleError::NotInitialized`].
    pub async fn deinit(&self) -> SchedulerResult<()> {
        if self.lifecycle() != Lifecycle::Initialized {
            return Err(ScheduleError::NotInitialized);
        }
        self.state
            .store(Lifecycle::Deinitialized as u8, Ordering::Release);
        self.executor.deinit().await?;

        info!("scheduler deinitialized");
        Ok(())
    }

    /// Schedule `task` onto one of `nodes`.
    ///
    /// Cancelling `cancel` stops the fetch and score fan-out early; the call
    /// then carries on with what was collected.
    pub async fn run(
        &self,
        task: &Task,
        nodes: Vec<Node>,
        cancel: &CancellationToken,
    ) -> ScheduleOutcome {
        let node_count = nodes.len();

        match self.schedule(task, nodes, cancel).await {
            Ok(name) => {
                debug!(task = %task.name, nodes = node_count, node = %name, "task scheduled");
                ScheduleOutcome::success(name)
            }
            Err(e) => {
                debug!(task = %task.name, nodes = node_count, error = %e, "task not scheduled");
                ScheduleOutcome::failure(e)
            }
        }
    }

    async fn schedule(
        &self,
        task: &Task,
        nodes: Vec<Node>,
        cancel: &CancellationToken,
    ) -> SchedulerResult<String> {
        if self.lifecycle() != Lifecycle::Initialized {
            return Err(ScheduleError::NotInitialized);
        }
        if nodes.is_empty() {
            return Err(ScheduleError::InvalidNodes);
        }

        let nodes = self.fetch_stage(nodes, cancel).await?;
        let nodes = self.filter_stage(task, nodes).await;
        let scores = self.score_stage(task, &nodes, cancel).await?;

        pick(&scores)
    }

    /// Refresh node resources through the single fetch plugin.
    ///
    /// A node keeps its resources when the call fails or reports nothing.
    pub(crate) async fn fetch_stage(
        &self,
        mut nodes: Vec<Node>,
        cancel: &CancellationToken,
    ) -> SchedulerResult<Vec<Node>> {
        let plugin = match self.fetch.as_slice() {
            [] => return Ok(nodes),
            [plugin] => plugin.name.as_str(),
            _ => return Err(ScheduleError::InvalidEnabled { stage: Stage::Fetch }),
        };

        let sink: Vec<OnceLock<FetchResult>> = nodes.iter().map(|_| OnceLock::new()).collect();
        {
            let executor = self.executor.as_ref();
            let nodes = &nodes;
            let sink = &sink;

            self.parallelizer
                .until(cancel, nodes.len(), move |i| async move {
                    let node = &nodes[i];
                    match executor.run_fetch(plugin, &node.host).await {
                        Ok(res) => {
                            let _ = sink[i].set(res);
                        }
                        Err(e) => {
                            debug!(plugin, node = %node.name, host = %node.host, error = %e, "fetch failed");
                        }
                    }
                })
                .await;
        }

        for (node, slot) in nodes.iter_mut().zip(sink) {
            match slot.into_inner() {
                Some(res) if !res.is_empty() => {
                    node.allocatable_resource = res.allocatable_resource;
                    node.requested_resource = res.requested_resource;
                }
                Some(_) => debug!(plugin, node = %node.name, "fetch reported nothing"),
                None => {}
            }
        }

        Ok(nodes)
    }

    /// Keep the nodes that pass the first filter plugin to accept any node.
    ///
    /// Every plugin sees the full input list. Empty when no plugin accepts a
    /// node; unchanged when no filter is enabled.
    pub(crate) async fn filter_stage(&self, task: &Task, nodes: Vec<Node>) -> Vec<Node> {
        if self.filters.is_empty() {
            return nodes;
        }

        for plugin in &self.filters {
            let mut survivors = Vec::new();

            for node in &nodes {
                match self.executor.run_filter(&plugin.name, task, node).await {
                    Ok(res) if res.is_pass() => survivors.push(node.clone()),
                    Ok(res) => {
                        debug!(plugin = %plugin.name, node = %node.name, reason = %res.error, "node filtered");
                    }
                    Err(e) => {
                        debug!(plugin = %plugin.name, node = %node.name, error = %e, "filter failed");
                    }
                }
            }

            debug!(plugin = %plugin.name, survivors = survivors.len(), "filter pass done");
            if !survivors.is_empty() {
                return survivors;
            }
        }

        Vec::new()
    }

    /// Weighted scores from every score plugin for every node.
    ///
    /// Raw scores outside `MIN_NODE_SCORE..=MAX_NODE_SCORE` and failed calls
    /// contribute nothing.
    pub(crate) async fn score_stage(
        &self,
        task: &Task,
        nodes: &[Node],
        cancel: &CancellationToken,
    ) -> SchedulerResult<Vec<NodeScore>> {
        if self.scores.is_empty() {
            return Err(ScheduleError::InvalidEnabled { stage: Stage::Score });
        }

        let collected = Mutex::new(Vec::with_capacity(self.scores.len() * nodes.len()));
        {
            let executor = self.executor.as_ref();
            let plugins = self.scores.as_slice();
            let collected = &collected;

            self.parallelizer
                .until(cancel, plugins.len(), move |i| async move {
                    let plugin = &plugins[i];
                    let mut local = Vec::with_capacity(nodes.len());

                    for node in nodes {
                        match executor.run_score(&plugin.name, task, node).await {
                            Ok(res) if res.in_range() => local.push(NodeScore::new(
                                node.name.clone(),
                                res.score.saturating_mul(plugin.weight),
                            )),
                            Ok(res) => {
                                debug!(plugin = %plugin.name, node = %node.name, score = res.score, "score out of range");
                            }
                            Err(e) => {
                                debug!(plugin = %plugin.name, node = %node.name, error = %e, "score failed");
                            }
                        }
                    }

                    collected.lock().await.extend(local);
                })
                .await;
        }

        let scores = collected.into_inner();
        debug!(entries = scores.len(), "score stage done");
        Ok(scores)
    }
}

fn pick(scores: &[NodeScore]) -> SchedulerResult<String> {
    select_host(scores, &mut rand::thread_rng())
}
