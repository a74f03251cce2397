//! `PluginManager`: the executor built from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use pipego_core::{
    Args, FetchResult, FilterResult, Node, PluginSource, SchedulerConfig, ScoreResult, Stage, Task,
    config::StagePlugins,
};

use crate::contract::PluginExecutor;
use crate::error::{PluginError, PluginResult};
use crate::process::{HostConfig, ProcessPlugin};
use crate::registry::{PluginHandle, Registry};

#[derive(Default)]
struct Loaded {
    handles: HashMap<Stage, HashMap<String, PluginHandle>>,
    processes: Vec<Arc<ProcessPlugin>>,
}

impl Loaded {
    fn get(&self, stage: Stage, name: &str) -> Option<&PluginHandle> {
        self.handles.get(&stage)?.get(name)
    }

    async fn close(self) {
        for process in &self.processes {
            if let Err(e) = process.kill().await {
                warn!(plugin = %process.name(), error = %e, "failed to stop plugin process");
            }
        }
    }
}

/// Loads every configured plugin on `init` and dispatches calls by name.
///
/// Plugins of each stage load in order, disabled ones first. Disabled plugins
/// are callable by name but the pipeline never selects them.
pub struct PluginManager {
    stages: Vec<(Stage, StagePlugins)>,
    registry: Registry,
    host: HostConfig,
    loaded: RwLock<Option<Loaded>>,
}

impl PluginManager {
    pub fn new(config: &SchedulerConfig, registry: Registry) -> Self {
        Self {
            stages: Stage::ALL
                .into_iter()
                .map(|stage| (stage, config.plugins(stage).clone()))
                .collect(),
            registry,
            host: HostConfig::from(&config.spec.host),
            loaded: RwLock::new(None),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.loaded.read().await.is_some()
    }

    /// Names of the loaded plugins of a stage, sorted. Empty before `init`.
    pub async fn loaded_names(&self, stage: Stage) -> Vec<String> {
        let guard = self.loaded.read().await;
        let mut names: Vec<String> = guard
            .as_ref()
            .and_then(|l| l.handles.get(&stage))
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    async fn open(&self, stage: Stage, name: &str, path: &str) -> PluginResult<OpenedPlugin> {
        if name.is_empty() {
            return Err(PluginError::Load {
                stage,
                name: String::new(),
                reason: "plugin name is empty".to_string(),
            });
        }

        match PluginSource::resolve(name, path)? {
            PluginSource::Builtin { name: builtin } => {
                let handle =
                    self.registry
                        .get(stage, &builtin)
                        .ok_or_else(|| PluginError::Load {
                            stage,
                            name: name.to_string(),
                            reason: format!("no builtin {stage} plugin named {builtin}"),
                        })?;
                Ok(OpenedPlugin {
                    handle,
                    process: None,
                })
            }
            PluginSource::File { path } => {
                let process =
                    Arc::new(ProcessPlugin::spawn(&path, name, stage, &self.host).await?);
                Ok(OpenedPlugin {
                    handle: process.handle(),
                    process: Some(process),
                })
            }
        }
    }

    async fn load_all(&self) -> PluginResult<Loaded> {
        let mut loaded = Loaded::default();

        for (stage, plugins) in &self.stages {
            let descriptors = plugins
                .disabled
                .iter()
                .map(|d| (d.name.as_str(), d.path.as_str()))
                .chain(
                    plugins
                        .enabled
                        .iter()
                        .map(|e| (e.name.as_str(), e.path.as_str())),
                );

            for (name, path) in descriptors {
                if loaded.get(*stage, name).is_some() {
                    loaded.close().await;
                    return Err(PluginError::DuplicateName {
                        stage: *stage,
                        name: name.to_string(),
                    });
                }

                let opened = match self.open(*stage, name, path).await {
                    Ok(opened) => opened,
                    Err(e) => {
                        loaded.close().await;
                        return Err(e);
                    }
                };

                debug!(stage = %stage, plugin = %name, "plugin loaded");
                if let Some(process) = opened.process {
                    loaded.processes.push(process);
                }
                loaded
                    .handles
                    .entry(*stage)
                    .or_default()
                    .insert(name.to_string(), opened.handle);
            }
        }

        Ok(loaded)
    }

    async fn handle(&self, stage: Stage, name: &str) -> PluginResult<PluginHandle> {
        let guard = self.loaded.read().await;
        let loaded = guard.as_ref().ok_or(PluginError::NotInitialized)?;
        loaded
            .get(stage, name)
            .cloned()
            .ok_or_else(|| PluginError::InvalidName(name.to_string()))
    }
}

struct OpenedPlugin {
    handle: PluginHandle,
    process: Option<Arc<ProcessPlugin>>,
}

#[async_trait]
impl PluginExecutor for PluginManager {
    async fn init(&self) -> PluginResult<()> {
        let mut guard = self.loaded.write().await;
        if guard.is_some() {
            debug!("plugins already initialized");
            return Ok(());
        }

        let loaded = self.load_all().await?;
        info!(
            fetch = loaded.handles.get(&Stage::Fetch).map_or(0, HashMap::len),
            filter = loaded.handles.get(&Stage::Filter).map_or(0, HashMap::len),
            score = loaded.handles.get(&Stage::Score).map_or(0, HashMap::len),
            processes = loaded.processes.len(),
            "plugins initialized"
        );
        *guard = Some(loaded);
        Ok(())
    }

    async fn deinit(&self) -> PluginResult<()> {
        let loaded = self.loaded.write().await.take();
        if let Some(loaded) = loaded {
            loaded.close().await;
            info!("plugins released");
        }
        Ok(())
    }

    async fn run_fetch(&self, name: &str, host: &str) -> PluginResult<FetchResult> {
        match self.handle(Stage::Fetch, name).await? {
            PluginHandle::Fetch(plugin) => plugin.fetch(host).await,
            _ => Err(PluginError::InvalidName(name.to_string())),
        }
    }

    async fn run_filter(&self, name: &str, task: &Task, node: &Node) -> PluginResult<FilterResult> {
        match self.handle(Stage::Filter, name).await? {
            PluginHandle::Filter(plugin) => plugin.filter(&Args::new(task, node)).await,
            _ => Err(PluginError::InvalidName(name.to_string())),
        }
    }

    async fn run_score(&self, name: &str, task: &Task, node: &Node) -> PluginResult<ScoreResult> {
        match self.handle(Stage::Score, name).await? {
            PluginHandle::Score(plugin) => plugin.score(&Args::new(task, node)).await,
            _ => Err(PluginError::InvalidName(name.to_string())),
        }
    }
}
