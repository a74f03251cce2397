//! In-process plugin registry.
//!
//! Maps plugin names to ready handles, one table per capability. Entries are
//! either plugin types (see [`crate::builtin`]) or plain closures, so the
//! registry doubles as an in-process function table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use pipego_core::{Args, FetchResult, FilterResult, ScoreResult, Stage};

use crate::builtin;
use crate::contract::{FetchPlugin, FilterPlugin, ScorePlugin};
use crate::error::PluginResult;

/// A loaded plugin of one capability.
#[derive(Clone)]
pub enum PluginHandle {
    Fetch(Arc<dyn FetchPlugin>),
    Filter(Arc<dyn FilterPlugin>),
    Score(Arc<dyn ScorePlugin>),
}

impl PluginHandle {
    pub fn stage(&self) -> Stage {
        match self {
            PluginHandle::Fetch(_) => Stage::Fetch,
            PluginHandle::Filter(_) => Stage::Filter,
            PluginHandle::Score(_) => Stage::Score,
        }
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PluginHandle").field(&self.stage()).finish()
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    fetch: HashMap<String, Arc<dyn FetchPlugin>>,
    filter: HashMap<String, Arc<dyn FilterPlugin>>,
    score: HashMap<String, Arc<dyn ScorePlugin>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every stock plugin.
    pub fn with_builtins() -> Self {
        Self::new()
            .with_fetch("LocalHost", Arc::new(builtin::LocalHost))
            .with_filter("NodeName", Arc::new(builtin::NodeName))
            .with_filter("NodeAffinity", Arc::new(builtin::NodeAffinity))
            .with_filter("NodeUnschedulable", Arc::new(builtin::NodeUnschedulable))
            .with_filter("NodeResourcesFit", Arc::new(builtin::NodeResourcesFit))
            .with_score("NodeResourcesFit", Arc::new(builtin::NodeResourcesFit))
            .with_score(
                "NodeResourcesBalancedAllocation",
                Arc::new(builtin::NodeResourcesBalancedAllocation),
            )
    }

    pub fn with_fetch(mut self, name: impl Into<String>, plugin: Arc<dyn FetchPlugin>) -> Self {
        self.fetch.insert(name.into(), plugin);
        self
    }

    pub fn with_filter(mut self, name: impl Into<String>, plugin: Arc<dyn FilterPlugin>) -> Self {
        self.filter.insert(name.into(), plugin);
        self
    }

    pub fn with_score(mut self, name: impl Into<String>, plugin: Arc<dyn ScorePlugin>) -> Self {
        self.score.insert(name.into(), plugin);
        self
    }

    pub fn with_fetch_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> FetchResult + Send + Sync + 'static,
    {
        self.with_fetch(name, Arc::new(FnFetch(f)))
    }

    pub fn with_filter_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Args) -> FilterResult + Send + Sync + 'static,
    {
        self.with_filter(name, Arc::new(FnFilter(f)))
    }

    pub fn with_score_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Args) -> ScoreResult + Send + Sync + 'static,
    {
        self.with_score(name, Arc::new(FnScore(f)))
    }

    pub fn get(&self, stage: Stage, name: &str) -> Option<PluginHandle> {
        match stage {
            Stage::Fetch => self.fetch.get(name).cloned().map(PluginHandle::Fetch),
            Stage::Filter => self.filter.get(name).cloned().map(PluginHandle::Filter),
            Stage::Score => self.score.get(name).cloned().map(PluginHandle::Score),
        }
    }

    /// Registered names for a stage, sorted.
    pub fn names(&self, stage: Stage) -> Vec<String> {
        let mut names: Vec<String> = match stage {
            Stage::Fetch => self.fetch.keys().cloned().collect(),
            Stage::Filter => self.filter.keys().cloned().collect(),
            Stage::Score => self.score.keys().cloned().collect(),
        };
        names.sort();
        names
    }
}

struct FnFetch<F>(F);

#[async_trait]
impl<F> FetchPlugin for FnFetch<F>
where
    F: Fn(&str) -> FetchResult + Send + Sync,
{
    async fn fetch(&self, host: &str) -> PluginResult<FetchResult> {
        Ok((self.0)(host))
    }
}

struct FnFilter<F>(F);

#[async_trait]
impl<F> FilterPlugin for FnFilter<F>
where
    F: Fn(&Args) -> FilterResult + Send + Sync,
{
    async fn filter(&self, args: &Args) -> PluginResult<FilterResult> {
        Ok((self.0)(args))
    }
}

struct FnScore<F>(F);

#[async_trait]
impl<F> ScorePlugin for FnScore<F>
where
    F: Fn(&Args) -> ScoreResult + Send + Sync,
{
    async fn score(&self, args: &Args) -> PluginResult<ScoreResult> {
        Ok((self.0)(args))
    }
}
