//! Scheduler TOML configuration.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DEFAULT_PARALLELISM;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("parallelism must be at least 1")]
    ZeroParallelism,

    #[error("duplicate {stage} plugin name: {name}")]
    DuplicatePlugin { stage: Stage, name: String },

    #[error("invalid logger format: {0} (expected: text|json)")]
    InvalidLoggerFormat(String),

    #[error("invalid logger rotation: {0} (expected: never|minutely|hourly|daily)")]
    InvalidLoggerRotation(String),
}

/// Pipeline stage a plugin belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Filter,
    Score,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Fetch, Stage::Filter, Stage::Score];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Filter => "filter",
            Stage::Score => "score",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub api_version: String,
    pub kind: String,
    pub metadata: MetaData,
    pub spec: Spec,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "scheduler".to_string(),
            metadata: MetaData::default(),
            spec: Spec::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaData {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Spec {
    /// Worker count for the fetch and score fan-out.
    pub parallelism: usize,
    pub fetch: StagePlugins,
    pub filter: StagePlugins,
    pub score: StagePlugins,
    pub host: HostSpec,
    pub logger: LoggerSpec,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            fetch: StagePlugins::default(),
            filter: StagePlugins::default(),
            score: StagePlugins::default(),
            host: HostSpec::default(),
            logger: LoggerSpec::default(),
        }
    }
}

/// Plugins configured for one stage.
///
/// Disabled plugins are loaded (and so validated) but never run by the
/// pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePlugins {
    pub disabled: Vec<Disabled>,
    pub enabled: Vec<Enabled>,
}

impl StagePlugins {
    /// Names in load order: disabled first, then enabled.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.disabled
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.enabled.iter().map(|e| e.name.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.disabled.is_empty() && self.enabled.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Disabled {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Enabled {
    pub name: String,
    pub path: String,
    /// Filter ordering; lower runs first.
    pub priority: i64,
    /// Score multiplier.
    pub weight: i64,
}

impl Default for Enabled {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: String::new(),
            priority: 0,
            weight: 1,
        }
    }
}

impl Enabled {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }
}

/// Handshake settings shared by the host and its subprocess plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSpec {
    pub protocol_version: u32,
    pub cookie_key: String,
    pub cookie_value: String,
    pub call_timeout_secs: u64,
}

impl Default for HostSpec {
    fn default() -> Self {
        Self {
            protocol_version: 1,
            cookie_key: "PIPEGO_PLUGIN".to_string(),
            cookie_value: "pipego".to_string(),
            call_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerSpec {
    /// `EnvFilter` directive, e.g. `info` or `info,pipego_scheduler=debug`.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
    /// Log file path. When set, stdout only carries warnings and errors.
    pub file_name: String,
    /// `never`, `minutely`, `hourly` or `daily`.
    pub rotation: String,
    /// Rotated files to keep; 0 keeps all.
    pub max_files: usize,
}

impl Default for LoggerSpec {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file_name: String::new(),
            rotation: "daily".to_string(),
            max_files: 0,
        }
    }
}

impl LoggerSpec {
    pub const ROTATIONS: [&'static str; 4] = ["never", "minutely", "hourly", "daily"];

    pub fn logs_to_file(&self) -> bool {
        !self.file_name.trim().is_empty()
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn plugins(&self, stage: Stage) -> &StagePlugins {
        match stage {
            Stage::Fetch => &self.spec.fetch,
            Stage::Filter => &self.spec.filter,
            Stage::Score => &self.spec.score,
        }
    }

    /// Check the shape rules that do not need plugins to be loaded.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spec.parallelism == 0 {
            return Err(ConfigError::ZeroParallelism);
        }

        match self.spec.logger.format.trim().to_ascii_lowercase().as_str() {
            "text" | "json" => {}
            _ => return Err(ConfigError::InvalidLoggerFormat(self.spec.logger.format.clone())),
        }

        let rotation = self.spec.logger.rotation.trim().to_ascii_lowercase();
        if !LoggerSpec::ROTATIONS.contains(&rotation.as_str()) {
            return Err(ConfigError::InvalidLoggerRotation(
                self.spec.logger.rotation.clone(),
            ));
        }

        for stage in Stage::ALL {
            let mut seen = HashSet::new();
            for name in self.plugins(stage).names() {
                if !seen.insert(name) {
                    return Err(ConfigError::DuplicatePlugin {
                        stage,
                        name: name.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
