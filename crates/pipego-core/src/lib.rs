pub mod config;
pub mod source;
pub mod types;

pub use config::{ConfigError, SchedulerConfig, Stage};
pub use source::{PluginSource, SourceError};
pub use types::*;
