//! pipego-plugin: loading and calling fetch, filter and score plugins.
//!
//! The scheduling pipeline only sees [`PluginExecutor`]: by-name dispatch to
//! the three plugin capabilities. Everything about where a plugin lives is
//! kept behind it.
//!
//! # Components
//!
//! - **`contract`**: capability traits and the executor trait
//! - **`registry`**: in-process name → handle tables (builtins, closures)
//! - **`builtin`**: stock plugins: `LocalHost`, `NodeName`, `NodeAffinity`, ...
//! - **`process`**: host side of subprocess plugins (spawn, handshake, calls)
//! - **`serve`**: plugin side of the subprocess protocol
//! - **`protocol`**: JSON-lines wire messages
//! - **`manager`**: `PluginManager`, the executor built from configuration
//!
//! ```text
//! PluginManager (PluginExecutor)
//!   ├── init: per stage, disabled then enabled descriptors
//!   │   ├── builtin://Name or empty path → Registry
//!   │   └── file path                    → ProcessPlugin::spawn
//!   ├── run_fetch / run_filter / run_score → name → handle
//!   └── deinit: kill every spawned process
//! ```

pub mod builtin;
pub mod contract;
pub mod error;
pub mod manager;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod serve;

pub use contract::{FetchPlugin, FilterPlugin, PluginExecutor, ScorePlugin};
pub use error::{PluginError, PluginResult};
pub use manager::PluginManager;
pub use process::{HostConfig, ProcessPlugin};
pub use registry::{PluginHandle, Registry};
pub use serve::{serve, serve_io};
