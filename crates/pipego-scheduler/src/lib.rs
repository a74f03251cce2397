//! pipego-scheduler: picks one node for a task.
//!
//! A [`Scheduler`] runs a four-stage pipeline over the configured plugins,
//! reaching them only through [`PluginExecutor`](pipego_plugin::PluginExecutor):
//!
//! - **fetch** refreshes node resources, one piece per node, in parallel
//! - **filter** keeps the first non-empty survivor set, plugins in ascending
//!   priority
//! - **score** runs every score plugin against the survivors, one piece per
//!   plugin, in parallel
//! - **select** sums weighted scores per node and breaks ties uniformly
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── Parallelizer (fetch / score fan-out, cancellation)
//!   ├── PluginExecutor (run_fetch / run_filter / run_score by name)
//!   └── select_host (aggregate + reservoir tie-break)
//! ```

pub mod error;
pub mod scheduler;
pub mod select;

pub use error::{ScheduleError, SchedulerResult};
pub use scheduler::{Lifecycle, ScheduleOutcome, Scheduler};
pub use select::{NodeScore, aggregate, select_host};
