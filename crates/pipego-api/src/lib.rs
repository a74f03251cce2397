//! pipego-api: HTTP front end for the scheduler.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/schedule` | Schedule one task onto one of the given nodes |
//! | GET | `/healthz` | Liveness probe |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;

use pipego_scheduler::Scheduler;

pub use handlers::{ERR_INVALID_KIND, ERR_INVALID_SPEC, KIND_SCHEDULER, ScheduleRequest, ScheduleSpec};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
    /// Cancelled on server shutdown; every scheduling call runs under a child.
    pub shutdown: CancellationToken,
}

/// Build the complete API router.
pub fn build_router(scheduler: Arc<Scheduler>, shutdown: CancellationToken) -> Router {
    let state = ApiState {
        scheduler,
        shutdown,
    };

    let api_routes = Router::new()
        .route("/schedule", post(handlers::schedule))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
