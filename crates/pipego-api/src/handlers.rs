//! HTTP handlers.
//!
//! The schedule endpoint always answers `200` with `{name, error}`, even for
//! bodies it cannot read; callers check `error` before trusting `name`.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pipego_core::{Node, Task};
use pipego_scheduler::ScheduleOutcome;

use crate::ApiState;

/// The only request kind this server accepts.
pub const KIND_SCHEDULER: &str = "scheduler";

pub const ERR_INVALID_KIND: &str = "invalid kind";
pub const ERR_INVALID_SPEC: &str = "invalid spec";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleRequest {
    pub kind: String,
    pub spec: ScheduleSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSpec {
    pub task: Task,
    pub nodes: Vec<Node>,
}

/// POST /api/v1/schedule
pub async fn schedule(
    State(state): State<ApiState>,
    req: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Json<ScheduleOutcome> {
    let req = match req {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "unreadable schedule request");
            return Json(ScheduleOutcome::failure(ERR_INVALID_SPEC));
        }
    };

    if req.kind != KIND_SCHEDULER {
        warn!(kind = %req.kind, "rejected schedule request");
        return Json(ScheduleOutcome::failure(ERR_INVALID_KIND));
    }

    let ScheduleSpec { task, nodes } = req.spec;
    let node_count = nodes.len();
    let cancel = state.shutdown.child_token();

    let outcome = state.scheduler.run(&task, nodes, &cancel).await;
    info!(
        task = %task.name,
        nodes = node_count,
        node = %outcome.name,
        error = %outcome.error,
        "schedule request"
    );

    Json(outcome)
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}
