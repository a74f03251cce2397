//! Subprocess wire messages.
//!
//! Newline-delimited JSON on the plugin's stdin/stdout. The plugin opens with
//! one [`Hello`] line; after that each [`Call`] line is answered by exactly
//! one [`Reply`] line carrying the same id. Replies may arrive in any order,
//! so several calls can be in flight on one process.

use serde::{Deserialize, Serialize};

use pipego_core::{Args, FetchResult, FilterResult, ScoreResult, Stage};

/// First line written by a plugin process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol_version: u32,
    pub kind: Stage,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Request {
    Fetch { host: String },
    Filter { args: Args },
    Score { args: Args },
}

impl Request {
    pub fn stage(&self) -> Stage {
        match self {
            Request::Fetch { .. } => Stage::Fetch,
            Request::Filter { .. } => Stage::Filter,
            Request::Score { .. } => Stage::Score,
        }
    }
}

/// A request line: the request plus the id its reply must echo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub id: u64,
    pub request: Request,
}

/// A response line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    pub response: Response,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "result", rename_all = "lowercase")]
pub enum Response {
    Fetch(FetchResult),
    Filter(FilterResult),
    Score(ScoreResult),
    /// The plugin could not answer the request.
    Error(String),
}
