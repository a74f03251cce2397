//! Score aggregation and host selection.

use std::collections::BTreeMap;

use rand::Rng;

use crate::error::{ScheduleError, SchedulerResult};

/// One weighted score for one node from one score plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeScore {
    pub name: String,
    pub score: i64,
}

impl NodeScore {
    pub fn new(name: impl Into<String>, score: i64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Sum scores per node name.
pub fn aggregate(scores: &[NodeScore]) -> BTreeMap<&str, i64> {
    let mut totals = BTreeMap::new();
    for s in scores {
        let total: &mut i64 = totals.entry(s.name.as_str()).or_default();
        *total = total.saturating_add(s.score);
    }
    totals
}

/// Pick the node with the highest total.
///
/// Nodes tied on the maximum are chosen uniformly by reservoir sampling with
/// `rng`, so the result never depends on the order totals are visited in.
pub fn select_host<R: Rng>(scores: &[NodeScore], rng: &mut R) -> SchedulerResult<String> {
    let mut best: Option<(&str, i64)> = None;
    let mut ties: u64 = 0;

    for (name, total) in aggregate(scores) {
        match best {
            Some((_, max)) if total < max => {}
            Some((_, max)) if total == max => {
                ties += 1;
                if rng.gen_range(0..ties) == 0 {
                    best = Some((name, total));
                }
            }
            _ => {
                best = Some((name, total));
                ties = 1;
            }
        }
    }

    best.map(|(name, _)| name.to_string())
        .ok_or(ScheduleError::InvalidScores)
}
