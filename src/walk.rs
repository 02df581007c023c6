//! Walks a time budget along a route.

use crate::model::{Route, Step};
use crate::polyline::Polyline;

/// Where a time budget ends on a route.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkOutcome<'a> {
    /// Step the walker is on when the budget runs out, `None` if the whole
    /// route was completed.
    pub current_step: Option<&'a Step>,
    /// Polylines of every step entered, the current one included.
    pub polylines: Vec<Polyline>,
    /// Budget left after reaching the destination; zero when stopped mid-step.
    pub leftover_secs: f64,
    /// Completed fraction of the current step, in [0, 1].
    pub step_progress: f64,
}

impl WalkOutcome<'_> {
    pub fn arrived(&self) -> bool {
        self.current_step.is_none()
    }
}

/// Consumes `seconds` along the first leg of `route`.
///
/// A step ends the walk only if the remaining budget is strictly shorter than
/// it, so zero-length steps are always passed and a budget that exactly covers
/// the route counts as arrival.
pub fn walk(route: &Route, seconds: f64) -> WalkOutcome<'_> {
    let mut remaining = seconds.max(0.0);
    let mut polylines = Vec::new();

    for step in route.steps() {
        polylines.push(step.polyline.clone());
        if remaining < step.duration {
            return WalkOutcome {
                current_step: Some(step),
                polylines,
                leftover_secs: 0.0,
                step_progress: (remaining / step.duration).clamp(0.0, 1.0),
            };
        }
        remaining -= step.duration;
    }

    WalkOutcome {
        current_step: None,
        polylines,
        leftover_secs: remaining,
        step_progress: 0.0,
    }
}
