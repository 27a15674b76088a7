//! Criticality estimate from raw system signals
//!
//! Collapses error pressure and idleness into the single scalar the
//! exploration policy reads: 0.0 is chaos (stabilize), 0.5 is viable
//! (ship), 1.0 is stagnant (explore).

use serde::{Deserialize, Serialize};

use super::confidence::round2;

/// Health signals gathered by the caller before a cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSignals {
    /// Failures recorded in the last hour
    pub recent_errors: u32,
    /// Whether the periodic trigger is installed and healthy
    pub scheduler_ok: bool,
    /// Hours since the last completed cycle, if one ever completed
    pub idle_hours: Option<f64>,
    pub pending_tasks: u32,
}

impl Default for SystemSignals {
    fn default() -> Self {
        Self {
            recent_errors: 0,
            scheduler_ok: true,
            idle_hours: None,
            pending_tasks: 0,
        }
    }
}

/// Backlog size tolerated before it counts as stagnation
const BACKLOG_SLACK: u32 = 5;

pub fn compute(signals: &SystemSignals) -> f64 {
    let mut chaos = (signals.recent_errors as f64 / 5.0).min(1.0) * 0.7;
    if !signals.scheduler_ok {
        chaos += 0.3;
    }
    let chaos = chaos.min(1.0);

    let mut stagnation = 0.0;
    if let Some(hours) = signals.idle_hours.filter(|h| h.is_finite() && *h > 0.0) {
        stagnation += (hours / 2.0).min(1.0) * 0.6;
    }
    if signals.pending_tasks > BACKLOG_SLACK {
        stagnation += ((signals.pending_tasks - BACKLOG_SLACK) as f64 / 10.0).min(1.0) * 0.4;
    }
    let stagnation: f64 = stagnation.min(1.0);

    round2((0.5 - chaos * 0.5 + stagnation * 0.5).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_system_is_viable() {
        assert_eq!(compute(&SystemSignals::default()), 0.5);
    }

    #[test]
    fn test_errors_push_toward_chaos() {
        let signals = SystemSignals {
            recent_errors: 5,
            scheduler_ok: false,
            ..Default::default()
        };
        assert_eq!(compute(&signals), 0.0);

        let signals = SystemSignals {
            recent_errors: 2,
            ..Default::default()
        };
        // chaos = 0.4 * 0.7 = 0.28
        assert_eq!(compute(&signals), 0.36);
    }

    #[test]
    fn test_idle_backlog_pushes_toward_stagnation() {
        let signals = SystemSignals {
            idle_hours: Some(4.0),
            pending_tasks: 20,
            ..Default::default()
        };
        assert_eq!(compute(&signals), 1.0);

        let signals = SystemSignals {
            idle_hours: Some(1.0),
            ..Default::default()
        };
        // stagnation = 0.5 * 0.6 = 0.3
        assert_eq!(compute(&signals), 0.65);
    }
}
