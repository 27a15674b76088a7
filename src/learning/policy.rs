//! Explore/exploit policy
//!
//! Decides each cycle whether to spend the cycle on a speculative
//! experiment or on work that plays to known capabilities. The stored
//! exploration rate adapts to recent history:
//!
//! - repeated failed explorations dampen it
//! - a run of pure exploitation raises it
//! - a stagnant system raises it further
//! - a system in crisis never explores, whatever the rate
//!
//! The decision is deterministic given the random source, so tests drive
//! it with seeded or fixed generators.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::confidence::round2;
use crate::storage::{Experience, Registry};

/// Tuning for the exploration policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// How many recent experiences the policy looks at
    pub history_window: usize,
    /// Explorations needed in the window before dampening applies
    pub min_explorations: usize,
    /// Consecutive failed explorations that trigger dampening
    pub failed_explorations: usize,
    pub dampen_step: f64,
    pub rate_floor: f64,
    /// Trailing non-exploration cycles that count as stagnation
    pub stagnation_window: usize,
    pub stagnation_step: f64,
    pub stagnation_cap: f64,
    /// Below this criticality the system is in crisis
    pub chaos_threshold: f64,
    /// Above this criticality the system is stagnant
    pub stagnant_threshold: f64,
    pub stagnant_boost: f64,
    pub stagnant_cap: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            history_window: 10,
            min_explorations: 3,
            failed_explorations: 3,
            dampen_step: 0.05,
            rate_floor: 0.05,
            stagnation_window: 5,
            stagnation_step: 0.05,
            stagnation_cap: 0.30,
            chaos_threshold: 0.3,
            stagnant_threshold: 0.7,
            stagnant_boost: 0.10,
            stagnant_cap: 0.40,
        }
    }
}

/// Externally supplied state the policy consults
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// 0.0 = chaos, 0.5 = viable, 1.0 = stagnant
    #[serde(default)]
    pub criticality: Option<f64>,
}

impl SystemState {
    pub const DEFAULT_CRITICALITY: f64 = 0.5;

    pub fn with_criticality(criticality: f64) -> Self {
        Self {
            criticality: Some(criticality),
        }
    }

    /// Criticality clamped to [0, 1], defaulting to viable
    pub fn criticality(&self) -> f64 {
        match self.criticality {
            Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
            _ => Self::DEFAULT_CRITICALITY,
        }
    }
}

/// Why the policy decided what it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Criticality below the chaos threshold; exploration forbidden
    Crisis,
    /// Random draw fell under the exploration rate
    Sampled,
    /// Random draw fell at or above the exploration rate
    NotSampled,
}

/// Outcome of one policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub explore: bool,
    /// Rate the decision was sampled against (the stored rate in a crisis)
    pub rate: f64,
    pub reason: DecisionReason,
}

/// Explore/exploit decision maker
#[derive(Debug, Clone, Default)]
pub struct ExplorationPolicy {
    config: PolicyConfig,
}

impl ExplorationPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decide whether this cycle explores.
    ///
    /// `recent` is the experience history, oldest first; only the last
    /// `history_window` entries are read. Unless the system is in crisis
    /// the adjusted rate is written to
    /// `registry.exploration_log.exploration_rate` before the draw; the
    /// caller persists the registry.
    pub fn decide<R: Rng + ?Sized>(
        &self,
        registry: &mut Registry,
        recent: &[Experience],
        state: &SystemState,
        rng: &mut R,
    ) -> PolicyDecision {
        let cfg = &self.config;
        let stored = registry.exploration_log.exploration_rate;
        let criticality = state.criticality();

        if criticality < cfg.chaos_threshold {
            debug!(
                "Criticality {:.2} below {:.2}: exploitation only",
                criticality, cfg.chaos_threshold
            );
            return PolicyDecision {
                explore: false,
                rate: stored,
                reason: DecisionReason::Crisis,
            };
        }

        let window_start = recent.len().saturating_sub(cfg.history_window);
        let window = &recent[window_start..];

        let mut rate = stored;

        if self.explorations_keep_failing(window) {
            let dampened = (rate - cfg.dampen_step).max(cfg.rate_floor);
            debug!("Recent explorations failed: rate {:.2} -> {:.2}", rate, dampened);
            rate = dampened;
        }

        // Also pulls a boosted rate above the cap back down to it
        if self.exploitation_stagnating(window) {
            let raised = (rate + cfg.stagnation_step).min(cfg.stagnation_cap);
            debug!("No recent exploration: rate {:.2} -> {:.2}", rate, raised);
            rate = raised;
        }

        if criticality > cfg.stagnant_threshold {
            let boosted = (rate + cfg.stagnant_boost).min(cfg.stagnant_cap);
            debug!(
                "Criticality {:.2} above {:.2}: rate {:.2} -> {:.2}",
                criticality, cfg.stagnant_threshold, rate, boosted
            );
            rate = boosted;
        }

        let rate = round2(rate.clamp(0.0, 1.0));
        registry.exploration_log.exploration_rate = rate;

        let draw: f64 = rng.gen();
        let explore = draw < rate;

        PolicyDecision {
            explore,
            rate,
            reason: if explore {
                DecisionReason::Sampled
            } else {
                DecisionReason::NotSampled
            },
        }
    }

    /// Boolean form of [`decide`](Self::decide)
    pub fn should_explore<R: Rng + ?Sized>(
        &self,
        registry: &mut Registry,
        recent: &[Experience],
        state: &SystemState,
        rng: &mut R,
    ) -> bool {
        self.decide(registry, recent, state, rng).explore
    }

    /// Enough explorations in the window, and the latest few all failed
    fn explorations_keep_failing(&self, window: &[Experience]) -> bool {
        let explorations: Vec<&Experience> = window.iter().filter(|e| e.was_exploration).collect();
        if explorations.len() < self.config.min_explorations {
            return false;
        }
        let n = self.config.failed_explorations.min(explorations.len());
        n > 0 && explorations[explorations.len() - n..].iter().all(|e| !e.success)
    }

    /// The trailing stretch of history contains no exploration at all
    fn exploitation_stagnating(&self, window: &[Experience]) -> bool {
        let n = self.config.stagnation_window;
        n > 0 && window.len() >= n && window[window.len() - n..].iter().all(|e| !e.was_exploration)
    }
}
