//! Per-cycle driver
//!
//! A cycle is `plan` (load the registry, decide explore or exploit, build
//! the decision context) followed by the caller's own work step and then
//! `complete` (log the experience, reflect, maybe consolidate, save). The
//! registry is loaded fresh in each step and saved whole at its end.
//!
//! Only the experience append is allowed to fail a cycle. Everything
//! after it is bookkeeping that degrades to a warning.

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::learning::{
    reflect, ConsolidationOracle, ConsolidationReport, Consolidator, DecisionContext,
    DecisionReason, ExplorationPolicy, SystemState, Task,
};
use crate::storage::experience::truncate_chars;
use crate::storage::{
    experience_log, registry_store, Experience, ExperienceLog, Experiment, Registry,
    RegistryStore, WorkOutcome,
};

/// Characters of output used as a hypothesis when none was given
const HYPOTHESIS_CHARS: usize = 120;

/// The policy's verdict and the context for the work step
#[derive(Debug, Clone, Serialize)]
pub struct CyclePlan {
    pub cycle: u64,
    pub explore: bool,
    pub rate: f64,
    pub reason: DecisionReason,
    pub criticality: f64,
    pub context: DecisionContext,
}

/// What `complete` did with an outcome
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub experience: Experience,
    /// Capability the experience was attributed to
    pub attributed: Option<String>,
    pub experiment_recorded: bool,
    pub consolidation: Option<ConsolidationReport>,
    pub pruned: Vec<String>,
    /// False when the registry could not be written back
    pub saved: bool,
}

pub struct LearningLoop {
    store: RegistryStore,
    log: ExperienceLog,
    policy: ExplorationPolicy,
    consolidator: Consolidator,
    oracle: Box<dyn ConsolidationOracle>,
}

impl LearningLoop {
    pub fn new(config: Config, data_dir: &Path, oracle: Box<dyn ConsolidationOracle>) -> Self {
        Self {
            store: registry_store(data_dir),
            log: experience_log(data_dir, config.learning.max_experiences),
            policy: ExplorationPolicy::new(config.policy),
            consolidator: Consolidator::new(config.learning.consolidation),
            oracle,
        }
    }

    pub fn registry(&self) -> Registry {
        self.store.load()
    }

    fn history(&self, n: usize) -> Vec<Experience> {
        match self.log.recent(n) {
            Ok(recent) => recent,
            Err(e) => {
                warn!("Failed to read experience log {:?}: {}", self.log.path(), e);
                Vec::new()
            }
        }
    }

    /// Decide whether `cycle` explores and assemble its decision context.
    ///
    /// The adjusted exploration rate is saved before returning.
    pub fn plan<R: Rng + ?Sized>(
        &self,
        cycle: u64,
        state: &SystemState,
        tasks: &[Task],
        rng: &mut R,
    ) -> Result<CyclePlan> {
        let mut registry = self.store.load();
        let recent = self.history(self.policy.config().history_window);
        let before = registry.exploration_log.exploration_rate;

        let decision = self.policy.decide(&mut registry, &recent, state, rng);

        if registry.exploration_log.exploration_rate != before {
            registry.updated = Some(Utc::now());
            self.store
                .save(&registry)
                .context("saving adjusted exploration rate")?;
        }

        if decision.explore {
            info!("Cycle {}: exploration (rate {:.0}%)", cycle, decision.rate * 100.0);
        } else {
            debug!("Cycle {}: exploitation ({:?})", cycle, decision.reason);
        }

        let criticality = state.criticality();
        Ok(CyclePlan {
            cycle,
            explore: decision.explore,
            rate: decision.rate,
            reason: decision.reason,
            criticality,
            context: DecisionContext::build(&registry, tasks, cycle, criticality, decision.explore),
        })
    }

    /// Record the outcome of `cycle` and learn from it
    pub async fn complete(&self, cycle: u64, explore: bool, outcome: WorkOutcome) -> Result<CycleReport> {
        let experience = Experience::from_outcome(cycle, explore, &outcome);
        self.log
            .append(&experience)
            .with_context(|| format!("appending experience for cycle {}", cycle))?;

        let mut registry = self.store.load();
        let attributed = reflect(&mut registry, &experience);

        let mut consolidation = None;
        let mut pruned = Vec::new();
        if self.consolidator.is_due(cycle) {
            let window = self.history(self.consolidator.config().experience_window);
            let consolidated = self
                .consolidator
                .consolidate(&registry, &window, cycle, self.oracle.as_ref())
                .await;
            registry = consolidated.registry;
            pruned = self.consolidator.prune(&mut registry, cycle);
            consolidation = Some(consolidated.report);
        }

        if explore {
            let capability_created = consolidation
                .as_ref()
                .and_then(|r| r.capabilities_added.first().cloned());
            registry.record_experiment(Experiment {
                cycle,
                hypothesis: hypothesis_for(&outcome),
                result: match (outcome.success, &outcome.error) {
                    (true, _) => "success".to_string(),
                    (false, Some(err)) => format!("failure: {}", truncate_chars(err, HYPOTHESIS_CHARS)),
                    (false, None) => "failure".to_string(),
                },
                capability_created,
            });
        }

        registry.updated = Some(Utc::now());
        let saved = match self.store.save(&registry) {
            Ok(()) => true,
            Err(e) => {
                warn!("Cycle {}: failed to save registry: {:#}", cycle, e);
                false
            }
        };

        info!(
            "Cycle {} recorded: {}{}",
            cycle,
            if experience.success { "success" } else { "failure" },
            attributed
                .as_deref()
                .map(|id| format!(", attributed to '{}'", id))
                .unwrap_or_default()
        );

        Ok(CycleReport {
            cycle,
            experience,
            attributed,
            experiment_recorded: explore,
            consolidation,
            pruned,
            saved,
        })
    }

    /// Consolidate now regardless of cadence, then save
    pub async fn consolidate_now(&self, cycle: u64) -> Result<ConsolidationReport> {
        let registry = self.store.load();
        let window = self.history(self.consolidator.config().experience_window);
        let mut outcome = self
            .consolidator
            .consolidate(&registry, &window, cycle, self.oracle.as_ref())
            .await;

        if outcome.report.changed() {
            outcome.registry.updated = Some(Utc::now());
            self.store.save(&outcome.registry)?;
        }
        Ok(outcome.report)
    }

    /// Prune stale low-confidence capabilities as of `cycle`
    pub fn prune(&self, cycle: u64, dry_run: bool) -> Result<Vec<String>> {
        let mut registry = self.store.load();
        if dry_run {
            return Ok(self.consolidator.prune_candidates(&registry, cycle));
        }

        let removed = self.consolidator.prune(&mut registry, cycle);
        if !removed.is_empty() {
            registry.updated = Some(Utc::now());
            self.store.save(&registry)?;
        }
        Ok(removed)
    }

    /// Cycle of the newest logged experience, 0 when none
    pub fn last_cycle(&self) -> u64 {
        self.history(1).last().map(|e| e.cycle).unwrap_or(0)
    }
}

fn hypothesis_for(outcome: &WorkOutcome) -> String {
    match outcome.hypothesis.as_deref().map(str::trim) {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => truncate_chars(outcome.output.lines().next().unwrap_or("").trim(), HYPOTHESIS_CHARS),
    }
}
