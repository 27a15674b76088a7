//! Capability registry storage
//!
//! The registry is a single JSON document holding capabilities,
//! anti-patterns and the exploration log. It is loaded once at the start
//! of a cycle, transformed as a plain value and written back whole at the
//! end; nothing holds it open across cycles.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::learning::confidence::confidence;

/// Current registry format version
pub const REGISTRY_VERSION: u32 = 1;

/// Exploration rate used when the registry has none stored
pub const DEFAULT_EXPLORATION_RATE: f64 = 0.15;

/// Maximum experiments kept in the exploration log
pub const MAX_EXPERIMENTS: usize = 20;

/// A named, confidence-scored belief about a repeatable ability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(default)]
    pub description: String,
    /// Derived from the counters; only consolidation may override it
    #[serde(default = "neutral_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub times_used: u64,
    #[serde(default)]
    pub times_succeeded: u64,
    #[serde(default)]
    pub times_failed: u64,
    pub first_learned: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    /// Cycle of the last attributed experience, for staleness pruning
    #[serde(default)]
    pub last_used_cycle: u64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub notes: String,
    /// Step-by-step instructions, kept once confidence is high enough
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<Vec<String>>,
}

fn neutral_confidence() -> f64 {
    0.5
}

impl Capability {
    /// A fresh capability with no recorded uses
    pub fn new(description: impl Into<String>, tags: impl IntoIterator<Item = String>, now: DateTime<Utc>) -> Self {
        Self {
            description: description.into(),
            confidence: confidence(0, 0),
            times_used: 0,
            times_succeeded: 0,
            times_failed: 0,
            first_learned: now,
            last_used: None,
            last_used_cycle: 0,
            tags: tags.into_iter().map(|t| t.to_lowercase()).collect(),
            notes: String::new(),
            procedure: None,
        }
    }

    /// Count one outcome and recompute confidence from the counters
    pub fn record_outcome(&mut self, success: bool, at: DateTime<Utc>, cycle: u64) {
        if success {
            self.times_succeeded = self.times_succeeded.saturating_add(1);
        } else {
            self.times_failed = self.times_failed.saturating_add(1);
        }
        self.times_used = self.times_succeeded.saturating_add(self.times_failed);
        self.last_used = Some(at);
        self.last_used_cycle = self.last_used_cycle.max(cycle);
        self.confidence = confidence(self.times_succeeded, self.times_failed);
    }

    pub fn counters_consistent(&self) -> bool {
        self.times_used == self.times_succeeded.saturating_add(self.times_failed)
    }
}

/// A recorded failure mode with a suggested mitigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiPattern {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mitigation: String,
    #[serde(default)]
    pub times_observed: u64,
    pub first_observed: DateTime<Utc>,
}

/// One exploration cycle's hypothesis and result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub cycle: u64,
    pub hypothesis: String,
    pub result: String,
    #[serde(default)]
    pub capability_created: Option<String>,
}

/// Exploration bookkeeping nested inside the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationLog {
    #[serde(default = "default_rate")]
    pub exploration_rate: f64,
    #[serde(default)]
    pub last_exploration_cycle: u64,
    #[serde(default)]
    pub recent_experiments: Vec<Experiment>,
}

fn default_rate() -> f64 {
    DEFAULT_EXPLORATION_RATE
}

impl Default for ExplorationLog {
    fn default() -> Self {
        Self {
            exploration_rate: DEFAULT_EXPLORATION_RATE,
            last_exploration_cycle: 0,
            recent_experiments: Vec::new(),
        }
    }
}

/// The full capability registry document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub capabilities: BTreeMap<String, Capability>,
    #[serde(default)]
    pub anti_patterns: BTreeMap<String, AntiPattern>,
    #[serde(default)]
    pub exploration_log: ExplorationLog,
}

fn default_version() -> u32 {
    REGISTRY_VERSION
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            updated: None,
            capabilities: BTreeMap::new(),
            anti_patterns: BTreeMap::new(),
            exploration_log: ExplorationLog::default(),
        }
    }
}

impl Registry {
    /// Insert a capability at zero uses unless one with that id exists.
    ///
    /// Returns true if the capability was created.
    pub fn seed_capability(
        &mut self,
        id: &str,
        description: &str,
        tags: impl IntoIterator<Item = String>,
    ) -> bool {
        if id.trim().is_empty() || self.capabilities.contains_key(id) {
            return false;
        }
        self.capabilities
            .insert(id.to_string(), Capability::new(description, tags, Utc::now()));
        true
    }

    /// Append an experiment, dropping the oldest beyond `MAX_EXPERIMENTS`
    pub fn record_experiment(&mut self, experiment: Experiment) {
        let log = &mut self.exploration_log;
        log.last_exploration_cycle = log.last_exploration_cycle.max(experiment.cycle);
        log.recent_experiments.push(experiment);
        if log.recent_experiments.len() > MAX_EXPERIMENTS {
            let excess = log.recent_experiments.len() - MAX_EXPERIMENTS;
            log.recent_experiments.drain(..excess);
        }
    }

    /// Repair counter drift found on load.
    ///
    /// `times_used` is recomputed from the success and failure counters.
    /// Returns the ids that needed repair.
    pub fn heal(&mut self) -> Vec<String> {
        let mut healed = Vec::new();
        for (id, cap) in self.capabilities.iter_mut() {
            if !cap.counters_consistent() {
                warn!(
                    "Capability '{}' has times_used={} but succeeded={} + failed={}; recomputing",
                    id, cap.times_used, cap.times_succeeded, cap.times_failed
                );
                cap.times_used = cap.times_succeeded.saturating_add(cap.times_failed);
                healed.push(id.clone());
            }
        }

        let rate = self.exploration_log.exploration_rate;
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            warn!("Exploration rate {} out of range; resetting to default", rate);
            self.exploration_log.exploration_rate = DEFAULT_EXPLORATION_RATE;
        }

        healed
    }

    /// Capabilities ordered by descending confidence, then id
    pub fn ranked_capabilities(&self) -> Vec<(&String, &Capability)> {
        rank(self.capabilities.iter())
    }
}

/// Order `(id, capability)` pairs by descending confidence, then id
pub fn rank<'a, K: AsRef<str>>(
    capabilities: impl IntoIterator<Item = (K, &'a Capability)>,
) -> Vec<(K, &'a Capability)> {
    let mut ranked: Vec<_> = capabilities.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.confidence
            .partial_cmp(&a.1.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.as_ref().cmp(b.0.as_ref()))
    });
    ranked
}

/// Loads and saves the registry document
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the registry, treating a missing or unreadable file as a first run
    pub fn load(&self) -> Registry {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry at {:?}, starting empty", self.path);
                return Registry::default();
            }
            Err(e) => {
                warn!("Failed to read registry {:?}: {}; starting empty", self.path, e);
                return Registry::default();
            }
        };

        let mut registry: Registry = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                warn!("Registry {:?} is malformed ({}); starting empty", self.path, e);
                return Registry::default();
            }
        };

        registry.heal();
        registry
    }

    /// Write the whole registry via a temp file and rename
    pub fn save(&self, registry: &Registry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(registry)?;
        fs::write(&tmp, json).with_context(|| format!("writing {:?}", tmp))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("replacing {:?}", self.path))?;

        debug!(
            "Saved registry: {} capabilities, {} anti-patterns",
            registry.capabilities.len(),
            registry.anti_patterns.len()
        );
        Ok(())
    }
}
