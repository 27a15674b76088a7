//! Configuration loaded from `config.toml` in the data directory
//!
//! Every section and field has a default, so a missing file or a file
//! naming only a few keys is fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::learning::{ConsolidationConfig, OracleConfig, PolicyConfig};
use crate::storage::experience::MAX_EXPERIENCES;

/// Config file name inside the data directory
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub learning: LearningConfig,
    pub policy: PolicyConfig,
    pub oracle: OracleConfig,
}

/// Experience retention and consolidation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Experiences kept in the rolling log
    pub max_experiences: usize,
    #[serde(flatten)]
    pub consolidation: ConsolidationConfig,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            max_experiences: MAX_EXPERIENCES,
            consolidation: ConsolidationConfig::default(),
        }
    }
}

/// Load configuration, falling back to defaults when the file is missing
pub fn load_config(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("reading {:?}", config_path))?;
    let config: Config =
        toml::from_str(&content).with_context(|| format!("parsing {:?}", config_path))?;
    Ok(config)
}

/// Commented configuration written by `vsm init`
pub const DEFAULT_CONFIG: &str = r#"# vsm-learn configuration

[learning]
# Experiences kept in experiences.jsonl
max_experiences = 100
# Consolidate every N cycles
interval = 10
# Experiences handed to the consolidation oracle
experience_window = 10
# Prune capabilities unused for more than N cycles...
prune_after_cycles = 50
# ...whose confidence is below this
prune_confidence_floor = 0.3
# Confidence required before a procedure is stored
procedure_threshold = 0.8

[policy]
# Recent experiences the explore/exploit policy reads
history_window = 10
# Dampen the rate after this many failed explorations in a row
failed_explorations = 3
dampen_step = 0.05
rate_floor = 0.05
# Raise the rate after this many cycles without exploring
stagnation_window = 5
stagnation_step = 0.05
stagnation_cap = 0.30
# Criticality below this never explores
chaos_threshold = 0.3
# Criticality above this boosts exploration
stagnant_threshold = 0.7
stagnant_boost = 0.10
stagnant_cap = 0.40

[oracle]
# Command consulted during consolidation. "{prompt}" is replaced by the
# prompt; without it the prompt is written to stdin. Empty disables it.
# command = ["claude", "-p", "{prompt}", "--output-format", "json"]
command = []
timeout_secs = 60
"#;
