//! Storage module for vsm-learn
//!
//! Handles the capability registry (one JSON document) and the experience
//! log (rolling JSONL), and provides status/statistics reporting over
//! both.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

pub mod experience;
pub mod registry;

pub use experience::{Experience, ExperienceLog, WorkOutcome, MAX_EXPERIENCES};
pub use registry::{
    AntiPattern, Capability, Experiment, ExplorationLog, Registry, RegistryStore,
};

use crate::config::{CONFIG_FILE, DEFAULT_CONFIG};

/// Registry file name inside the data directory
pub const REGISTRY_FILE: &str = "capabilities.json";

/// Experience log file name inside the data directory
pub const EXPERIENCES_FILE: &str = "experiences.jsonl";

/// Environment variable overriding the data directory
pub const HOME_ENV: &str = "VSM_HOME";

pub fn registry_store(data_dir: &Path) -> RegistryStore {
    RegistryStore::new(&data_dir.join(REGISTRY_FILE))
}

pub fn experience_log(data_dir: &Path, capacity: usize) -> ExperienceLog {
    ExperienceLog::open(&data_dir.join(EXPERIENCES_FILE), capacity)
}

/// Resolve the data directory: `$VSM_HOME`, then `./.vsm`, then `~/.vsm`
pub fn get_data_dir() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }

    // Check for .vsm directory in current project first
    let cwd = std::env::current_dir()?;
    let project_dir = cwd.join(".vsm");
    if project_dir.exists() {
        return Ok(project_dir);
    }

    let home = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(".vsm"))
}

/// Initialize the data directory with an empty registry and default config
pub async fn init(data_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;

    let store = registry_store(data_dir);
    if !store.exists() {
        store.save(&Registry::default())?;
        info!("Created empty capability registry at {:?}", store.path());
    }

    let config_path = data_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        std::fs::write(&config_path, DEFAULT_CONFIG)?;
        info!("Created default configuration at {:?}", config_path);
    }

    info!("vsm initialized at {:?}", data_dir);
    Ok(())
}

/// Show current status
pub async fn show_status(data_dir: &Path) -> Result<()> {
    println!("VSM Learning Status");
    println!("===================");
    println!();

    if !data_dir.exists() {
        println!("Status: NOT INITIALIZED");
        println!("Run 'vsm init' to initialize");
        return Ok(());
    }

    println!("Status: INITIALIZED");
    println!("Data directory: {:?}", data_dir);

    let store = registry_store(data_dir);
    if store.exists() {
        let registry = store.load();
        println!("Capabilities: {}", registry.capabilities.len());
        println!("Anti-patterns: {}", registry.anti_patterns.len());
        println!(
            "Exploration rate: {:.2}",
            registry.exploration_log.exploration_rate
        );
        match registry.updated {
            Some(updated) => println!("Last updated: {}", updated.to_rfc3339()),
            None => println!("Last updated: never"),
        }
    } else {
        println!("Registry: NOT FOUND");
    }

    let log = experience_log(data_dir, MAX_EXPERIENCES);
    let experiences = log.all()?;
    println!("Experiences logged: {}", experiences.len());
    if let Some(last) = experiences.last() {
        println!(
            "Last cycle: {} ({})",
            last.cycle,
            if last.success { "success" } else { "failure" }
        );
    }

    Ok(())
}

/// Show detailed statistics
pub async fn show_stats(data_dir: &Path) -> Result<()> {
    println!("VSM Learning Statistics");
    println!("=======================");
    println!();

    if !data_dir.exists() {
        println!("Not initialized. Run 'vsm init' first.");
        return Ok(());
    }

    let registry = registry_store(data_dir).load();

    println!("Capabilities:");
    println!("-------------");
    if registry.capabilities.is_empty() {
        println!("  No capabilities learned yet.");
    }
    for (id, cap) in registry.ranked_capabilities() {
        println!(
            "  {:<32} {:>4.0}%  {:>3} uses ({} ok / {} failed){}",
            id,
            cap.confidence * 100.0,
            cap.times_used,
            cap.times_succeeded,
            cap.times_failed,
            if cap.procedure.is_some() { "  [procedure]" } else { "" }
        );
    }

    println!();
    println!("Anti-Patterns:");
    println!("--------------");
    if registry.anti_patterns.is_empty() {
        println!("  None recorded.");
    }
    for (id, ap) in &registry.anti_patterns {
        println!("  {} (seen {}x): {}", id, ap.times_observed, ap.mitigation);
    }

    let experiences = experience_log(data_dir, MAX_EXPERIENCES).all()?;
    let summary = ExperienceSummary::from_experiences(&experiences);

    println!();
    println!("Experience Window:");
    println!("------------------");
    println!("  Cycles: {}", summary.total);
    if summary.total > 0 {
        println!(
            "  Success rate: {:.1}% ({}/{})",
            summary.success_rate() * 100.0,
            summary.succeeded,
            summary.total
        );
        println!(
            "  Explorations: {} ({} succeeded)",
            summary.explorations, summary.explorations_succeeded
        );
        println!("  Total cost: ${:.2}", summary.total_cost);
        println!("  Avg duration: {:.0}ms", summary.avg_duration_ms());
    }

    println!();
    println!("Exploration:");
    println!("------------");
    let log = &registry.exploration_log;
    println!("  Rate: {:.2}", log.exploration_rate);
    println!("  Last exploration cycle: {}", log.last_exploration_cycle);
    for e in log.recent_experiments.iter().rev().take(5) {
        println!("  Cycle {}: \"{}\" -> {}", e.cycle, e.hypothesis, e.result);
    }

    Ok(())
}

/// Show the most recent experiences
pub async fn show_recent(data_dir: &Path, limit: usize, json: bool) -> Result<()> {
    let experiences = experience_log(data_dir, MAX_EXPERIENCES).recent(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&experiences)?);
        return Ok(());
    }

    if experiences.is_empty() {
        println!("No experiences recorded.");
        return Ok(());
    }

    println!("Recent Experiences (last {}):", experiences.len());
    println!("{}", "=".repeat(60));
    for e in &experiences {
        let preview = experience::truncate_chars(e.output_summary.lines().next().unwrap_or(""), 80);
        println!(
            "  #{:<5} {} {}{} ${:.2} {}",
            e.cycle,
            e.timestamp.format("%Y-%m-%d %H:%M"),
            if e.success { "ok  " } else { "FAIL" },
            if e.was_exploration { " [explore]" } else { "" },
            e.cost,
            preview
        );
        if let Some(err) = &e.error {
            println!("         error: {}", experience::truncate_chars(err, 80));
        }
    }

    Ok(())
}

/// Aggregate figures over an experience window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperienceSummary {
    pub total: usize,
    pub succeeded: usize,
    pub explorations: usize,
    pub explorations_succeeded: usize,
    pub total_cost: f64,
    pub total_duration_ms: u64,
}

impl ExperienceSummary {
    pub fn from_experiences(experiences: &[Experience]) -> Self {
        experiences.iter().fold(Self::default(), |mut s, e| {
            s.total += 1;
            s.succeeded += e.success as usize;
            if e.was_exploration {
                s.explorations += 1;
                s.explorations_succeeded += e.success as usize;
            }
            s.total_cost += e.cost;
            s.total_duration_ms += e.duration_ms;
            s
        })
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }

    pub fn avg_duration_ms(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("data");

        init(&dir).await.unwrap();
        assert!(dir.join(REGISTRY_FILE).exists());
        assert!(dir.join(CONFIG_FILE).exists());

        let mut registry = registry_store(&dir).load();
        registry.seed_capability("email-triage", "", Vec::new());
        registry_store(&dir).save(&registry).unwrap();

        init(&dir).await.unwrap();
        assert!(registry_store(&dir).load().capabilities.contains_key("email-triage"));
    }

    #[tokio::test]
    async fn test_reports_on_uninitialized_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("missing");
        show_status(&dir).await.unwrap();
        show_stats(&dir).await.unwrap();
        show_recent(&dir, 5, false).await.unwrap();
    }

    #[test]
    fn test_experience_summary() {
        let make = |success: bool, explore: bool| Experience {
            cycle: 1,
            timestamp: Utc::now(),
            success,
            cost: 0.25,
            duration_ms: 1000,
            tokens_in: 0,
            tokens_out: 0,
            output_summary: String::new(),
            was_exploration: explore,
            error: None,
            model: None,
        };
        let summary = ExperienceSummary::from_experiences(&[
            make(true, false),
            make(false, true),
            make(true, true),
            make(true, false),
        ]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.explorations, 2);
        assert_eq!(summary.explorations_succeeded, 1);
        assert_eq!(summary.success_rate(), 0.75);
        assert_eq!(summary.total_cost, 1.0);
        assert_eq!(summary.avg_duration_ms(), 1000.0);
        assert_eq!(ExperienceSummary::default().success_rate(), 0.0);
    }
}
