//! Periodic consolidation - reconciling experiences into the registry
//!
//! Every `interval` cycles the last few experiences and the current
//! registry are handed to a consolidation oracle (an LLM in production).
//! Its answer is a structured patch: capabilities to add or amend,
//! anti-patterns to record, and confidence overrides with a reason.
//!
//! Consolidation is best-effort. If the oracle times out, fails, or says
//! something unparsable, the registry comes back exactly as it went in.
//! Omitting a capability from the patch never removes it; only pruning
//! removes capabilities, and only stale low-confidence ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{OracleError, OracleResult};
use crate::storage::{AntiPattern, Capability, Experience, Registry};

/// Consolidation cadence and pruning thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Consolidate on every cycle divisible by this
    pub interval: u64,
    /// Experiences handed to the oracle
    pub experience_window: usize,
    /// Cycles without use before a capability may be pruned
    pub prune_after_cycles: u64,
    /// Capabilities at or above this confidence are never pruned
    pub prune_confidence_floor: f64,
    /// Minimum confidence before a procedure is stored
    pub procedure_threshold: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            interval: 10,
            experience_window: 10,
            prune_after_cycles: 50,
            prune_confidence_floor: 0.3,
            procedure_threshold: 0.8,
        }
    }
}

/// Everything the oracle gets to see
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationRequest {
    pub cycle: u64,
    pub experiences: Vec<Experience>,
    pub capabilities: BTreeMap<String, Capability>,
    pub anti_patterns: BTreeMap<String, AntiPattern>,
}

impl ConsolidationRequest {
    pub fn new(cycle: u64, registry: &Registry, experiences: &[Experience]) -> Self {
        Self {
            cycle,
            experiences: experiences.to_vec(),
            capabilities: registry.capabilities.clone(),
            anti_patterns: registry.anti_patterns.clone(),
        }
    }

    /// Instruction text for an LLM oracle
    pub fn prompt(&self) -> String {
        format!(
            "You are the learning subsystem of an autonomous agent. \
             Review these {} recent cycle experiences and update the capability registry.\n\n\
             ## Experiences\n{}\n\n\
             ## Current Capabilities\n{}\n\n\
             ## Current Anti-Patterns\n{}\n\n\
             Output ONLY valid JSON with these fields:\n\
             {{\"new_capabilities\": [{{\"id\":\"...\",\"description\":\"...\",\"tags\":[...],\"notes\":\"...\"}}], \
             \"updated_capabilities\": [{{\"id\":\"...\",\"notes\":\"...\",\"procedure\":[\"step\", ...]}}], \
             \"new_anti_patterns\": [{{\"id\":\"...\",\"description\":\"...\",\"mitigation\":\"...\"}}], \
             \"confidence_adjustments\": [{{\"id\":\"...\",\"new_confidence\":0.8,\"reason\":\"...\"}}], \
             \"insights\": \"one sentence summary\"}}",
            self.experiences.len(),
            pretty(&self.experiences),
            pretty(&self.capabilities),
            pretty(&self.anti_patterns),
        )
    }
}

fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// A reasoning service that turns a request into a patch document
#[async_trait]
pub trait ConsolidationOracle: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Raw text answer; the consolidator parses it
    async fn consult(&self, request: &ConsolidationRequest) -> OracleResult<String>;
}

/// A capability the oracle wants created
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCapability {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

/// Procedure steps, accepted as a list or as a newline-separated string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProcedureField {
    Steps(Vec<String>),
    Text(String),
}

impl ProcedureField {
    pub fn into_steps(self) -> Vec<String> {
        let steps = match self {
            ProcedureField::Steps(steps) => steps,
            ProcedureField::Text(text) => text.lines().map(str::to_string).collect(),
        };
        steps
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Partial update for an existing capability
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityPatch {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub procedure: Option<ProcedureField>,
}

/// An anti-pattern the oracle detected
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAntiPattern {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mitigation: String,
}

/// Explicit confidence override with its justification
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfidenceAdjustment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub new_confidence: Option<f64>,
    #[serde(default)]
    pub reason: String,
}

/// The structured answer of a consolidation oracle
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsolidationPatch {
    #[serde(default)]
    pub new_capabilities: Vec<NewCapability>,
    #[serde(default)]
    pub updated_capabilities: Vec<CapabilityPatch>,
    #[serde(default)]
    pub new_anti_patterns: Vec<NewAntiPattern>,
    #[serde(default)]
    pub confidence_adjustments: Vec<ConfidenceAdjustment>,
    #[serde(default)]
    pub insights: Option<String>,
}

impl ConsolidationPatch {
    /// Parse the JSON object embedded in an oracle's free-text answer.
    ///
    /// Takes everything from the first `{` to the last `}`, which tolerates
    /// prose or code fences around the document.
    pub fn parse(text: &str) -> OracleResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(OracleError::Empty);
        }

        let start = text.find('{');
        let end = text.rfind('}');
        let body = match (start, end) {
            (Some(s), Some(e)) if e > s => &text[s..=e],
            _ => return Err(OracleError::Malformed("no JSON object in response".into())),
        };

        serde_json::from_str(body).map_err(|e| OracleError::Malformed(e.to_string()))
    }
}

/// A confidence override as applied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedOverride {
    pub id: String,
    pub from: f64,
    pub to: f64,
    pub reason: String,
}

/// What a consolidation run changed
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    pub capabilities_added: Vec<String>,
    pub capabilities_updated: Vec<String>,
    pub anti_patterns_added: Vec<String>,
    pub anti_patterns_reobserved: Vec<String>,
    pub confidence_overrides: Vec<AppliedOverride>,
    /// Patch entries ignored for empty or unknown ids or invalid values
    pub skipped: usize,
    pub insights: Option<String>,
    /// Set when the oracle call or parse failed and nothing was applied
    pub failure: Option<String>,
}

impl ConsolidationReport {
    pub fn changed(&self) -> bool {
        !(self.capabilities_added.is_empty()
            && self.capabilities_updated.is_empty()
            && self.anti_patterns_added.is_empty()
            && self.anti_patterns_reobserved.is_empty()
            && self.confidence_overrides.is_empty())
    }
}

/// Registry after consolidation, plus what happened
#[derive(Debug, Clone)]
pub struct ConsolidationOutcome {
    pub registry: Registry,
    pub report: ConsolidationReport,
}

/// Applies oracle patches and prunes stale capabilities
#[derive(Debug, Clone, Default)]
pub struct Consolidator {
    config: ConsolidationConfig,
}

impl Consolidator {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Whether `cycle` is a consolidation cycle
    pub fn is_due(&self, cycle: u64) -> bool {
        self.config.interval > 0 && cycle > 0 && cycle % self.config.interval == 0
    }

    /// Ask the oracle about `recent` and apply its patch to a copy of
    /// `registry`. Never fails: any oracle problem yields the input
    /// registry unchanged.
    pub async fn consolidate(
        &self,
        registry: &Registry,
        recent: &[Experience],
        cycle: u64,
        oracle: &dyn ConsolidationOracle,
    ) -> ConsolidationOutcome {
        let window_start = recent.len().saturating_sub(self.config.experience_window);
        let window = &recent[window_start..];

        if window.is_empty() {
            debug!("No experiences to consolidate at cycle {}", cycle);
            return ConsolidationOutcome {
                registry: registry.clone(),
                report: ConsolidationReport::default(),
            };
        }

        info!(
            "Consolidating {} experiences at cycle {} via {}",
            window.len(),
            cycle,
            oracle.name()
        );

        let request = ConsolidationRequest::new(cycle, registry, window);
        let patch = match oracle.consult(&request).await.and_then(|text| ConsolidationPatch::parse(&text)) {
            Ok(patch) => patch,
            Err(e) => {
                warn!("Consolidation at cycle {} skipped: {}", cycle, e);
                return ConsolidationOutcome {
                    registry: registry.clone(),
                    report: ConsolidationReport {
                        failure: Some(e.to_string()),
                        ..Default::default()
                    },
                };
            }
        };

        let mut updated = registry.clone();
        let report = self.apply_patch(&mut updated, patch, cycle, Utc::now());

        info!(
            "Consolidation complete: {} new capabilities, {} updated, {} new anti-patterns, {} overrides, {} skipped",
            report.capabilities_added.len(),
            report.capabilities_updated.len(),
            report.anti_patterns_added.len(),
            report.confidence_overrides.len(),
            report.skipped
        );
        if let Some(insights) = &report.insights {
            info!("Consolidation insight: {}", insights);
        }

        ConsolidationOutcome {
            registry: updated,
            report,
        }
    }

    /// Apply a parsed patch in place
    pub fn apply_patch(
        &self,
        registry: &mut Registry,
        patch: ConsolidationPatch,
        cycle: u64,
        now: DateTime<Utc>,
    ) -> ConsolidationReport {
        let mut report = ConsolidationReport {
            insights: patch.insights.filter(|s| !s.trim().is_empty()),
            ..Default::default()
        };

        for new in patch.new_capabilities {
            let id = new.id.trim().to_string();
            if id.is_empty() {
                warn!("Ignoring new capability without an id (cycle {})", cycle);
                report.skipped += 1;
                continue;
            }
            if registry.capabilities.contains_key(&id) {
                debug!("Capability '{}' already known, not re-adding", id);
                continue;
            }
            let mut cap = Capability::new(new.description, new.tags, now);
            cap.notes = new.notes;
            cap.last_used_cycle = cycle;
            registry.capabilities.insert(id.clone(), cap);
            info!("Learned capability '{}' at cycle {}", id, cycle);
            report.capabilities_added.push(id);
        }

        for adj in patch.confidence_adjustments {
            let id = adj.id.trim();
            let Some(cap) = registry.capabilities.get_mut(id) else {
                warn!("Ignoring confidence override for unknown capability '{}' (cycle {})", id, cycle);
                report.skipped += 1;
                continue;
            };
            let Some(value) = adj.new_confidence.filter(|v| v.is_finite()) else {
                warn!("Ignoring confidence override for '{}' without a valid value", id);
                report.skipped += 1;
                continue;
            };
            let to = value.clamp(0.0, 1.0);
            info!(
                "Confidence override for '{}': {:.2} -> {:.2} ({})",
                id,
                cap.confidence,
                to,
                if adj.reason.is_empty() { "no reason given" } else { adj.reason.as_str() }
            );
            report.confidence_overrides.push(AppliedOverride {
                id: id.to_string(),
                from: cap.confidence,
                to,
                reason: adj.reason,
            });
            cap.confidence = to;
        }

        for upd in patch.updated_capabilities {
            let id = upd.id.trim();
            let Some(cap) = registry.capabilities.get_mut(id) else {
                warn!("Ignoring update for unknown capability '{}' (cycle {})", id, cycle);
                report.skipped += 1;
                continue;
            };

            let mut touched = false;
            if let Some(description) = upd.description {
                cap.description = description;
                touched = true;
            }
            if let Some(tags) = upd.tags {
                cap.tags = tags.into_iter().map(|t| t.to_lowercase()).collect();
                touched = true;
            }
            if let Some(notes) = upd.notes {
                cap.notes = notes;
                touched = true;
            }
            if let Some(procedure) = upd.procedure {
                if cap.confidence >= self.config.procedure_threshold {
                    let steps = procedure.into_steps();
                    cap.procedure = if steps.is_empty() { None } else { Some(steps) };
                    touched = true;
                } else {
                    warn!(
                        "Dropping procedure for '{}': confidence {:.2} below {:.2}",
                        id, cap.confidence, self.config.procedure_threshold
                    );
                }
            }

            if touched {
                report.capabilities_updated.push(id.to_string());
            }
        }

        for new in patch.new_anti_patterns {
            let id = new.id.trim().to_string();
            if id.is_empty() {
                warn!("Ignoring anti-pattern without an id (cycle {})", cycle);
                report.skipped += 1;
                continue;
            }
            match registry.anti_patterns.get_mut(&id) {
                Some(existing) => {
                    existing.times_observed += 1;
                    debug!("Anti-pattern '{}' observed again ({}x)", id, existing.times_observed);
                    report.anti_patterns_reobserved.push(id);
                }
                None => {
                    registry.anti_patterns.insert(
                        id.clone(),
                        AntiPattern {
                            description: new.description,
                            mitigation: new.mitigation,
                            times_observed: 1,
                            first_observed: now,
                        },
                    );
                    info!("Recorded anti-pattern '{}' at cycle {}", id, cycle);
                    report.anti_patterns_added.push(id);
                }
            }
        }

        report
    }

    /// Ids of capabilities that are stale and below the confidence floor
    pub fn prune_candidates(&self, registry: &Registry, current_cycle: u64) -> Vec<String> {
        registry
            .capabilities
            .iter()
            .filter(|(_, cap)| {
                current_cycle.saturating_sub(cap.last_used_cycle) > self.config.prune_after_cycles
                    && cap.confidence < self.config.prune_confidence_floor
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove stale low-confidence capabilities, logging each removal
    pub fn prune(&self, registry: &mut Registry, current_cycle: u64) -> Vec<String> {
        let removed = self.prune_candidates(registry, current_cycle);
        for id in &removed {
            if let Some(cap) = registry.capabilities.remove(id) {
                info!(
                    "Pruned capability '{}': confidence {:.2}, last used at cycle {} ({} cycles ago)",
                    id,
                    cap.confidence,
                    cap.last_used_cycle,
                    current_cycle.saturating_sub(cap.last_used_cycle)
                );
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Oracle returning a canned answer
    struct CannedOracle(OracleResult<String>);

    #[async_trait]
    impl ConsolidationOracle for CannedOracle {
        fn name(&self) -> &str {
            "canned"
        }

        async fn consult(&self, _request: &ConsolidationRequest) -> OracleResult<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(OracleError::Timeout(s)) => Err(OracleError::Timeout(*s)),
                Err(e) => Err(OracleError::Failed(e.to_string())),
            }
        }
    }

    fn experience(cycle: u64, success: bool) -> Experience {
        Experience {
            cycle,
            timestamp: Utc::now(),
            success,
            cost: 0.02,
            duration_ms: 900,
            tokens_in: 100,
            tokens_out: 50,
            output_summary: "sent the weekly report".into(),
            was_exploration: false,
            error: None,
            model: Some("opus".into()),
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::default();
        registry.seed_capability("git-commit-and-push", "Commit work", vec!["git".into()]);
        registry.seed_capability("email-triage", "Sort the inbox", vec!["gmail".into()]);
        registry
    }

    fn history() -> Vec<Experience> {
        (1..=10).map(|c| experience(c, c % 4 != 0)).collect()
    }

    #[test]
    fn test_is_due() {
        let c = Consolidator::default();
        assert!(!c.is_due(0));
        assert!(!c.is_due(9));
        assert!(c.is_due(10));
        assert!(c.is_due(20));
        assert!(!Consolidator::new(ConsolidationConfig { interval: 0, ..Default::default() }).is_due(10));
    }

    #[test]
    fn test_parse_tolerates_surrounding_text() {
        let text = "Here you go:\n```json\n{\"new_capabilities\": [{\"id\": \"send-report\"}], \"insights\": \"ok\"}\n```";
        let patch = ConsolidationPatch::parse(text).unwrap();
        assert_eq!(patch.new_capabilities.len(), 1);
        assert_eq!(patch.insights.as_deref(), Some("ok"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(ConsolidationPatch::parse(""), Err(OracleError::Empty)));
        assert!(matches!(ConsolidationPatch::parse("no json here"), Err(OracleError::Malformed(_))));
        assert!(matches!(ConsolidationPatch::parse("} backwards {"), Err(OracleError::Malformed(_))));
        assert!(matches!(
            ConsolidationPatch::parse("{\"new_capabilities\": \"oops\"}"),
            Err(OracleError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_oracle_failures_leave_registry_unchanged() {
        let consolidator = Consolidator::default();
        let input = registry();
        let oracles = vec![
            CannedOracle(Err(OracleError::Timeout(60))),
            CannedOracle(Err(OracleError::Failed("exit 1".into()))),
            CannedOracle(Ok(String::new())),
            CannedOracle(Ok("I could not find any patterns.".into())),
            CannedOracle(Ok("{\"new_capabilities\": [{\"id\": 5}]".into())),
        ];

        for oracle in &oracles {
            let outcome = consolidator.consolidate(&input, &history(), 10, oracle).await;
            assert_eq!(outcome.registry, input);
            assert!(outcome.report.failure.is_some());
            assert!(!outcome.report.changed());
        }
    }

    #[tokio::test]
    async fn test_no_experiences_skips_oracle() {
        let consolidator = Consolidator::default();
        let input = registry();
        let oracle = CannedOracle(Ok("{\"new_capabilities\": [{\"id\": \"x-y-z\"}]}".into()));
        let outcome = consolidator.consolidate(&input, &[], 10, &oracle).await;
        assert_eq!(outcome.registry, input);
        assert!(outcome.report.failure.is_none());
    }

    #[tokio::test]
    async fn test_full_patch_applies() {
        let consolidator = Consolidator::default();
        let input = registry();
        let answer = serde_json::json!({
            "new_capabilities": [
                {"id": "send-weekly-report", "description": "Email the weekly status", "tags": ["Report", "email"], "notes": "use the template"},
                {"id": "", "description": "nameless"},
                {"id": "git-commit-and-push", "description": "duplicate"}
            ],
            "updated_capabilities": [
                {"id": "email-triage", "notes": "archive newsletters", "procedure": ["open inbox", "archive"]},
                {"id": "git-commit-and-push", "description": "Commit and push", "procedure": "git add\ngit commit\ngit push"},
                {"id": "unknown-cap", "notes": "lost"}
            ],
            "new_anti_patterns": [
                {"id": "force-push", "description": "Force pushing main", "mitigation": "use branches"},
                {"id": "  ", "description": "blank"}
            ],
            "confidence_adjustments": [
                {"id": "git-commit-and-push", "new_confidence": 0.9, "reason": "verified in git log"},
                {"id": "email-triage", "new_confidence": 7.0, "reason": "overeager"},
                {"id": "unknown-cap", "new_confidence": 0.1, "reason": "n/a"},
                {"id": "email-triage", "reason": "missing value"}
            ],
            "insights": "Reports are reliable"
        });
        let oracle = CannedOracle(Ok(format!("```json\n{}\n```", answer)));

        let outcome = consolidator.consolidate(&input, &history(), 10, &oracle).await;
        let reg = &outcome.registry;
        let report = &outcome.report;

        assert_eq!(report.capabilities_added, vec!["send-weekly-report"]);
        let added = &reg.capabilities["send-weekly-report"];
        assert_eq!(added.confidence, 0.5);
        assert_eq!(added.times_used, 0);
        assert_eq!(added.last_used_cycle, 10);
        assert!(added.tags.contains("report"));
        assert_eq!(added.notes, "use the template");

        // Existing capability not overwritten by a duplicate "new" entry
        assert_eq!(reg.capabilities["git-commit-and-push"].description, "Commit and push");

        let git = &reg.capabilities["git-commit-and-push"];
        assert_eq!(git.confidence, 0.9);
        assert_eq!(
            git.procedure.as_deref(),
            Some(&["git add".to_string(), "git commit".to_string(), "git push".to_string()][..])
        );

        // Clamped override to 1.0 makes the procedure acceptable as well
        let triage = &reg.capabilities["email-triage"];
        assert_eq!(triage.confidence, 1.0);
        assert_eq!(triage.notes, "archive newsletters");
        assert!(triage.procedure.is_some());

        assert_eq!(report.anti_patterns_added, vec!["force-push"]);
        assert_eq!(reg.anti_patterns["force-push"].times_observed, 1);

        assert_eq!(report.confidence_overrides.len(), 2);
        assert_eq!(report.confidence_overrides[0].from, 0.5);
        assert_eq!(report.confidence_overrides[0].reason, "verified in git log");
        // nameless capability, blank anti-pattern, unknown update,
        // unknown override, override without value
        assert_eq!(report.skipped, 5);
        assert_eq!(report.insights.as_deref(), Some("Reports are reliable"));
        assert!(report.changed());
    }

    #[test]
    fn test_procedure_requires_high_confidence() {
        let consolidator = Consolidator::default();
        let mut reg = registry();
        let patch = ConsolidationPatch {
            updated_capabilities: vec![CapabilityPatch {
                id: "email-triage".into(),
                procedure: Some(ProcedureField::Steps(vec!["step".into()])),
                ..Default::default()
            }],
            ..Default::default()
        };

        let report = consolidator.apply_patch(&mut reg, patch, 10, Utc::now());
        assert!(reg.capabilities["email-triage"].procedure.is_none());
        assert!(report.capabilities_updated.is_empty());
    }

    #[test]
    fn test_omitted_capabilities_survive() {
        let consolidator = Consolidator::default();
        let mut reg = registry();
        let before = reg.clone();
        let report = consolidator.apply_patch(&mut reg, ConsolidationPatch::default(), 10, Utc::now());
        assert_eq!(reg, before);
        assert!(!report.changed());
    }

    #[test]
    fn test_reobserved_anti_pattern_counts_up() {
        let consolidator = Consolidator::default();
        let mut reg = registry();
        let patch = || ConsolidationPatch {
            new_anti_patterns: vec![NewAntiPattern {
                id: "skip-tests".into(),
                description: "Merging without tests".into(),
                mitigation: "run selftest".into(),
            }],
            ..Default::default()
        };

        consolidator.apply_patch(&mut reg, patch(), 10, Utc::now());
        let first_seen = reg.anti_patterns["skip-tests"].first_observed;
        let report = consolidator.apply_patch(&mut reg, patch(), 20, Utc::now());

        assert_eq!(report.anti_patterns_reobserved, vec!["skip-tests"]);
        assert_eq!(reg.anti_patterns["skip-tests"].times_observed, 2);
        assert_eq!(reg.anti_patterns["skip-tests"].first_observed, first_seen);
    }

    #[test]
    fn test_prune_needs_staleness_and_low_confidence() {
        let consolidator = Consolidator::default();
        let mut reg = Registry::default();
        for id in ["stale-weak", "stale-strong", "fresh-weak"] {
            reg.seed_capability(id, "", Vec::new());
        }
        reg.capabilities.get_mut("stale-weak").unwrap().confidence = 0.2;
        reg.capabilities.get_mut("stale-strong").unwrap().confidence = 0.6;
        let fresh = reg.capabilities.get_mut("fresh-weak").unwrap();
        fresh.confidence = 0.1;
        fresh.last_used_cycle = 40;

        reg.anti_patterns.insert(
            "old-mistake".into(),
            AntiPattern {
                description: String::new(),
                mitigation: String::new(),
                times_observed: 1,
                first_observed: Utc::now(),
            },
        );

        assert_eq!(consolidator.prune_candidates(&reg, 60), vec!["stale-weak"]);
        let removed = consolidator.prune(&mut reg, 60);
        assert_eq!(removed, vec!["stale-weak"]);
        assert!(reg.capabilities.contains_key("stale-strong"));
        assert!(reg.capabilities.contains_key("fresh-weak"));
        assert!(reg.anti_patterns.contains_key("old-mistake"));

        // Exactly at the threshold is not yet stale
        assert!(consolidator.prune_candidates(&reg, 90).is_empty());
        assert_eq!(consolidator.prune_candidates(&reg, 91), vec!["fresh-weak"]);
    }

    #[test]
    fn test_prompt_mentions_context() {
        let reg = registry();
        let request = ConsolidationRequest::new(10, &reg, &history());
        let prompt = request.prompt();
        assert!(prompt.contains("## Experiences"));
        assert!(prompt.contains("email-triage"));
        assert!(prompt.contains("confidence_adjustments"));
        assert!(prompt.contains("10 recent cycle experiences"));
    }
}
