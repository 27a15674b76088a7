//! Foreground learning - cheap per-cycle attribution
//!
//! Runs synchronously after every cycle. Attributes the experience to at
//! most one capability by keyword overlap with its output summary and
//! updates that capability's counters. No LLM involved: the match is
//! imprecise but free, and periodic consolidation corrects
//! misattributions.

use tracing::debug;

use super::keywords::{attribution_keywords, keyword_in, words};
use crate::storage::{Experience, Registry};

/// Attribute `experience` to the first matching capability and update it.
///
/// Capabilities are visited in id order and only the first match is
/// counted, so one cycle never moves two capabilities. Returns the id of
/// the capability that was updated, if any.
pub fn reflect(registry: &mut Registry, experience: &Experience) -> Option<String> {
    if experience.output_summary.trim().is_empty() {
        debug!("Cycle {} has no output summary, skipping attribution", experience.cycle);
        return None;
    }

    let tokens = words(&experience.output_summary);

    let matched = registry
        .capabilities
        .iter()
        .find(|(id, cap)| {
            attribution_keywords(id, cap)
                .iter()
                .any(|kw| keyword_in(kw, &tokens))
        })
        .map(|(id, _)| id.clone());

    let Some(id) = matched else {
        debug!(
            "Cycle {} matched no capability, deferring to consolidation",
            experience.cycle
        );
        return None;
    };

    if let Some(cap) = registry.capabilities.get_mut(&id) {
        cap.record_outcome(experience.success, experience.timestamp, experience.cycle);
        debug!(
            "Cycle {} attributed to '{}' (success={}, confidence={:.2}, uses={})",
            experience.cycle, id, experience.success, cap.confidence, cap.times_used
        );
    }

    Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn experience(cycle: u64, success: bool, summary: &str) -> Experience {
        Experience {
            cycle,
            timestamp: Utc::now(),
            success,
            cost: 0.0,
            duration_ms: 0,
            tokens_in: 0,
            tokens_out: 0,
            output_summary: summary.to_string(),
            was_exploration: false,
            error: None,
            model: None,
        }
    }

    fn registry_with(ids: &[(&str, &[&str])]) -> Registry {
        let mut registry = Registry::default();
        for (id, tags) in ids {
            registry.seed_capability(id, "", tags.iter().map(|t| t.to_string()));
        }
        registry
    }

    #[test]
    fn test_success_then_failure() {
        let mut registry = registry_with(&[("git-commit-and-push", &[])]);

        let hit = reflect(&mut registry, &experience(1, true, "shipped git commit feature"));
        assert_eq!(hit.as_deref(), Some("git-commit-and-push"));
        let cap = &registry.capabilities["git-commit-and-push"];
        assert_eq!((cap.times_used, cap.times_succeeded, cap.times_failed), (1, 1, 0));
        assert_eq!(cap.confidence, 0.67);
        assert_eq!(cap.last_used_cycle, 1);

        reflect(&mut registry, &experience(2, false, "git commit failed"));
        let cap = &registry.capabilities["git-commit-and-push"];
        assert_eq!((cap.times_used, cap.times_succeeded, cap.times_failed), (2, 1, 1));
        assert_eq!(cap.confidence, 0.5);
        assert_eq!(cap.last_used_cycle, 2);
    }

    #[test]
    fn test_only_first_match_counts() {
        let mut registry = registry_with(&[
            ("deploy-site", &["deploy"]),
            ("build-site", &["build"]),
        ]);

        let hit = reflect(&mut registry, &experience(1, true, "build and deploy the site"));
        // "build-site" sorts first and matches on "site"
        assert_eq!(hit.as_deref(), Some("build-site"));
        assert_eq!(registry.capabilities["build-site"].times_used, 1);
        assert_eq!(registry.capabilities["deploy-site"].times_used, 0);
    }

    #[test]
    fn test_short_keywords_do_not_match() {
        let mut registry = registry_with(&[("ci-up", &["ok"])]);
        assert!(reflect(&mut registry, &experience(1, true, "ci is up and ok")).is_none());
        assert_eq!(registry.capabilities["ci-up"].times_used, 0);
    }

    #[test]
    fn test_empty_summary_is_noop() {
        let mut registry = registry_with(&[("git-commit", &[])]);
        let before = registry.clone();
        assert!(reflect(&mut registry, &experience(1, true, "   ")).is_none());
        assert_eq!(registry, before);
    }

    #[test]
    fn test_no_match_leaves_registry_untouched() {
        let mut registry = registry_with(&[("email-triage", &["gmail"])]);
        let before = registry.clone();
        assert!(reflect(&mut registry, &experience(1, false, "rotated the logs")).is_none());
        assert_eq!(registry, before);
    }

    #[test]
    fn test_counter_invariant_holds_over_many_updates() {
        let mut registry = registry_with(&[
            ("git-commit", &["git"]),
            ("run-tests", &["pytest"]),
            ("send-report", &["email"]),
        ]);
        let summaries = ["git push done", "pytest green", "email sent", "nothing", "git broke"];
        for cycle in 0..60u64 {
            let summary = summaries[(cycle as usize) % summaries.len()];
            reflect(&mut registry, &experience(cycle, cycle % 3 != 0, summary));
        }

        for (id, cap) in &registry.capabilities {
            assert!(cap.counters_consistent(), "{} drifted", id);
            assert_eq!(
                cap.confidence,
                crate::learning::confidence(cap.times_succeeded, cap.times_failed)
            );
        }
        assert!(registry.capabilities["git-commit"].times_used > 0);
    }
}
