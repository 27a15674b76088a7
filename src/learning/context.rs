//! Decision context handed to the work executor
//!
//! A typed snapshot of what the agent knows going into a cycle: the most
//! confident relevant capabilities, known pitfalls, and on exploration
//! cycles the latest experiments. `render()` turns it into the markdown
//! block that prefixes the work prompt.

use serde::Serialize;

use super::relevance::{get_relevant, Task};
use crate::storage::registry::rank;
use crate::storage::{Experiment, Registry};

/// Capabilities listed in a context
pub const MAX_CONTEXT_CAPABILITIES: usize = 15;

/// Experiments listed on exploration cycles
pub const MAX_CONTEXT_EXPERIMENTS: usize = 5;

/// Characters of notes or mitigation shown per line
const LINE_EXCERPT: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilitySummary {
    pub id: String,
    pub confidence: f64,
    pub times_used: u64,
    /// Notes when present, otherwise the description
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedure: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AntiPatternSummary {
    pub id: String,
    /// Mitigation when present, otherwise the description
    pub advice: String,
    pub times_observed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionContext {
    pub cycle: u64,
    pub criticality: f64,
    pub explore: bool,
    pub exploration_rate: f64,
    pub capabilities: Vec<CapabilitySummary>,
    pub anti_patterns: Vec<AntiPatternSummary>,
    pub recent_experiments: Vec<Experiment>,
    /// No task matched a capability so the listing is unfiltered
    pub unfiltered: bool,
    pub has_tasks: bool,
}

fn excerpt(text: &str) -> String {
    text.chars().take(LINE_EXCERPT).collect()
}

impl DecisionContext {
    /// Build the context for a cycle whose policy decision is known
    pub fn build(
        registry: &Registry,
        tasks: &[Task],
        cycle: u64,
        criticality: f64,
        explore: bool,
    ) -> Self {
        let view = get_relevant(registry, tasks);

        let ranked = rank(view.capabilities.iter().map(|(id, cap)| (*id, *cap)));

        let capabilities = ranked
            .into_iter()
            .take(MAX_CONTEXT_CAPABILITIES)
            .map(|(id, cap)| CapabilitySummary {
                id: id.to_string(),
                confidence: cap.confidence,
                times_used: cap.times_used,
                summary: excerpt(if cap.notes.is_empty() { &cap.description } else { &cap.notes }),
                procedure: cap.procedure.clone(),
            })
            .collect();

        let anti_patterns = view
            .anti_patterns
            .iter()
            .map(|(id, ap)| AntiPatternSummary {
                id: id.to_string(),
                advice: excerpt(if ap.mitigation.is_empty() { &ap.description } else { &ap.mitigation }),
                times_observed: ap.times_observed,
            })
            .collect();

        let recent_experiments = if explore {
            let all = &registry.exploration_log.recent_experiments;
            all[all.len().saturating_sub(MAX_CONTEXT_EXPERIMENTS)..].to_vec()
        } else {
            Vec::new()
        };

        Self {
            cycle,
            criticality,
            explore,
            exploration_rate: registry.exploration_log.exploration_rate,
            capabilities,
            anti_patterns,
            recent_experiments,
            unfiltered: view.fallback,
            has_tasks: !tasks.is_empty(),
        }
    }

    /// Markdown sections for the work prompt
    pub fn render(&self) -> String {
        let mut sections = Vec::new();

        if !self.capabilities.is_empty() {
            let mut lines = vec!["## Known Capabilities".to_string(), String::new()];
            for cap in &self.capabilities {
                lines.push(format!(
                    "- **{}** ({:.0}%, {}x): {}",
                    cap.id,
                    cap.confidence * 100.0,
                    cap.times_used,
                    cap.summary
                ));
                if let Some(steps) = &cap.procedure {
                    for (i, step) in steps.iter().enumerate() {
                        lines.push(format!("  {}. {}", i + 1, step));
                    }
                }
            }
            sections.push(lines.join("\n"));
        }

        if !self.anti_patterns.is_empty() {
            let mut lines = vec!["## Anti-Patterns (avoid)".to_string(), String::new()];
            for ap in &self.anti_patterns {
                lines.push(format!("- **{}**: {}", ap.id, ap.advice));
            }
            sections.push(lines.join("\n"));
        }

        if self.explore {
            let mut lines = vec![
                "## Exploration Cycle".to_string(),
                String::new(),
                "Pick ONE thing the system cannot do but should.".to_string(),
                "Try a small, reversible experiment.".to_string(),
                "Record what worked, what didn't, and what capability was gained.".to_string(),
            ];
            if !self.recent_experiments.is_empty() {
                lines.push(String::new());
                lines.push("Recent experiments:".to_string());
                for e in &self.recent_experiments {
                    lines.push(format!("- Cycle {}: \"{}\" -> {}", e.cycle, e.hypothesis, e.result));
                }
            }
            sections.push(lines.join("\n"));
        }

        let mut instruction = if self.has_tasks {
            "Pick the highest-value actionable task.".to_string()
        } else {
            "No pending tasks.".to_string()
        };
        if !self.explore && !self.capabilities.is_empty() {
            instruction.push_str(" Prefer tasks matching high-confidence capabilities.");
        }

        sections.push(format!(
            "## Situation\n\n\
             Cycle: {}\n\
             Criticality: {:.2} (0.0=chaos, stabilize; 0.5=viable, ship; 1.0=stagnant, explore)\n\
             Exploration rate: {:.2}\n\n\
             {}",
            self.cycle, self.criticality, self.exploration_rate, instruction
        ));

        sections.join("\n\n")
    }
}
