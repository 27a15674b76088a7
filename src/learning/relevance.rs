//! Relevance matching between pending tasks and known capabilities
//!
//! Narrows the registry down to the capabilities whose words overlap the
//! current task batch. When nothing overlaps the whole set is returned
//! instead, so the decision step is never left without capability
//! context.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::keywords::{capability_words, leading_words, words};
use crate::storage::{AntiPattern, Capability, Registry};

/// Words taken from the start of each task description
pub const DESCRIPTION_WORD_LIMIT: usize = 20;

/// A pending work item from the task source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Option<u8>,
}

/// Read-only, filtered view over a registry
#[derive(Debug, Clone)]
pub struct RelevantView<'a> {
    pub capabilities: BTreeMap<&'a str, &'a Capability>,
    pub anti_patterns: BTreeMap<&'a str, &'a AntiPattern>,
    /// True when no capability matched and the full set was returned
    pub fallback: bool,
}

impl RelevantView<'_> {
    pub fn capability_ids(&self) -> Vec<&str> {
        self.capabilities.keys().copied().collect()
    }
}

/// Word set for a batch of tasks: titles, tags and leading description words
pub fn task_words(tasks: &[Task]) -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    for task in tasks {
        set.extend(words(&task.title));
        set.extend(leading_words(&task.description, DESCRIPTION_WORD_LIMIT));
        for tag in &task.tags {
            set.extend(words(tag));
        }
    }
    set
}

/// Capabilities relevant to `tasks`, plus every anti-pattern
pub fn get_relevant<'a>(registry: &'a Registry, tasks: &[Task]) -> RelevantView<'a> {
    let anti_patterns = registry
        .anti_patterns
        .iter()
        .map(|(id, ap)| (id.as_str(), ap))
        .collect();

    let all = || -> BTreeMap<&'a str, &'a Capability> {
        registry
            .capabilities
            .iter()
            .map(|(id, cap)| (id.as_str(), cap))
            .collect()
    };

    let task_set = task_words(tasks);
    if task_set.is_empty() {
        return RelevantView {
            capabilities: all(),
            anti_patterns,
            fallback: true,
        };
    }

    let matched: BTreeMap<&str, &Capability> = registry
        .capabilities
        .iter()
        .filter(|(id, cap)| !capability_words(id, cap).is_disjoint(&task_set))
        .map(|(id, cap)| (id.as_str(), cap))
        .collect();

    if matched.is_empty() {
        debug!(
            "No capability matched {} tasks, returning all {}",
            tasks.len(),
            registry.capabilities.len()
        );
        return RelevantView {
            capabilities: all(),
            anti_patterns,
            fallback: true,
        };
    }

    debug!(
        "{} of {} capabilities relevant to {} tasks",
        matched.len(),
        registry.capabilities.len(),
        tasks.len()
    );

    RelevantView {
        capabilities: matched,
        anti_patterns,
        fallback: false,
    }
}
