//! Learning module for vsm-learn
//!
//! Handles foreground reflection (attributing each experience to a
//! capability), the explore/exploit policy, and periodic consolidation
//! through an oracle.

pub mod confidence;
pub mod consolidation;
pub mod context;
pub mod criticality;
pub mod foreground;
pub mod keywords;
pub mod oracle;
pub mod policy;
pub mod relevance;

pub use confidence::{confidence, round2};
pub use consolidation::{
    ConsolidationConfig, ConsolidationOracle, ConsolidationOutcome, ConsolidationPatch,
    ConsolidationReport, ConsolidationRequest, Consolidator,
};
pub use context::DecisionContext;
pub use criticality::SystemSignals;
pub use foreground::reflect;
pub use oracle::{CommandOracle, DisabledOracle, OracleConfig};
pub use policy::{DecisionReason, ExplorationPolicy, PolicyConfig, PolicyDecision, SystemState};
pub use relevance::{get_relevant, RelevantView, Task};
