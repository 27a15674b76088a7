//! vsm-learn - capability learning for an autonomous agent loop
//!
//! Tracks which repeatable abilities the agent has demonstrated, how
//! reliable each one is, and when to spend a cycle exploring instead of
//! exploiting what already works.

pub mod config;
pub mod cycle;
pub mod error;
pub mod learning;
pub mod storage;

pub use config::{load_config, Config};
pub use cycle::{CyclePlan, CycleReport, LearningLoop};
pub use error::{OracleError, OracleResult};
pub use storage::get_data_dir;
