//! Error types for the consolidation oracle seam
//!
//! Everything else in the crate reports through `anyhow`. Oracle failures
//! get their own type because the consolidator must tell them apart from
//! storage errors: an oracle failure is swallowed, a storage error is not.

use thiserror::Error;

/// Why a consolidation oracle produced no usable answer
#[derive(Debug, Error)]
pub enum OracleError {
    /// The oracle did not answer in time
    #[error("oracle timed out after {0}s")]
    Timeout(u64),

    /// The oracle process could not be started
    #[error("failed to start oracle: {0}")]
    Spawn(String),

    /// The oracle ran but reported failure
    #[error("oracle failed: {0}")]
    Failed(String),

    /// The oracle answered with nothing
    #[error("oracle returned an empty response")]
    Empty,

    /// The oracle's answer could not be parsed into a patch
    #[error("malformed oracle response: {0}")]
    Malformed(String),

    /// IO while talking to the oracle
    #[error("oracle IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for oracle calls
pub type OracleResult<T> = std::result::Result<T, OracleError>;
