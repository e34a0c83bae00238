//! Error types for afinar
//!
//! Trial-level failures are isolated and recorded; run-level and
//! configuration failures surface through this enum.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Afinar error types
#[derive(Error, Debug)]
pub enum Error {
    /// Operation on a run id the ledger has never issued
    #[error("unknown run id: {0}")]
    UnknownRun(String),

    /// `end_run` called on a run that was already finalized
    #[error("run {0} is already finalized; end_run may be called exactly once")]
    AlreadyFinalized(String),

    /// Every candidate in a search failed
    #[error("no successful trial out of {attempted} attempted; cannot select a best configuration")]
    NoSuccessfulTrial {
        /// Number of candidates evaluated before giving up
        attempted: usize,
    },

    /// A pipeline stage raised; the pipeline run is finalized as failed
    #[error("stage '{stage}' failed: {source}")]
    StageExecution {
        /// Name of the failing stage
        stage: String,
        /// The original error raised by the stage function
        #[source]
        source: anyhow::Error,
    },

    /// Invalid or unrecognized configuration option
    #[error("configuration error: {0}")]
    Config(String),

    /// Ledger backend write failed after the single retry
    #[error("ledger backend error: {0}")]
    Backend(String),

    /// Record (de)serialization failed on the durable path
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
