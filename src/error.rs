//! Error types for configuration loading and chunk solving.
//!
//! Neither escapes a scheduling run: a failed chunk is logged and counted in
//! [`ScheduleOutcome::unscheduled`](crate::data::ScheduleOutcome::unscheduled).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Why one chunk of the windowed scheduler produced no batches.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk is infeasible within the scheduling horizon")]
    Infeasible,

    #[error("solver failed: {0}")]
    Solver(String),

    #[error("solver returned an unusable solution: {0}")]
    RejectedSolution(String),
}

impl From<good_lp::ResolutionError> for ChunkError {
    fn from(err: good_lp::ResolutionError) -> Self {
        match err {
            good_lp::ResolutionError::Infeasible => ChunkError::Infeasible,
            other => ChunkError::Solver(other.to_string()),
        }
    }
}
