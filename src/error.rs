//! Error taxonomy for the snapshot pipeline
//!
//! Every stage returns `SnapshotError`. Only transport and chunk execution
//! failures are eligible for retry; everything else aborts.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::registry::Network;

/// Pipeline stage an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Encode,
    Execute,
    Decode,
    Assemble,
    Price,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Encode => write!(f, "encode"),
            Stage::Execute => write!(f, "execute"),
            Stage::Decode => write!(f, "decode"),
            Stage::Assemble => write!(f, "assemble"),
            Stage::Price => write!(f, "price"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapshotError {
    /// Bad entity configuration, never retried
    #[error("invalid address `{address}` for {context}: {reason}")]
    InvalidAddress {
        address: String,
        context: String,
        reason: String,
    },

    #[error("unknown read operation `{0}`")]
    UnknownOperation(String),

    #[error("no aggregator contract configured for {0}")]
    UnsupportedNetwork(Network),

    #[error("invalid RPC endpoint `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// Endpoint unreachable or the request itself failed
    #[error(
        "transport failure{}: {message}",
        .chunk.map(|c| format!(" on chunk {c}")).unwrap_or_default()
    )]
    TransportFailure { chunk: Option<usize>, message: String },

    /// The aggregate call reverted or returned malformed data
    #[error("chunk {chunk} execution failed: {message}")]
    ChunkExecutionFailure { chunk: usize, message: String },

    #[error("missing return data for `{operation}`: {reason}")]
    MissingReturnData {
        operation: &'static str,
        reason: String,
    },

    /// A programming error in the pipeline itself
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("deadline of {0:?} elapsed before all chunks completed")]
    Timeout(Duration),

    #[error("pricing failed: {0}")]
    Pricing(String),

    #[error("{stage} stage failed for {pools:?}: {source}")]
    Attributed {
        stage: Stage,
        pools: Vec<String>,
        #[source]
        source: Box<SnapshotError>,
    },
}

impl SnapshotError {
    /// Whether resubmitting the same chunk wholesale may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SnapshotError::TransportFailure { .. } | SnapshotError::ChunkExecutionFailure { .. }
        )
    }

    /// Attach the stage and the affected pools to an error
    pub fn attributed(self, stage: Stage, pools: Vec<String>) -> Self {
        SnapshotError::Attributed {
            stage,
            pools,
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping attribution layers
    pub fn root(&self) -> &SnapshotError {
        match self {
            SnapshotError::Attributed { source, .. } => source.root(),
            other => other,
        }
    }
}
