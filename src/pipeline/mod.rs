//! Snapshot pipeline
//!
//! pools -> encoder (5 calls per pool) -> chunked executor -> decoder ->
//! reassembler. Positions are the only correlation key between stages, so
//! every stage preserves order and the length invariant is checked before
//! anything is decoded.

pub mod abi;
pub mod decoder;
pub mod encoder;
pub mod executor;
pub mod reassembler;
pub mod schema;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use decoder::{decode, DecodedField, FeeBundle, FEE_DENOMINATOR};
pub use encoder::{encode, encode_operation, encode_pool, encode_pools, CallDescriptor};
pub use executor::{AggregatorTable, BatchOptions, BatchOutcome, ChunkedBatchExecutor, RawResult};
pub use reassembler::{assemble, assemble_pool, PoolSnapshot};
pub use schema::{FIELDS_PER_POOL, SCHEMA_VERSION};
pub use transport::{AggregateTransport, RpcTransport};

use alloy_eips::BlockId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{SnapshotError, Stage};
use crate::registry::{Network, PoolEntry};

// ============================================
// FAILURE POLICY
// ============================================

/// What a failed chunk or an undecodable pool does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Fail the whole run, naming the stage and the affected pools
    #[default]
    Abort,
    /// Report affected pools as failed and keep the rest
    Isolate,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "isolate" => Ok(FailurePolicy::Isolate),
            other => Err(format!("unknown failure policy `{other}` (expected abort or isolate)")),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Isolate => write!(f, "isolate"),
        }
    }
}

// ============================================
// REPORT
// ============================================

#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub pool: String,
    #[serde(serialize_with = "serialize_outcome")]
    pub outcome: Result<PoolSnapshot, SnapshotError>,
}

fn serialize_outcome<S: Serializer>(
    outcome: &Result<PoolSnapshot, SnapshotError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    #[serde(rename_all = "lowercase")]
    enum Outcome<'a> {
        Snapshot(&'a PoolSnapshot),
        Error(String),
    }

    match outcome {
        Ok(snapshot) => Outcome::Snapshot(snapshot).serialize(serializer),
        Err(e) => Outcome::Error(e.to_string()).serialize(serializer),
    }
}

/// Everything one run produced, in registry order
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    pub schema_version: u32,
    pub network: Network,
    /// Block every chunk was pinned to, if any
    pub block: Option<u64>,
    pub fetched_at: DateTime<Utc>,
    pub chunks: usize,
    pub failed_chunks: Vec<usize>,
    pub pools: Vec<PoolReport>,
}

impl SnapshotReport {
    pub fn snapshots(&self) -> impl Iterator<Item = &PoolSnapshot> {
        self.pools.iter().filter_map(|p| p.outcome.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &SnapshotError)> {
        self.pools
            .iter()
            .filter_map(|p| p.outcome.as_ref().err().map(|e| (p.pool.as_str(), e)))
    }

    pub fn is_complete(&self) -> bool {
        self.pools.iter().all(|p| p.outcome.is_ok())
    }
}

// ============================================
// PIPELINE
// ============================================

pub struct SnapshotPipeline<T> {
    executor: ChunkedBatchExecutor<T>,
    policy: FailurePolicy,
    pin_block: bool,
}

impl<T: AggregateTransport> SnapshotPipeline<T> {
    pub fn new(executor: ChunkedBatchExecutor<T>, policy: FailurePolicy) -> Self {
        Self {
            executor,
            policy,
            pin_block: false,
        }
    }

    /// Resolve the latest block once and read every chunk at it
    pub fn pin_block(mut self, pin: bool) -> Self {
        self.pin_block = pin;
        self
    }

    pub async fn run(&self, pools: &[PoolEntry]) -> Result<SnapshotReport, SnapshotError> {
        let fetched_at = Utc::now();

        // Encoding errors are configuration errors and always abort
        let mut calls = Vec::with_capacity(pools.len() * FIELDS_PER_POOL);
        for pool in pools {
            let encoded = encode_pool(pool).map_err(|e| e.attributed(Stage::Encode, vec![pool.name.clone()]))?;
            calls.extend(encoded);
        }
        debug!("Encoded {} calls for {} pools", calls.len(), pools.len());

        let block = if self.pin_block {
            let number = self
                .executor
                .transport()
                .latest_block()
                .await
                .map_err(|e| e.attributed(Stage::Execute, pool_names(pools)))?;
            info!("Pinned snapshot to block {}", number);
            Some(number)
        } else {
            None
        };

        let outcome = self
            .executor
            .execute_at(&calls, block.map(BlockId::number).or(self.executor.block()))
            .await
            .map_err(|e| e.attributed(Stage::Execute, pool_names(pools)))?;

        if outcome.results.len() != FIELDS_PER_POOL * pools.len() {
            return Err(SnapshotError::InvariantViolation(format!(
                "{} results for {} pools x {} fields",
                outcome.results.len(),
                pools.len(),
                FIELDS_PER_POOL
            )));
        }

        let reports = match self.policy {
            FailurePolicy::Abort => abort_on_failure(pools, &calls, &outcome)?,
            FailurePolicy::Isolate => isolate_failures(pools, &calls, &outcome),
        };

        let failed = reports.iter().filter(|r| r.outcome.is_err()).count();
        if failed > 0 {
            warn!("{} of {} pools came back incomplete", failed, reports.len());
        }

        Ok(SnapshotReport {
            schema_version: SCHEMA_VERSION,
            network: self.executor.network(),
            block,
            fetched_at,
            chunks: outcome.chunks,
            failed_chunks: outcome.failures.iter().map(|f| f.chunk).collect(),
            pools: reports,
        })
    }
}

fn pool_names(pools: &[PoolEntry]) -> Vec<String> {
    pools.iter().map(|p| p.name.clone()).collect()
}

/// Pools whose windows overlap the call range of a chunk
fn pools_covering(pools: &[PoolEntry], calls: &Range<usize>) -> Vec<String> {
    if calls.is_empty() {
        return Vec::new();
    }
    let first = calls.start / FIELDS_PER_POOL;
    let last = ((calls.end - 1) / FIELDS_PER_POOL).min(pools.len().saturating_sub(1));
    pools[first..=last].iter().map(|p| p.name.clone()).collect()
}

/// Decode one pool's window of raw results
fn decode_window(calls: &[CallDescriptor], raw: &[RawResult]) -> Result<Vec<DecodedField>, SnapshotError> {
    calls
        .iter()
        .zip(raw)
        .map(|(call, result)| decode(result, call.field))
        .collect()
}

fn abort_on_failure(
    pools: &[PoolEntry],
    calls: &[CallDescriptor],
    outcome: &BatchOutcome,
) -> Result<Vec<PoolReport>, SnapshotError> {
    if let Some(failure) = outcome.failures.first() {
        let affected: Vec<String> = pools
            .iter()
            .filter(|pool| {
                outcome
                    .failures
                    .iter()
                    .any(|f| pools_covering(pools, &f.calls).contains(&pool.name))
            })
            .map(|pool| pool.name.clone())
            .collect();
        return Err(failure.error.clone().attributed(Stage::Execute, affected));
    }

    let mut decoded = Vec::with_capacity(calls.len());
    for ((pool, window), raw) in pools
        .iter()
        .zip(calls.chunks(FIELDS_PER_POOL))
        .zip(outcome.results.chunks(FIELDS_PER_POOL))
    {
        let fields =
            decode_window(window, raw).map_err(|e| e.attributed(Stage::Decode, vec![pool.name.clone()]))?;
        decoded.extend(fields);
    }

    let snapshots = assemble(pools, &decoded, FIELDS_PER_POOL)
        .map_err(|e| e.attributed(Stage::Assemble, pool_names(pools)))?;

    Ok(pools
        .iter()
        .zip(snapshots)
        .map(|(pool, snapshot)| PoolReport { pool: pool.name.clone(), outcome: Ok(snapshot) })
        .collect())
}

fn isolate_failures(pools: &[PoolEntry], calls: &[CallDescriptor], outcome: &BatchOutcome) -> Vec<PoolReport> {
    pools
        .iter()
        .zip(calls.chunks(FIELDS_PER_POOL))
        .zip(outcome.results.chunks(FIELDS_PER_POOL))
        .map(|((pool, window), raw)| {
            let outcome = decode_window(window, raw)
                .map_err(|e| e.attributed(Stage::Decode, vec![pool.name.clone()]))
                .and_then(|fields| {
                    assemble_pool(pool, &fields).map_err(|e| e.attributed(Stage::Assemble, vec![pool.name.clone()]))
                });
            PoolReport { pool: pool.name.clone(), outcome }
        })
        .collect()
}
