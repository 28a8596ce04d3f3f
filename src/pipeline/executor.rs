//! Chunked batch executor
//!
//! Splits an ordered call list into contiguous chunks of at most
//! `max_chunk_size`, runs each chunk as one `aggregate3` call, and
//! concatenates the chunk outputs back in input order. Chunks run
//! concurrently and may complete in any order; every output slot still
//! lines up with the call at the same input position.

use alloy_eips::BlockId;
use alloy_primitives::{Address, Bytes};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::ops::Range;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::abi::{IMulticall3, MULTICALL3};
use super::encoder::CallDescriptor;
use super::transport::AggregateTransport;
use crate::error::SnapshotError;
use crate::registry::Network;

// ============================================
// RESULT TYPES
// ============================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsentReason {
    /// The call itself reverted inside a successful aggregate
    Reverted,
    /// The whole chunk containing the call failed
    ChunkFailed { chunk: usize, message: String },
}

/// Raw return data of one call. `Absent` is never the same thing as an
/// empty successful payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawResult {
    Returned(Bytes),
    Absent(AbsentReason),
}

impl RawResult {
    pub fn is_absent(&self) -> bool {
        matches!(self, RawResult::Absent(_))
    }
}

/// A chunk that produced no results after all retries
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFailure {
    pub chunk: usize,
    pub calls: Range<usize>,
    pub error: SnapshotError,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One entry per submitted call, same order
    pub results: Vec<RawResult>,
    pub failures: Vec<ChunkFailure>,
    pub chunks: usize,
}

// ============================================
// CONFIGURATION
// ============================================

/// Batching contract address per network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorTable {
    addresses: BTreeMap<Network, Address>,
}

impl AggregatorTable {
    pub fn empty() -> Self {
        Self { addresses: BTreeMap::new() }
    }

    pub fn with(mut self, network: Network, address: Address) -> Self {
        self.addresses.insert(network, address);
        self
    }

    pub fn get(&self, network: Network) -> Option<Address> {
        self.addresses.get(&network).copied()
    }
}

impl Default for AggregatorTable {
    /// Canonical Multicall3 on every supported network
    fn default() -> Self {
        Network::ALL
            .into_iter()
            .fold(Self::empty(), |table, network| table.with(network, MULTICALL3))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub max_chunk_size: usize,
    pub max_concurrent_chunks: usize,
    /// Overall deadline for all chunks of one `execute`
    pub deadline: Option<Duration>,
    /// Extra attempts per chunk for retryable failures
    pub chunk_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: 100,
            max_concurrent_chunks: 4,
            deadline: Some(Duration::from_secs(30)),
            chunk_retries: 1,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

impl BatchOptions {
    /// Delay before retry number `attempt`, saturating at `Duration::MAX`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff.checked_mul(attempt).unwrap_or(Duration::MAX)
    }
}

// ============================================
// EXECUTOR
// ============================================

pub struct ChunkedBatchExecutor<T> {
    transport: T,
    network: Network,
    aggregator: Address,
    options: BatchOptions,
    block: Option<BlockId>,
}

impl<T: AggregateTransport> ChunkedBatchExecutor<T> {
    pub fn new(
        transport: T,
        network: Network,
        aggregators: &AggregatorTable,
        options: BatchOptions,
    ) -> Result<Self, SnapshotError> {
        if options.max_chunk_size == 0 {
            return Err(SnapshotError::InvariantViolation(
                "max chunk size must be at least 1".to_string(),
            ));
        }
        if options.max_concurrent_chunks == 0 {
            return Err(SnapshotError::InvariantViolation(
                "max concurrent chunks must be at least 1".to_string(),
            ));
        }

        let aggregator = aggregators
            .get(network)
            .ok_or(SnapshotError::UnsupportedNetwork(network))?;

        Ok(Self {
            transport,
            network,
            aggregator,
            options,
            block: None,
        })
    }

    /// Issue every chunk against `block` instead of the node's latest
    pub fn at_block(mut self, block: Option<BlockId>) -> Self {
        self.block = block;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Call positions covered by `chunk` for a batch of `total` calls
    pub fn chunk_range(&self, chunk: usize, total: usize) -> Range<usize> {
        let start = (chunk * self.options.max_chunk_size).min(total);
        let end = (start + self.options.max_chunk_size).min(total);
        start..end
    }

    /// Execute `calls` in chunks and return one raw result per call
    pub async fn execute(&self, calls: &[CallDescriptor]) -> Result<BatchOutcome, SnapshotError> {
        self.execute_at(calls, self.block).await
    }

    /// Same as [`execute`](Self::execute) with every chunk issued at `block`
    pub async fn execute_at(
        &self,
        calls: &[CallDescriptor],
        block: Option<BlockId>,
    ) -> Result<BatchOutcome, SnapshotError> {
        if calls.is_empty() {
            return Ok(BatchOutcome { results: Vec::new(), failures: Vec::new(), chunks: 0 });
        }

        let start = Instant::now();
        let chunk_size = self.options.max_chunk_size;
        let chunk_count = calls.len().div_ceil(chunk_size);

        debug!(
            "Dispatching {} calls as {} chunks (<= {} calls, {} in flight) to {:?}",
            calls.len(),
            chunk_count,
            chunk_size,
            self.options.max_concurrent_chunks,
            self.aggregator
        );

        let dispatch = stream::iter(calls.chunks(chunk_size).enumerate())
            .map(|(index, chunk)| async move { (index, self.execute_chunk(index, chunk, block).await) })
            .buffer_unordered(self.options.max_concurrent_chunks)
            .collect::<Vec<_>>();

        let mut completed = match self.options.deadline {
            Some(deadline) => tokio::time::timeout(deadline, dispatch)
                .await
                .map_err(|_| SnapshotError::Timeout(deadline))?,
            None => dispatch.await,
        };

        // Completion order is arbitrary; output order is chunk order
        completed.sort_unstable_by_key(|(index, _)| *index);

        let mut results = Vec::with_capacity(calls.len());
        let mut failures = Vec::new();

        for (index, outcome) in completed {
            let range = self.chunk_range(index, calls.len());
            match outcome {
                Ok(chunk_results) => results.extend(chunk_results),
                Err(error) => {
                    warn!("Chunk {} (calls {:?}) failed: {}", index, range, error);
                    let absent = RawResult::Absent(AbsentReason::ChunkFailed {
                        chunk: index,
                        message: error.to_string(),
                    });
                    results.extend(std::iter::repeat(absent).take(range.len()));
                    failures.push(ChunkFailure { chunk: index, calls: range, error });
                }
            }
        }

        if results.len() != calls.len() {
            return Err(SnapshotError::InvariantViolation(format!(
                "{} calls produced {} results",
                calls.len(),
                results.len()
            )));
        }

        info!(
            "Multicall3: {} calls in {:?} ({} chunks, {} failed)",
            calls.len(),
            start.elapsed(),
            chunk_count,
            failures.len()
        );

        Ok(BatchOutcome { results, failures, chunks: chunk_count })
    }

    /// Run one chunk, resubmitting it unchanged on retryable failures
    async fn execute_chunk(
        &self,
        index: usize,
        chunk: &[CallDescriptor],
        block: Option<BlockId>,
    ) -> Result<Vec<RawResult>, SnapshotError> {
        let calls: Vec<IMulticall3::Call3> = chunk
            .iter()
            .map(|call| IMulticall3::Call3 {
                target: call.target,
                allowFailure: true,
                callData: call.payload.clone(),
            })
            .collect();

        let mut attempt = 0;
        loop {
            let outcome = self
                .transport
                .aggregate3(self.aggregator, calls.clone(), block, index)
                .await
                .and_then(|entries| {
                    if entries.len() != chunk.len() {
                        return Err(SnapshotError::ChunkExecutionFailure {
                            chunk: index,
                            message: format!(
                                "aggregate returned {} entries for {} calls",
                                entries.len(),
                                chunk.len()
                            ),
                        });
                    }
                    Ok(entries
                        .into_iter()
                        .map(|entry| {
                            if entry.success {
                                RawResult::Returned(entry.returnData)
                            } else {
                                RawResult::Absent(AbsentReason::Reverted)
                            }
                        })
                        .collect())
                });

            match outcome {
                Err(err) if err.is_retryable() && attempt < self.options.chunk_retries => {
                    attempt += 1;
                    debug!(
                        "Retrying chunk {} (attempt {}/{}): {}",
                        index, attempt, self.options.chunk_retries, err
                    );
                    tokio::time::sleep(self.options.backoff_for(attempt)).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encoder::encode_pools;
    use crate::pipeline::mock::{fixture_pools, MockChain};
    use alloy_primitives::U256;
    use alloy_sol_types::SolValue;
    use std::sync::Arc;

    fn options(max_chunk_size: usize) -> BatchOptions {
        BatchOptions {
            max_chunk_size,
            max_concurrent_chunks: 8,
            deadline: None,
            chunk_retries: 0,
            retry_backoff: Duration::from_millis(10),
        }
    }

    fn executor(chain: Arc<MockChain>, max_chunk_size: usize) -> ChunkedBatchExecutor<Arc<MockChain>> {
        ChunkedBatchExecutor::new(chain, Network::Ethereum, &AggregatorTable::default(), options(max_chunk_size))
            .unwrap()
    }

    #[test]
    fn test_backoff_grows_linearly_and_saturates() {
        let linear = options(5);
        assert_eq!(linear.backoff_for(1), Duration::from_millis(10));
        assert_eq!(linear.backoff_for(3), Duration::from_millis(30));

        let huge = BatchOptions { retry_backoff: Duration::from_millis(u64::MAX), ..options(5) };
        assert_eq!(huge.backoff_for(1), Duration::from_millis(u64::MAX));
        assert_eq!(huge.backoff_for(u32::MAX), Duration::MAX);
    }

    #[tokio::test]
    async fn test_chunk_sizes_for_fifteen_calls() {
        let pools = fixture_pools(3);
        let chain = Arc::new(MockChain::with_pools(&pools));
        let calls = encode_pools(&pools).unwrap();

        let outcome = executor(chain.clone(), 7).execute(&calls).await.unwrap();

        assert_eq!(outcome.chunks, 3);
        assert_eq!(outcome.results.len(), 15);
        assert!(outcome.failures.is_empty());

        let mut sizes = chain.chunk_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 7, 7]);
    }

    #[tokio::test]
    async fn test_results_independent_of_chunk_size() {
        let pools = fixture_pools(4);
        let chain = Arc::new(MockChain::with_pools(&pools));
        let calls = encode_pools(&pools).unwrap();

        let reference = executor(chain.clone(), calls.len()).execute(&calls).await.unwrap().results;
        for k in [1, 2, 3, 5, 7, 19, 64] {
            let results = executor(chain.clone(), k).execute(&calls).await.unwrap().results;
            assert_eq!(results, reference, "chunk size {k}");
        }
    }

    #[tokio::test]
    async fn test_positions_match_calls() {
        let pools = fixture_pools(2);
        let chain = Arc::new(MockChain::with_pools(&pools));
        let calls = encode_pools(&pools).unwrap();

        let outcome = executor(chain.clone(), 3).execute(&calls).await.unwrap();
        for (call, result) in calls.iter().zip(&outcome.results) {
            assert_eq!(result, &RawResult::Returned(chain.payload_for(call).unwrap()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_completion_keeps_input_order() {
        let pools = fixture_pools(3);
        let chain = Arc::new(
            MockChain::with_pools(&pools)
                .with_delay(0, Duration::from_millis(300))
                .with_delay(1, Duration::from_millis(100)),
        );
        let calls = encode_pools(&pools).unwrap();

        let outcome = executor(chain.clone(), 7).execute(&calls).await.unwrap();

        assert_eq!(chain.completion_order(), vec![2, 1, 0]);
        let expected: Vec<_> = calls
            .iter()
            .map(|c| RawResult::Returned(chain.payload_for(c).unwrap()))
            .collect();
        assert_eq!(outcome.results, expected);
    }

    #[tokio::test]
    async fn test_failed_chunk_marks_only_its_slots() {
        let pools = fixture_pools(3);
        let failure = SnapshotError::TransportFailure { chunk: Some(1), message: "connection reset".into() };
        let chain = Arc::new(MockChain::with_pools(&pools).failing_chunk(1, failure.clone(), u32::MAX));
        let calls = encode_pools(&pools).unwrap();

        let outcome = executor(chain, 7).execute(&calls).await.unwrap();

        assert_eq!(outcome.results.len(), 15);
        assert_eq!(outcome.failures, vec![ChunkFailure { chunk: 1, calls: 7..14, error: failure }]);
        for (i, result) in outcome.results.iter().enumerate() {
            assert_eq!(result.is_absent(), (7..14).contains(&i), "slot {i}");
        }
    }

    #[tokio::test]
    async fn test_retry_resubmits_same_chunk() {
        let pools = fixture_pools(2);
        let failure = SnapshotError::ChunkExecutionFailure { chunk: 0, message: "header not found".into() };
        let chain = Arc::new(MockChain::with_pools(&pools).failing_chunk(0, failure, 1));
        let calls = encode_pools(&pools).unwrap();

        let mut opts = options(4);
        opts.chunk_retries = 2;
        let executor =
            ChunkedBatchExecutor::new(chain.clone(), Network::Ethereum, &AggregatorTable::default(), opts).unwrap();

        let outcome = executor.execute(&calls).await.unwrap();
        assert!(outcome.failures.is_empty());
        assert!(outcome.results.iter().all(|r| !r.is_absent()));

        // chunk 0 twice (identical), chunks 1 and 2 once
        let submissions = chain.submissions_for(0);
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0], submissions[1]);
        assert_eq!(chain.chunk_sizes().len(), 4);
    }

    #[tokio::test]
    async fn test_short_aggregate_response_fails_chunk() {
        let pools = fixture_pools(1);
        let chain = Arc::new(MockChain::with_pools(&pools).truncating_chunk(0));
        let calls = encode_pools(&pools).unwrap();

        let outcome = executor(chain, 10).execute(&calls).await.unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(outcome.failures[0].error, SnapshotError::ChunkExecutionFailure { chunk: 0, .. }));
        assert!(outcome.results.iter().all(RawResult::is_absent));
    }

    #[tokio::test]
    async fn test_reverted_call_is_absent_not_empty() {
        let pools = fixture_pools(1);
        let calls = encode_pools(&pools).unwrap();
        let chain = Arc::new(MockChain::with_pools(&pools).reverting(&calls[2]));

        let outcome = executor(chain, 10).execute(&calls).await.unwrap();
        assert_eq!(outcome.results[2], RawResult::Absent(AbsentReason::Reverted));
        assert_eq!(outcome.results[0], RawResult::Returned(U256::from(100u64).abi_encode().into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_stuck_chunk() {
        let pools = fixture_pools(2);
        let chain = Arc::new(MockChain::with_pools(&pools).with_delay(1, Duration::from_secs(3600)));
        let calls = encode_pools(&pools).unwrap();

        let mut opts = options(5);
        opts.deadline = Some(Duration::from_secs(5));
        let executor =
            ChunkedBatchExecutor::new(chain, Network::Ethereum, &AggregatorTable::default(), opts).unwrap();

        let err = executor.execute(&calls).await.unwrap_err();
        assert_eq!(err, SnapshotError::Timeout(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_block_is_forwarded_to_every_chunk() {
        let pools = fixture_pools(2);
        let chain = Arc::new(MockChain::with_pools(&pools));
        let calls = encode_pools(&pools).unwrap();

        let executor = executor(chain.clone(), 3).at_block(Some(BlockId::number(19_000_000)));
        executor.execute(&calls).await.unwrap();

        let blocks = chain.blocks_seen();
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| *b == Some(BlockId::number(19_000_000))));
    }

    #[tokio::test]
    async fn test_empty_batch_issues_no_calls() {
        let chain = Arc::new(MockChain::default());
        let outcome = executor(chain.clone(), 5).execute(&[]).await.unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.chunks, 0);
        assert!(chain.chunk_sizes().is_empty());
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let chain = Arc::new(MockChain::default());
        let err = ChunkedBatchExecutor::new(chain, Network::Ethereum, &AggregatorTable::default(), options(0))
            .err()
            .unwrap();
        assert!(matches!(err, SnapshotError::InvariantViolation(_)));
    }

    #[test]
    fn test_unmapped_network_is_rejected() {
        let chain = Arc::new(MockChain::default());
        let table = AggregatorTable::empty().with(Network::Ethereum, MULTICALL3);
        let err = ChunkedBatchExecutor::new(chain, Network::Base, &table, options(5)).err().unwrap();
        assert_eq!(err, SnapshotError::UnsupportedNetwork(Network::Base));
    }

    #[test]
    fn test_chunk_ranges() {
        let chain = Arc::new(MockChain::default());
        let executor = executor(chain, 7);
        assert_eq!(executor.chunk_range(0, 15), 0..7);
        assert_eq!(executor.chunk_range(1, 15), 7..14);
        assert_eq!(executor.chunk_range(2, 15), 14..15);
    }

    #[test]
    fn test_default_table_uses_multicall3() {
        let table = AggregatorTable::default();
        for network in Network::ALL {
            assert_eq!(table.get(network), Some(MULTICALL3));
        }
    }
}
