//! In-memory chain for pipeline tests

use alloy_eips::BlockId;
use alloy_primitives::{keccak256, Address, Bytes, U256};
use alloy_sol_types::SolValue;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::abi::IMulticall3;
use super::encoder::CallDescriptor;
use super::schema::PoolField;
use super::transport::AggregateTransport;
use crate::error::SnapshotError;
use crate::registry::{PoolEntry, TokenMeta};

fn fixture_address(tag: &str) -> Address {
    Address::from_slice(&keccak256(tag.as_bytes())[12..])
}

/// Deterministic pools with valid checksummed addresses
pub fn fixture_pools(n: usize) -> Vec<PoolEntry> {
    (0..n)
        .map(|i| PoolEntry {
            name: format!("FIX{i}A/FIX{i}B"),
            pool_address: fixture_address(&format!("fixture:pool:{i}")).to_checksum(None),
            lp_token_address: fixture_address(&format!("fixture:lp:{i}")).to_checksum(None),
            tokens: [
                TokenMeta {
                    symbol: format!("FIX{i}A"),
                    address: fixture_address(&format!("fixture:t0:{i}")).to_checksum(None),
                    decimals: 6,
                },
                TokenMeta {
                    symbol: format!("FIX{i}B"),
                    address: fixture_address(&format!("fixture:t1:{i}")).to_checksum(None),
                    decimals: 18,
                },
            ],
        })
        .collect()
}

/// On-chain state of fixture pool `i`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureState {
    pub amplification: U256,
    pub fees: [U256; 4],
    pub paused: bool,
    pub reserves: [U256; 2],
    pub lp_supply: U256,
}

pub fn fixture_state(i: usize) -> FixtureState {
    let i = i as u64;
    FixtureState {
        amplification: U256::from(100 + i),
        fees: [
            U256::from(4_000_000 + i),
            U256::from(5_000_000_000u64),
            U256::ZERO,
            U256::from(5_000_000 + i),
        ],
        paused: i % 2 == 1,
        // token0 has 6 decimals, token1 has 18
        reserves: [
            U256::from(1_000_000_000_000u64 + i),
            U256::from(990_000u64 + i) * U256::from(10u64).pow(U256::from(18u64)),
        ],
        lp_supply: U256::from(1_990_000u64 + i) * U256::from(10u64).pow(U256::from(18u64)),
    }
}

/// Return payload a healthy contract produces for `field`
pub fn fixture_payload(state: &FixtureState, field: PoolField) -> Bytes {
    let encoded = match field {
        PoolField::Amplification => state.amplification.abi_encode(),
        PoolField::Fees => (state.fees[0], state.fees[1], state.fees[2], state.fees[3]).abi_encode_params(),
        PoolField::Paused => state.paused.abi_encode(),
        PoolField::Reserves => (state.reserves[0], state.reserves[1]).abi_encode_params(),
        PoolField::LpSupply => state.lp_supply.abi_encode(),
    };
    encoded.into()
}

type CallKey = (Address, [u8; 4]);

fn key(target: Address, payload: &[u8]) -> CallKey {
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&payload[..4]);
    (target, selector)
}

#[derive(Default)]
pub struct MockChain {
    state: HashMap<CallKey, Bytes>,
    reverting: HashSet<CallKey>,
    delays: HashMap<usize, Duration>,
    /// chunk -> (error, remaining failures)
    failures: Mutex<HashMap<usize, (SnapshotError, u32)>>,
    truncated: HashSet<usize>,
    block_number: u64,
    submissions: Mutex<Vec<(usize, Vec<CallKey>)>>,
    completions: Mutex<Vec<usize>>,
    blocks: Mutex<Vec<Option<BlockId>>>,
}

impl MockChain {
    /// Chain where fixture pool `i` holds `fixture_state(i)`
    pub fn with_pools(pools: &[PoolEntry]) -> Self {
        let mut chain = Self { block_number: 19_000_000, ..Self::default() };
        for (i, pool) in pools.iter().enumerate() {
            let state = fixture_state(i);
            let pool_addr = fixture_parse(&pool.pool_address);
            let lp_addr = fixture_parse(&pool.lp_token_address);
            for field in super::schema::POOL_FIELDS {
                let target = if field == PoolField::LpSupply { lp_addr } else { pool_addr };
                chain
                    .state
                    .insert(key(target, &field.calldata()), fixture_payload(&state, field));
            }
        }
        chain
    }

    pub fn with_delay(mut self, chunk: usize, delay: Duration) -> Self {
        self.delays.insert(chunk, delay);
        self
    }

    /// Fail `chunk` with `error` for the next `times` submissions
    pub fn failing_chunk(self, chunk: usize, error: SnapshotError, times: u32) -> Self {
        self.failures.lock().unwrap().insert(chunk, (error, times));
        self
    }

    /// Answer `chunk` with one entry fewer than submitted
    pub fn truncating_chunk(mut self, chunk: usize) -> Self {
        self.truncated.insert(chunk);
        self
    }

    pub fn reverting(mut self, call: &CallDescriptor) -> Self {
        self.reverting.insert(key(call.target, &call.payload));
        self
    }

    pub fn payload_for(&self, call: &CallDescriptor) -> Option<Bytes> {
        self.state.get(&key(call.target, &call.payload)).cloned()
    }

    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.submissions.lock().unwrap().iter().map(|(_, calls)| calls.len()).collect()
    }

    pub fn submissions_for(&self, chunk: usize) -> Vec<Vec<(Address, [u8; 4])>> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == chunk)
            .map(|(_, calls)| calls.clone())
            .collect()
    }

    pub fn completion_order(&self) -> Vec<usize> {
        self.completions.lock().unwrap().clone()
    }

    pub fn blocks_seen(&self) -> Vec<Option<BlockId>> {
        self.blocks.lock().unwrap().clone()
    }
}

fn fixture_parse(address: &str) -> Address {
    address.parse().unwrap()
}

#[async_trait]
impl AggregateTransport for MockChain {
    async fn aggregate3(
        &self,
        _aggregator: Address,
        calls: Vec<IMulticall3::Call3>,
        block: Option<BlockId>,
        chunk: usize,
    ) -> Result<Vec<IMulticall3::Result>, SnapshotError> {
        let keys: Vec<CallKey> = calls.iter().map(|c| key(c.target, &c.callData)).collect();
        self.submissions.lock().unwrap().push((chunk, keys.clone()));
        self.blocks.lock().unwrap().push(block);

        if let Some(delay) = self.delays.get(&chunk) {
            tokio::time::sleep(*delay).await;
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some((error, remaining)) = failures.get_mut(&chunk) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(error.clone());
                }
            }
        }

        let mut results: Vec<IMulticall3::Result> = keys
            .iter()
            .map(|k| match self.state.get(k) {
                Some(data) if !self.reverting.contains(k) => IMulticall3::Result {
                    success: true,
                    returnData: data.clone(),
                },
                _ => IMulticall3::Result { success: false, returnData: Bytes::new() },
            })
            .collect();

        if self.truncated.contains(&chunk) {
            results.pop();
        }

        self.completions.lock().unwrap().push(chunk);
        Ok(results)
    }

    async fn latest_block(&self) -> Result<u64, SnapshotError> {
        Ok(self.block_number)
    }
}
