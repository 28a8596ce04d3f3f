//! Reassembler: flat decoded fields -> one snapshot per pool

use alloy_primitives::{Address, U256};
use serde::Serialize;

use super::decoder::{DecodedField, FeeBundle};
use super::encoder::parse_checked_address;
use super::schema::{FIELDS_PER_POOL, POOL_FIELDS};
use crate::error::SnapshotError;
use crate::registry::PoolEntry;

/// Complete state of one pool at one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub pool: String,
    pub address: Address,
    pub amplification: U256,
    pub fees: FeeBundle,
    pub paused: bool,
    pub reserves: [U256; 2],
    pub lp_supply: U256,
}

/// Build one pool's snapshot from its schema-ordered window
pub fn assemble_pool(pool: &PoolEntry, window: &[DecodedField]) -> Result<PoolSnapshot, SnapshotError> {
    if window.len() != FIELDS_PER_POOL {
        return Err(SnapshotError::InvariantViolation(format!(
            "{}: expected {} fields, got {}",
            pool.name,
            FIELDS_PER_POOL,
            window.len()
        )));
    }

    for (value, expected) in window.iter().zip(POOL_FIELDS) {
        if value.field() != expected {
            return Err(SnapshotError::InvariantViolation(format!(
                "{}: slot {} holds {:?}, schema expects {:?}",
                pool.name,
                expected.position(),
                value.field(),
                expected
            )));
        }
    }

    // Every slot was checked against the schema above
    let (
        DecodedField::Amplification(amplification),
        DecodedField::Fees(fees),
        DecodedField::Paused(paused),
        DecodedField::Reserves(reserves),
        DecodedField::LpSupply(lp_supply),
    ) = (&window[0], &window[1], &window[2], &window[3], &window[4])
    else {
        return Err(SnapshotError::InvariantViolation(format!(
            "{}: window does not match field schema",
            pool.name
        )));
    };

    Ok(PoolSnapshot {
        pool: pool.name.clone(),
        address: parse_checked_address(&pool.pool_address, &format!("pool {}", pool.name))?,
        amplification: *amplification,
        fees: *fees,
        paused: *paused,
        reserves: *reserves,
        lp_supply: *lp_supply,
    })
}

/// Group a flat, entity-major field list into per-pool snapshots.
///
/// `fields_per_entity` must match the schema the calls were encoded with.
pub fn assemble(
    pools: &[PoolEntry],
    decoded: &[DecodedField],
    fields_per_entity: usize,
) -> Result<Vec<PoolSnapshot>, SnapshotError> {
    if fields_per_entity != FIELDS_PER_POOL {
        return Err(SnapshotError::InvariantViolation(format!(
            "schema has {} fields per pool, caller passed {}",
            FIELDS_PER_POOL, fields_per_entity
        )));
    }
    if decoded.len() != pools.len() * fields_per_entity {
        return Err(SnapshotError::InvariantViolation(format!(
            "{} decoded fields for {} pools x {} fields",
            decoded.len(),
            pools.len(),
            fields_per_entity
        )));
    }

    pools
        .iter()
        .zip(decoded.chunks(fields_per_entity))
        .map(|(pool, window)| assemble_pool(pool, window))
        .collect()
}
