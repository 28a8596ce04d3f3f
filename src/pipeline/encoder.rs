//! Call encoder: pool entry + field -> call descriptor

use alloy_primitives::{Address, Bytes};
use tracing::trace;

use super::schema::{CallTarget, PoolField, POOL_FIELDS};
use crate::error::SnapshotError;
use crate::registry::PoolEntry;

/// A single read call queued for aggregation.
///
/// The field travels with the call so the decoder never has to infer the
/// operation from the position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    pub target: Address,
    pub payload: Bytes,
    pub field: PoolField,
}

/// Parse an EIP-55 address, rejecting anything that fails the checksum
pub fn parse_checked_address(value: &str, context: &str) -> Result<Address, SnapshotError> {
    Address::parse_checksummed(value, None).map_err(|e| SnapshotError::InvalidAddress {
        address: value.to_string(),
        context: context.to_string(),
        reason: e.to_string(),
    })
}

/// Encode one field read for `pool`
pub fn encode(pool: &PoolEntry, field: PoolField) -> Result<CallDescriptor, SnapshotError> {
    let target = match field.target() {
        CallTarget::Pool => parse_checked_address(&pool.pool_address, &format!("pool {}", pool.name))?,
        CallTarget::LpToken => {
            parse_checked_address(&pool.lp_token_address, &format!("LP token of {}", pool.name))?
        }
    };

    let payload = Bytes::from(field.calldata());
    trace!(
        "{} {} -> {:?} [0x{}]",
        pool.name,
        field.operation(),
        target,
        hex::encode(&payload[..4])
    );

    Ok(CallDescriptor { target, payload, field })
}

/// Encode a field by its contract operation name
pub fn encode_operation(pool: &PoolEntry, operation: &str) -> Result<CallDescriptor, SnapshotError> {
    let field = PoolField::from_operation(operation)
        .ok_or_else(|| SnapshotError::UnknownOperation(operation.to_string()))?;
    encode(pool, field)
}

/// Encode every schema field of one pool, in schema order
pub fn encode_pool(pool: &PoolEntry) -> Result<Vec<CallDescriptor>, SnapshotError> {
    POOL_FIELDS.into_iter().map(|field| encode(pool, field)).collect()
}

/// Encode every schema field of every pool, entity-major
pub fn encode_pools(pools: &[PoolEntry]) -> Result<Vec<CallDescriptor>, SnapshotError> {
    let mut calls = Vec::with_capacity(pools.len() * POOL_FIELDS.len());
    for pool in pools {
        calls.extend(encode_pool(pool)?);
    }
    Ok(calls)
}
