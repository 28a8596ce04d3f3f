//! Versioned field schema shared by the call encoder and the reassembler.
//!
//! The encoder emits one call per entry of [`POOL_FIELDS`] in order, and the
//! reassembler reads each pool's window back in the same order. Changing the
//! order or length of the table requires bumping [`SCHEMA_VERSION`].

use alloy_sol_types::SolCall;

use super::abi::{IStableSwapPool, IERC20};

pub const SCHEMA_VERSION: u32 = 1;

/// Which contract of a pool entry a field is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Pool,
    LpToken,
}

/// One queried field of a pool snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolField {
    Amplification,
    Fees,
    Paused,
    Reserves,
    LpSupply,
}

/// Emission and reassembly order
pub const POOL_FIELDS: [PoolField; 5] = [
    PoolField::Amplification,
    PoolField::Fees,
    PoolField::Paused,
    PoolField::Reserves,
    PoolField::LpSupply,
];

pub const FIELDS_PER_POOL: usize = POOL_FIELDS.len();

impl PoolField {
    /// Contract operation that produces this field
    pub fn operation(self) -> &'static str {
        match self {
            PoolField::Amplification => "getA",
            PoolField::Fees => "fees",
            PoolField::Paused => "paused",
            PoolField::Reserves => "getReserves",
            PoolField::LpSupply => "totalSupply",
        }
    }

    pub fn from_operation(name: &str) -> Option<Self> {
        POOL_FIELDS.into_iter().find(|f| f.operation() == name)
    }

    pub fn target(self) -> CallTarget {
        match self {
            PoolField::LpSupply => CallTarget::LpToken,
            _ => CallTarget::Pool,
        }
    }

    /// Position of the field inside a pool's window
    pub fn position(self) -> usize {
        match self {
            PoolField::Amplification => 0,
            PoolField::Fees => 1,
            PoolField::Paused => 2,
            PoolField::Reserves => 3,
            PoolField::LpSupply => 4,
        }
    }

    /// Exact length of a well-formed return payload, in bytes
    pub fn return_len(self) -> usize {
        let words = match self {
            PoolField::Fees => 4,
            PoolField::Reserves => 2,
            _ => 1,
        };
        words * 32
    }

    /// ABI-encoded call payload (none of the operations take arguments)
    pub fn calldata(self) -> Vec<u8> {
        match self {
            PoolField::Amplification => IStableSwapPool::getACall {}.abi_encode(),
            PoolField::Fees => IStableSwapPool::feesCall {}.abi_encode(),
            PoolField::Paused => IStableSwapPool::pausedCall {}.abi_encode(),
            PoolField::Reserves => IStableSwapPool::getReservesCall {}.abi_encode(),
            PoolField::LpSupply => IERC20::totalSupplyCall {}.abi_encode(),
        }
    }
}
