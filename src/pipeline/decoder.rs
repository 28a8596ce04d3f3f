//! Result decoder: raw return data -> typed field value
//!
//! Each call carries its own field, so decoding never depends on position.
//! Absent, empty and malformed payloads all surface as
//! `MissingReturnData`; a silent default is never substituted.

use alloy_primitives::U256;
use alloy_sol_types::SolCall;
use serde::Serialize;

use super::abi::{IStableSwapPool, IERC20};
use super::executor::{AbsentReason, RawResult};
use super::schema::PoolField;
use crate::error::SnapshotError;

/// Fee values are fractions of this denominator
pub const FEE_DENOMINATOR: u64 = 10_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBundle {
    pub trade: U256,
    pub admin: U256,
    pub deposit: U256,
    pub withdraw: U256,
}

impl FeeBundle {
    /// Trade fee in percent, for display
    pub fn trade_percent(&self) -> f64 {
        as_percent(self.trade)
    }

    /// Share of the trade fee kept by the protocol, in percent
    pub fn admin_percent(&self) -> f64 {
        as_percent(self.admin)
    }
}

fn as_percent(fee: U256) -> f64 {
    let fee: u128 = fee.try_into().unwrap_or(u128::MAX);
    fee as f64 * 100.0 / FEE_DENOMINATOR as f64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedField {
    Amplification(U256),
    Fees(FeeBundle),
    Paused(bool),
    Reserves([U256; 2]),
    LpSupply(U256),
}

impl DecodedField {
    pub fn field(&self) -> PoolField {
        match self {
            DecodedField::Amplification(_) => PoolField::Amplification,
            DecodedField::Fees(_) => PoolField::Fees,
            DecodedField::Paused(_) => PoolField::Paused,
            DecodedField::Reserves(_) => PoolField::Reserves,
            DecodedField::LpSupply(_) => PoolField::LpSupply,
        }
    }
}

/// Decode the raw result of a call that read `field`
pub fn decode(raw: &RawResult, field: PoolField) -> Result<DecodedField, SnapshotError> {
    let missing = |reason: String| SnapshotError::MissingReturnData {
        operation: field.operation(),
        reason,
    };

    let data = match raw {
        RawResult::Returned(data) => data,
        RawResult::Absent(AbsentReason::Reverted) => return Err(missing("call reverted".to_string())),
        RawResult::Absent(AbsentReason::ChunkFailed { chunk, message }) => {
            return Err(missing(format!("chunk {chunk} failed: {message}")))
        }
    };

    if data.is_empty() {
        return Err(missing("empty return data".to_string()));
    }

    // Static return types only, so any other length is the wrong shape
    if data.len() != field.return_len() {
        return Err(missing(format!(
            "malformed return data: {} bytes, expected {}",
            data.len(),
            field.return_len()
        )));
    }

    let malformed = |e: alloy_sol_types::Error| missing(format!("malformed return data: {e}"));

    let decoded = match field {
        PoolField::Amplification => {
            DecodedField::Amplification(IStableSwapPool::getACall::abi_decode_returns_validate(data).map_err(malformed)?)
        }
        PoolField::Fees => {
            let fees = IStableSwapPool::feesCall::abi_decode_returns_validate(data).map_err(malformed)?;
            DecodedField::Fees(FeeBundle {
                trade: fees.tradeFee,
                admin: fees.adminFee,
                deposit: fees.depositFee,
                withdraw: fees.withdrawFee,
            })
        }
        PoolField::Paused => {
            let word = U256::from_be_slice(data);
            if word > U256::from(1u64) {
                return Err(missing(format!("malformed return data: {word} is not a bool")));
            }
            DecodedField::Paused(IStableSwapPool::pausedCall::abi_decode_returns_validate(data).map_err(malformed)?)
        }
        PoolField::Reserves => {
            let reserves = IStableSwapPool::getReservesCall::abi_decode_returns_validate(data).map_err(malformed)?;
            DecodedField::Reserves([reserves.reserve0, reserves.reserve1])
        }
        PoolField::LpSupply => {
            DecodedField::LpSupply(IERC20::totalSupplyCall::abi_decode_returns_validate(data).map_err(malformed)?)
        }
    };

    Ok(decoded)
}
