//! Pricing adapter
//!
//! Turns a pool snapshot into a spot price and a swap output estimate.
//! The pipeline only hands snapshots over; it never depends on the math.

use alloy_primitives::U256;
use serde::Serialize;

use crate::error::{SnapshotError, Stage};
use crate::pipeline::{PoolSnapshot, SnapshotReport, FEE_DENOMINATOR};
use crate::registry::PoolEntry;

/// Which reserve is sold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    ZeroForOne,
    OneForZero,
}

impl SwapDirection {
    fn indices(self) -> (usize, usize) {
        match self {
            SwapDirection::ZeroForOne => (0, 1),
            SwapDirection::OneForZero => (1, 0),
        }
    }
}

pub trait PricingAdapter {
    /// Marginal price of the sold token in units of the bought token
    fn spot_price(&self, snapshot: &PoolSnapshot, direction: SwapDirection) -> Result<f64, SnapshotError>;

    /// Output for `amount_in` raw units of the sold token, after fees
    fn estimate_output(
        &self,
        snapshot: &PoolSnapshot,
        direction: SwapDirection,
        amount_in: U256,
    ) -> Result<U256, SnapshotError>;
}

// ============================================
// STABLESWAP MATH (two coins)
// ============================================

const N_COINS: u64 = 2;
const MAX_ITERATIONS: usize = 255;
const PRECISION_DECIMALS: u8 = 18;

fn overflow(step: &str) -> SnapshotError {
    SnapshotError::Pricing(format!("overflow computing {step}"))
}

fn converged(a: U256, b: U256) -> bool {
    let diff = if a > b { a - b } else { b - a };
    diff <= U256::from(1u64)
}

/// Invariant D for normalised balances
fn compute_d(xp: [U256; 2], ann: U256) -> Result<U256, SnapshotError> {
    let n = U256::from(N_COINS);
    let s = xp[0].checked_add(xp[1]).ok_or_else(|| overflow("D: S"))?;
    if s.is_zero() {
        return Ok(U256::ZERO);
    }
    if xp.iter().any(|x| x.is_zero()) {
        return Err(SnapshotError::Pricing("empty reserve".to_string()));
    }

    let mut d = s;
    for _ in 0..MAX_ITERATIONS {
        // D_P = D^3 / (n^n * x0 * x1)
        let mut d_p = d;
        for x in xp {
            d_p = d_p
                .checked_mul(d)
                .zip(x.checked_mul(n))
                .map(|(num, den)| num / den)
                .ok_or_else(|| overflow("D: D_P"))?;
        }

        let d_prev = d;
        let numerator = ann
            .checked_mul(s)
            .zip(d_p.checked_mul(n))
            .and_then(|(v, dp_n)| v.checked_add(dp_n))
            .and_then(|v| v.checked_mul(d))
            .ok_or_else(|| overflow("D: numerator"))?;
        let denominator = (ann - U256::from(1u64))
            .checked_mul(d)
            .zip(d_p.checked_mul(n + U256::from(1u64)))
            .and_then(|(v, dp_n1)| v.checked_add(dp_n1))
            .ok_or_else(|| overflow("D: denominator"))?;
        if denominator.is_zero() {
            return Err(SnapshotError::Pricing("D: zero denominator".to_string()));
        }

        d = numerator / denominator;
        if converged(d, d_prev) {
            return Ok(d);
        }
    }

    Err(SnapshotError::Pricing("D did not converge".to_string()))
}

/// Balance of the bought coin once the sold coin's balance is `x`
fn compute_y(x: U256, d: U256, ann: U256) -> Result<U256, SnapshotError> {
    let n = U256::from(N_COINS);
    if x.is_zero() {
        return Err(SnapshotError::Pricing("y: zero input balance".to_string()));
    }

    // c = D^3 / (n^n * x * Ann), b = x + D / Ann
    let c = d
        .checked_mul(d)
        .zip(x.checked_mul(n))
        .map(|(num, den)| num / den)
        .ok_or_else(|| overflow("y: c"))?;
    let c = c
        .checked_mul(d)
        .zip(ann.checked_mul(n))
        .map(|(num, den)| num / den)
        .ok_or_else(|| overflow("y: c"))?;
    let b = x.checked_add(d / ann).ok_or_else(|| overflow("y: b"))?;

    let mut y = d;
    for _ in 0..MAX_ITERATIONS {
        let y_prev = y;
        let numerator = y
            .checked_mul(y)
            .and_then(|v| v.checked_add(c))
            .ok_or_else(|| overflow("y: numerator"))?;
        let denominator = y
            .checked_mul(U256::from(2u64))
            .and_then(|v| v.checked_add(b))
            .ok_or_else(|| overflow("y: denominator"))?
            .checked_sub(d)
            .filter(|v| !v.is_zero())
            .ok_or_else(|| SnapshotError::Pricing("y: degenerate denominator".to_string()))?;

        y = numerator / denominator;
        if converged(y, y_prev) {
            return Ok(y);
        }
    }

    Err(SnapshotError::Pricing("y did not converge".to_string()))
}

fn to_f64(value: U256) -> f64 {
    let raw: u128 = value.try_into().unwrap_or(u128::MAX);
    raw as f64
}

// ============================================
// PRICER
// ============================================

/// Two-coin StableSwap pricer for one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StableSwapPricer {
    decimals: [u8; 2],
}

impl StableSwapPricer {
    pub fn new(decimals: [u8; 2]) -> Self {
        Self { decimals }
    }

    pub fn for_pool(pool: &PoolEntry) -> Self {
        Self::new([pool.tokens[0].decimals, pool.tokens[1].decimals])
    }

    fn rates(&self) -> Result<[U256; 2], SnapshotError> {
        let mut rates = [U256::ZERO; 2];
        for (rate, decimals) in rates.iter_mut().zip(self.decimals) {
            let shift = PRECISION_DECIMALS
                .checked_sub(decimals)
                .ok_or_else(|| SnapshotError::Pricing(format!("{decimals} decimals exceeds 18")))?;
            *rate = U256::from(10u64).pow(U256::from(shift));
        }
        Ok(rates)
    }

    /// Normalised balances, amplification coefficient and invariant
    fn state(&self, snapshot: &PoolSnapshot) -> Result<([U256; 2], [U256; 2], U256, U256), SnapshotError> {
        if snapshot.paused {
            return Err(SnapshotError::Pricing(format!("{} is paused", snapshot.pool)));
        }
        if snapshot.reserves.iter().any(|r| r.is_zero()) {
            return Err(SnapshotError::Pricing(format!("{} has an empty reserve", snapshot.pool)));
        }
        if snapshot.fees.trade > U256::from(FEE_DENOMINATOR) {
            return Err(SnapshotError::Pricing(format!(
                "{} trade fee {} exceeds denominator {}",
                snapshot.pool, snapshot.fees.trade, FEE_DENOMINATOR
            )));
        }
        if snapshot.amplification.is_zero() {
            return Err(SnapshotError::Pricing(format!("{} has zero amplification", snapshot.pool)));
        }

        let rates = self.rates()?;
        let mut xp = [U256::ZERO; 2];
        for i in 0..2 {
            xp[i] = snapshot.reserves[i]
                .checked_mul(rates[i])
                .ok_or_else(|| overflow("normalised reserves"))?;
        }

        let ann = snapshot
            .amplification
            .checked_mul(U256::from(N_COINS))
            .ok_or_else(|| overflow("Ann"))?;
        let d = compute_d(xp, ann)?;
        Ok((rates, xp, ann, d))
    }
}

impl PricingAdapter for StableSwapPricer {
    fn spot_price(&self, snapshot: &PoolSnapshot, direction: SwapDirection) -> Result<f64, SnapshotError> {
        let (_, xp, ann, d) = self.state(snapshot)?;
        let (i, j) = direction.indices();

        // -dy/dx of Ann*S + D = Ann*D + D^3 / (4*x*y)
        let scale = 1e18;
        let (x, y, d, ann) = (to_f64(xp[i]) / scale, to_f64(xp[j]) / scale, to_f64(d) / scale, to_f64(ann));
        let d3 = d * d * d;
        let dx = ann + d3 / (4.0 * x * x * y);
        let dy = ann + d3 / (4.0 * x * y * y);
        Ok(dx / dy)
    }

    fn estimate_output(
        &self,
        snapshot: &PoolSnapshot,
        direction: SwapDirection,
        amount_in: U256,
    ) -> Result<U256, SnapshotError> {
        let (rates, xp, ann, d) = self.state(snapshot)?;
        let (i, j) = direction.indices();

        let x = amount_in
            .checked_mul(rates[i])
            .and_then(|dx| dx.checked_add(xp[i]))
            .ok_or_else(|| overflow("input balance"))?;
        let y = compute_y(x, d, ann)?;

        // one wei of rounding in favour of the pool
        let dy = xp[j].saturating_sub(y).saturating_sub(U256::from(1u64));
        let fee = dy
            .checked_mul(snapshot.fees.trade)
            .ok_or_else(|| overflow("trade fee"))?
            / U256::from(FEE_DENOMINATOR);
        let out = dy
            .checked_sub(fee)
            .ok_or_else(|| SnapshotError::Pricing("trade fee exceeds output".to_string()))?;
        Ok(out / rates[j])
    }
}

// ============================================
// QUOTES
// ============================================

/// Priced view of one snapshot, selling token0 for token1
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub pool: String,
    /// Raw units of token0
    pub amount_in: U256,
    pub spot_price: Option<f64>,
    /// Raw units of token1 after fees
    pub estimated_output: Option<U256>,
    pub error: Option<String>,
}

/// Quote `whole_units` of token0 against `snapshot`
pub fn quote(pool: &PoolEntry, snapshot: &PoolSnapshot, whole_units: u64) -> PriceQuote {
    let pricer = StableSwapPricer::for_pool(pool);
    let amount_in = U256::from(whole_units)
        .saturating_mul(U256::from(10u64).pow(U256::from(pool.tokens[0].decimals)));

    let priced = pricer.spot_price(snapshot, SwapDirection::ZeroForOne).and_then(|spot| {
        pricer
            .estimate_output(snapshot, SwapDirection::ZeroForOne, amount_in)
            .map(|out| (spot, out))
    });

    match priced {
        Ok((spot, out)) => PriceQuote {
            pool: pool.name.clone(),
            amount_in,
            spot_price: Some(spot),
            estimated_output: Some(out),
            error: None,
        },
        Err(e) => PriceQuote {
            pool: pool.name.clone(),
            amount_in,
            spot_price: None,
            estimated_output: None,
            error: Some(e.attributed(Stage::Price, vec![pool.name.clone()]).to_string()),
        },
    }
}

/// Quotes for every pool of `report` that produced a snapshot, in pool order
pub fn quote_report(report: &SnapshotReport, pools: &[PoolEntry], whole_units: u64) -> Vec<PriceQuote> {
    pools
        .iter()
        .zip(&report.pools)
        .filter_map(|(pool, entry)| entry.outcome.as_ref().ok().map(|snapshot| quote(pool, snapshot, whole_units)))
        .collect()
}
