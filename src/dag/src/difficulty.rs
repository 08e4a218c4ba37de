//! Difficulty retargeting along the main chain
//!
//! A windowed average: the targets of the last `window` main chain blocks
//! are averaged and scaled by how far the observed timespan drifted from
//! the expected one, with the adjustment clamped to `max_adjust` either way.

use crate::data::{big_to_compact, compact_to_big, PowType};
use crate::error::{DagError, Result};
use crate::meerdag::MeerDag;
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetargetParams {
    /// Main chain blocks per window
    pub window: u32,

    /// Expected seconds between main chain blocks
    pub target_spacing_secs: i64,

    /// Largest factor a single retarget may move the target by
    pub max_adjust: i64,

    /// Easiest allowed target, compact
    pub pow_limit_bits: u32,

    pub pow_type: PowType,
}

impl Default for RetargetParams {
    fn default() -> Self {
        RetargetParams {
            window: 60,
            target_spacing_secs: 30,
            max_adjust: 4,
            pow_limit_bits: crate::data::DEFAULT_DIFFICULTY,
            pow_type: PowType::Blake2bd,
        }
    }
}

/// Next bits from `(timestamp, bits)` samples, oldest first.
///
/// For hash based pow the compact value is a target and grows when blocks
/// come too slowly. For graph based pow it is a difficulty and moves the
/// other way.
pub fn retarget(samples: &[(i64, u32)], params: &RetargetParams) -> u32 {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return params.pow_limit_bits;
    };
    if samples.len() < 2 {
        return last.1;
    }

    let mut sum = BigUint::zero();
    for (_, bits) in samples {
        sum += compact_to_big(*bits);
    }
    let average = sum / BigUint::from(samples.len());

    let expected = params.target_spacing_secs.max(1) * (samples.len() as i64 - 1);
    let max_adjust = params.max_adjust.max(1);
    let actual = (last.0 - first.0).clamp(expected / max_adjust, expected * max_adjust).max(1);

    let (num, den) = match params.pow_type {
        PowType::Cuckaroom => (expected as u64, actual as u64),
        PowType::Blake2bd | PowType::Keccak256 => (actual as u64, expected as u64),
    };
    let mut next = average * BigUint::from(num) / BigUint::from(den);

    let limit = compact_to_big(params.pow_limit_bits);
    match params.pow_type {
        // Difficulty never drops below the limit
        PowType::Cuckaroom if next < limit => next = limit,
        PowType::Blake2bd | PowType::Keccak256 if next > limit => next = limit,
        _ => {}
    }
    big_to_compact(&next)
}

impl MeerDag {
    /// Bits required of a block built on the current main chain tip
    pub fn next_required_bits(&self, params: &RetargetParams) -> Result<u32> {
        let inner = self.inner.read();
        let Some(tip) = inner.main_tip() else {
            return Ok(params.pow_limit_bits);
        };
        let window = params.window.max(2);
        let lowest = tip.height.saturating_sub(window - 1);

        let payloads = self.payloads();
        let mut samples = Vec::with_capacity(window as usize);
        for height in lowest..=tip.height {
            let id = inner
                .instance
                .main_chain_block(height)
                .ok_or_else(|| DagError::Fatal(format!("main chain has no block at height {}", height)))?;
            let data = payloads.payload(id, &inner.graph.expect_block(id)?.hash)?;
            samples.push((data.timestamp(), data.difficulty()));
        }
        Ok(retarget(&samples, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pow_type: PowType) -> RetargetParams {
        RetargetParams {
            window: 5,
            target_spacing_secs: 10,
            max_adjust: 4,
            pow_limit_bits: 0x2100ffff,
            pow_type,
        }
    }

    fn samples(spacing: i64, bits: u32) -> Vec<(i64, u32)> {
        (0..5).map(|i| (1_000 + i * spacing, bits)).collect()
    }

    #[test]
    fn test_on_schedule_keeps_bits() {
        let bits = 0x1d00ffff;
        assert_eq!(retarget(&samples(10, bits), &params(PowType::Blake2bd)), bits);
    }

    #[test]
    fn test_slow_blocks_ease_target() {
        let bits = 0x1d00ffff;
        let next = retarget(&samples(20, bits), &params(PowType::Blake2bd));
        assert_eq!(compact_to_big(next), compact_to_big(bits) * 2u32);
    }

    #[test]
    fn test_adjustment_is_clamped() {
        let bits = 0x1d00ffff;
        let next = retarget(&samples(1_000, bits), &params(PowType::Blake2bd));
        assert_eq!(compact_to_big(next), compact_to_big(bits) * 4u32);

        let next = retarget(&samples(0, bits), &params(PowType::Blake2bd));
        assert_eq!(compact_to_big(next), compact_to_big(bits) / 4u32);
    }

    #[test]
    fn test_graph_pow_moves_the_other_way() {
        let bits = 0x1d00ffff;
        let p = RetargetParams { pow_limit_bits: 0x0300ffff, ..params(PowType::Cuckaroom) };
        let next = retarget(&samples(5, bits), &p);
        assert_eq!(compact_to_big(next), compact_to_big(bits) * 2u32);
    }

    #[test]
    fn test_empty_window_uses_limit() {
        let p = params(PowType::Blake2bd);
        assert_eq!(retarget(&[], &p), p.pow_limit_bits);
        assert_eq!(retarget(&[(5, 0x1c00ffff)], &p), 0x1c00ffff);
    }
}
