use super::*;

/// Fixed-point scale carrying six fractional digits of the share rate
/// through the 256-bit multiply.
const RATE_PRECISION: u64 = 1_000_000;

/// Hashes per second implied by a share rate at the pool's constant
/// difficulty: `rate × difficulty`. The rate is scaled to an integer
/// first so the product is exact in 256-bit arithmetic; only the final
/// conversion to f64 rounds.
pub(crate) fn hashes_per_second(share_rate: f64, difficulty: U256) -> f64 {
    if !share_rate.is_finite() || share_rate <= 0.0 {
        return 0.0;
    }

    let scaled = (share_rate * RATE_PRECISION as f64).round();

    if scaled < 1.0 {
        return 0.0;
    }

    let product = difficulty.saturating_mul(U256::from(scaled as u128));
    let precision = U256::from(RATE_PRECISION);

    u256_to_f64(product / precision) + (product % precision).as_u64() as f64 / RATE_PRECISION as f64
}

pub(crate) fn u256_to_f64(value: U256) -> f64 {
    value
        .to_big_endian()
        .iter()
        .fold(0.0, |acc, &byte| acc * 256.0 + byte as f64)
}
