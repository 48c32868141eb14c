use super::*;

/// Floor for retargeting; the chain never issues work below this difficulty.
pub(crate) const MIN_DIFFICULTY: u64 = 131_072;

const BUCKET_SECONDS: u64 = 10;
const ADJUSTMENT_DENOMINATOR: u64 = 2048;
const MAX_BUCKET_PENALTY: i64 = 99;

/// A 256-bit proof-of-work target. A digest meets the target when its
/// big-endian numeric value is less than or equal to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Target(U256);

impl Target {
    pub const MAX: Target = Target(U256::MAX);

    pub fn from_difficulty(difficulty: U256) -> Self {
        if difficulty <= U256::one() {
            return Self::MAX;
        }

        // 2^256 / difficulty needs a 512-bit numerator.
        Self(low_half(
            (U512::one() << 256) / U512::from_big_endian(&difficulty.to_big_endian()),
        ))
    }

    pub fn difficulty(self) -> U256 {
        assert!(!self.0.is_zero(), "zero target has no difficulty");

        low_half((U512::one() << 256) / U512::from_big_endian(&self.0.to_big_endian()))
    }

    pub fn meets(self, digest: &[u8; 32]) -> bool {
        U256::from_big_endian(digest) <= self.0
    }

    pub fn as_u256(self) -> U256 {
        self.0
    }
}

impl From<U256> for Target {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0.to_big_endian()))
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).context("target must be hex")?;

        if bytes.len() != 32 {
            bail!("target must be 32 bytes, got {}", bytes.len());
        }

        Ok(Self(U256::from_big_endian(&bytes)))
    }
}

fn low_half(value: U512) -> U256 {
    let bytes = value.to_big_endian();

    if bytes[..32].iter().any(|&byte| byte != 0) {
        return U256::MAX;
    }

    U256::from_big_endian(&bytes[32..])
}

/// Difficulty for the next work unit, from the time elapsed since the
/// previous block. Every 10-second bucket past the first lowers the
/// difficulty by 1/2048th of the previous value, clamped at 99 buckets;
/// anything faster raises it by one step.
pub(crate) fn retarget(now_millis: u64, previous_millis: u64, previous_difficulty: U256) -> U256 {
    let elapsed = now_millis.saturating_sub(previous_millis) / 1000;
    let buckets = (elapsed / BUCKET_SECONDS).min(u64::MAX / 2) as i64;
    let sign = (1 - buckets).max(-MAX_BUCKET_PENALTY);

    let step = previous_difficulty / U256::from(ADJUSTMENT_DENOMINATOR);

    let adjusted = if sign >= 0 {
        previous_difficulty.saturating_add(step * U256::from(sign as u64))
    } else {
        previous_difficulty.saturating_sub(step * U256::from(sign.unsigned_abs()))
    };

    adjusted.max(U256::from(MIN_DIFFICULTY))
}
