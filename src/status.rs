use super::*;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub name: String,
    /// Estimated pool-wide hashes per second.
    pub hash_rate: f64,
    pub miners: u64,
    pub shares_pending: u64,
    pub bans: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miner: Option<MinerStatus>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerStatus {
    pub public_address: String,
    pub hash_rate: f64,
    pub shares_pending: u64,
    pub miners: u64,
}

impl Display for PoolStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name={} hashrate={:.2}H/s miners={} pending={} bans={}",
            self.name, self.hash_rate, self.miners, self.shares_pending, self.bans
        )
    }
}
