use super::*;

/// A candidate block from the node. Only the header is inspected here;
/// everything else (transactions, note commitments, ...) rides along in
/// `extra` and round-trips unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub header: BlockHeader,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub previous_block_hash: String,
    /// 32-byte big-endian target, hex encoded.
    pub target: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    /// Miner-supplied nonce, hex encoded.
    pub randomness: String,
    /// Miner-supplied 32-byte tag, hex encoded.
    pub graffiti: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl BlockHeader {
    pub(crate) fn pow_target(&self) -> Result<Target> {
        self.target
            .parse()
            .with_context(|| format!("invalid header target `{}`", self.target))
    }
}

/// Head-of-chain details the node sends alongside each template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousBlockInfo {
    pub target: String,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateUpdate {
    pub template: BlockTemplate,
    pub previous_block: PreviousBlockInfo,
}
