use super::*;

#[derive(Clone, Debug, Parser)]
pub(crate) struct PoolOptions {
    #[arg(long, help = "Pool <NAME> reported in status messages")]
    pub(crate) name: Option<String>,
    #[arg(long, help = "Constant share <DIFFICULTY>")]
    pub(crate) difficulty: Option<u64>,
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Seconds between status notifications, zero or less disables them"
    )]
    pub(crate) status_interval: Option<i64>,
    #[arg(long, help = "Listen on <ADDRESS> for miner connections")]
    pub(crate) address: Option<String>,
    #[arg(long, help = "Listen on <PORT> for miner connections")]
    pub(crate) port: Option<u16>,
    #[arg(long, help = "Node mining RPC <ENDPOINT> as host:port")]
    pub(crate) node: Option<String>,
    #[arg(long = "webhook-url", help = "Notify <URL> of pool events, repeatable")]
    pub(crate) webhook_urls: Vec<String>,
}

#[derive(Clone, Debug)]
pub(crate) struct Settings {
    pub(crate) name: String,
    pub(crate) difficulty: u64,
    pub(crate) status_interval: i64,
    pub(crate) address: String,
    pub(crate) port: u16,
    pub(crate) node: String,
    pub(crate) webhook_urls: Vec<String>,
}

impl Settings {
    pub(crate) fn from_options(options: PoolOptions) -> Result<Self> {
        let settings = Self {
            name: options.name.unwrap_or_else(|| "cinder".into()),
            difficulty: options.difficulty.unwrap_or(131_072),
            status_interval: options.status_interval.unwrap_or(0),
            address: options.address.unwrap_or_else(|| "0.0.0.0".into()),
            port: options.port.unwrap_or(42069),
            node: options.node.unwrap_or_else(|| "127.0.0.1:8020".into()),
            webhook_urls: options.webhook_urls,
        };

        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result {
        if self.difficulty == 0 {
            bail!("pool difficulty must be greater than zero");
        }

        if self.name.is_empty() {
            bail!("pool name must not be empty");
        }

        if self.node.is_empty() {
            bail!("node endpoint must not be empty");
        }

        Ok(())
    }

    /// The constant share threshold, fixed for the process lifetime.
    pub(crate) fn pool_target(&self) -> Target {
        Target::from_difficulty(U256::from(self.difficulty))
    }

    pub(crate) fn status_interval(&self) -> Option<Duration> {
        (self.status_interval > 0).then(|| Duration::from_secs(self.status_interval as u64))
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            name: "cinder-test".into(),
            difficulty: 131_072,
            status_interval: 0,
            address: "127.0.0.1".into(),
            port: 0,
            node: "127.0.0.1:0".into(),
            webhook_urls: Vec::new(),
        }
    }
}
