use {super::*, crate::decay::DecayingRate};

const SHARE_RATE_WINDOW: Duration = Duration::from_secs(300);

/// In-memory share accounting: pending-payout counters plus decaying
/// share-rate estimates, pool-wide and per address. Payout execution
/// lives elsewhere; only the counters the coordinator reads are kept
/// here.
pub(crate) struct ShareStore {
    inner: Mutex<Inner>,
}

struct Inner {
    started: bool,
    pool_rate: DecayingRate,
    total_pending: u64,
    miners: HashMap<String, MinerShares>,
}

struct MinerShares {
    rate: DecayingRate,
    pending: u64,
}

impl ShareStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                started: false,
                pool_rate: DecayingRate::new(SHARE_RATE_WINDOW),
                total_pending: 0,
                miners: HashMap::new(),
            }),
        }
    }

    pub(crate) async fn start(&self) {
        self.inner.lock().started = true;
        debug!("Share accounting started");
    }

    pub(crate) async fn stop(&self) {
        self.inner.lock().started = false;
        debug!("Share accounting stopped");
    }

    pub(crate) async fn submit_share(&self, public_address: &str) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if !inner.started {
            warn!("Dropping share for {public_address}: accounting not started");
            return;
        }

        inner.pool_rate.record(1.0, now);
        inner.total_pending += 1;

        let miner = inner
            .miners
            .entry(public_address.to_string())
            .or_insert_with(|| MinerShares {
                rate: DecayingRate::new(SHARE_RATE_WINDOW),
                pending: 0,
            });

        miner.rate.record(1.0, now);
        miner.pending += 1;
    }

    /// Shares per second, possibly fractional; pool-wide when no address
    /// is given.
    pub(crate) async fn share_rate(&self, public_address: Option<&str>) -> f64 {
        let now = Instant::now();
        let inner = self.inner.lock();

        match public_address {
            Some(address) => inner
                .miners
                .get(address)
                .map(|miner| miner.rate.value_at(now))
                .unwrap_or(0.0),
            None => inner.pool_rate.value_at(now),
        }
    }

    pub(crate) async fn shares_pending_payout(&self, public_address: Option<&str>) -> u64 {
        let inner = self.inner.lock();

        match public_address {
            Some(address) => inner
                .miners
                .get(address)
                .map(|miner| miner.pending)
                .unwrap_or(0),
            None => inner.total_pending,
        }
    }
}
