use {
    super::*,
    tokio::time::{MissedTickBehavior, interval},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionState {
    NeverConnected,
    Connected,
    Reconnecting,
}

struct ChainHead {
    target: Target,
    timestamp: u64,
}

enum Wake {
    Cancelled,
    Template(Option<Result<TemplateUpdate>>),
    Submission(Submission),
    Retarget,
    Status,
    Retry,
}

/// The pool's work-distribution engine. Owns every piece of coordination
/// state (request counter, chain head, work cache, submission deduper)
/// inside a single task; collaborators are reached through awaited calls,
/// so none of it needs locking.
pub(crate) struct Coordinator<U: Upstream> {
    settings: Arc<Settings>,
    upstream: U,
    server: Arc<StratumServer>,
    shares: Arc<ShareStore>,
    webhooks: Arc<Webhooks>,
    submissions: mpsc::Receiver<Submission>,
    pool_target: Target,
    pool_difficulty: U256,
    next_request_id: u64,
    head: Option<ChainHead>,
    work_cache: WorkCache,
    recent: SubmissionSet,
    connection: ConnectionState,
    retarget_at: Option<Instant>,
}

impl<U: Upstream> Coordinator<U> {
    pub(crate) fn new(
        settings: Arc<Settings>,
        upstream: U,
        server: Arc<StratumServer>,
        shares: Arc<ShareStore>,
        webhooks: Arc<Webhooks>,
        submissions: mpsc::Receiver<Submission>,
    ) -> Self {
        let pool_difficulty = U256::from(settings.difficulty);

        Self {
            pool_target: Target::from_difficulty(pool_difficulty),
            pool_difficulty,
            settings,
            upstream,
            server,
            shares,
            webhooks,
            submissions,
            next_request_id: 0,
            head: None,
            work_cache: WorkCache::new(),
            recent: SubmissionSet::new(),
            connection: ConnectionState::NeverConnected,
            retarget_at: None,
        }
    }

    /// Runs until cancelled or until the template stream fails fatally,
    /// then tears down the listener, the upstream connection and share
    /// accounting. The request counter survives a rerun on the same value.
    pub(crate) async fn run(&mut self, cancel: CancellationToken) -> Result {
        self.shares.start().await;
        self.server.start().await?;

        info!(
            "Started pool `{}` with difficulty {}",
            self.settings.name, self.settings.difficulty
        );

        let result = self.drive(&cancel).await;

        self.upstream.close().await;
        self.server.stop();
        self.shares.stop().await;

        info!("Pool `{}` stopped", self.settings.name);

        result
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result {
        let mut status_timer = self.settings.status_interval().map(|period| {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer
        });

        'connect: loop {
            let mut warned = false;

            loop {
                if cancel.is_cancelled() {
                    return Ok(());
                }

                let connected = tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    connected = self.upstream.try_connect() => connected,
                };

                if cancel.is_cancelled() {
                    return Ok(());
                }

                if connected {
                    break;
                }

                if !warned {
                    warn!("Not connected to node, waiting for node to come online");
                    warned = true;
                }

                let retry_at = Instant::now() + RECONNECT_DELAY;

                loop {
                    let wake = tokio::select! {
                        _ = cancel.cancelled() => Wake::Cancelled,
                        _ = sleep_until(retry_at) => Wake::Retry,
                        submission = self.submissions.recv() => match submission {
                            Some(submission) => Wake::Submission(submission),
                            None => Wake::Cancelled,
                        },
                        _ = async { status_timer.as_mut().expect("status timer").tick().await },
                            if status_timer.is_some() => Wake::Status,
                    };

                    match wake {
                        Wake::Cancelled => return Ok(()),
                        Wake::Retry => break,
                        Wake::Submission(submission) => self.submit_work(submission).await,
                        Wake::Status => self.report_status().await,
                        Wake::Template(_) | Wake::Retarget => unreachable!(),
                    }
                }
            }

            match self.connection {
                ConnectionState::NeverConnected => {
                    info!("Connected to node via {}", self.upstream.mode());
                }
                ConnectionState::Connected | ConnectionState::Reconnecting => {
                    info!("Reconnected to node via {}", self.upstream.mode());
                }
            }

            self.connection = ConnectionState::Connected;
            self.webhooks.pool_connected().await;

            loop {
                let retarget_at = self.retarget_at;

                let wake = tokio::select! {
                    _ = cancel.cancelled() => Wake::Cancelled,
                    item = self.upstream.next_template() => Wake::Template(item),
                    submission = self.submissions.recv() => match submission {
                        Some(submission) => Wake::Submission(submission),
                        None => Wake::Cancelled,
                    },
                    _ = async { sleep_until(retarget_at.expect("retarget deadline")).await },
                        if retarget_at.is_some() => Wake::Retarget,
                    _ = async { status_timer.as_mut().expect("status timer").tick().await },
                        if status_timer.is_some() => Wake::Status,
                };

                match wake {
                    Wake::Cancelled => return Ok(()),
                    Wake::Template(Some(Ok(update))) => self.ingest(update)?,
                    Wake::Template(Some(Err(err))) => {
                        error!("Block template stream failed: {err:#}");
                        return Err(err);
                    }
                    Wake::Template(None) => {
                        warn!("Disconnected from node");
                        self.retarget_at = None;
                        self.server.wait_for_work();
                        self.webhooks.pool_disconnected().await;
                        self.connection = ConnectionState::Reconnecting;
                        continue 'connect;
                    }
                    Wake::Submission(submission) => self.submit_work(submission).await,
                    Wake::Retarget => {
                        self.retarget_at = None;
                        self.recalculate_target();
                    }
                    Wake::Status => self.report_status().await,
                    Wake::Retry => unreachable!(),
                }
            }
        }
    }

    /// A fresh template from the node: remember the chain head for
    /// retargeting, rearm the retarget timer, and hand the work out.
    fn ingest(&mut self, update: TemplateUpdate) -> Result {
        self.retarget_at = Some(Instant::now() + RETARGET_DELAY);

        let target = update
            .previous_block
            .target
            .parse::<Target>()
            .context("node sent an invalid previous block target")?;

        self.head = Some(ChainHead {
            target,
            timestamp: update.previous_block.timestamp,
        });

        debug!(
            "New block template building on {}",
            update.template.header.previous_block_hash
        );

        self.distribute_new_block(update.template);

        Ok(())
    }

    fn distribute_new_block(&mut self, template: BlockTemplate) {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        self.work_cache.insert(request_id, template.clone());

        // The deduper must be empty before any miner can race the
        // broadcast with a submission for the new work unit.
        self.recent.reset();

        self.server.new_work(request_id, &template);

        info!("Distributing work unit {request_id}");
    }

    /// Fires 10 seconds after the last template. Recomputes the difficulty
    /// from time elapsed since the previous block; when it moved, rewrites
    /// the current work unit's target and timestamp and reissues it under
    /// a fresh request id.
    fn recalculate_target(&mut self) {
        let Some(head) = &self.head else {
            return;
        };

        let now = now_millis();
        let difficulty = target::retarget(now, head.timestamp, head.target.difficulty());
        let new_target = Target::from_difficulty(difficulty);

        let Some(current_id) = self.next_request_id.checked_sub(1) else {
            return;
        };

        let Some(template) = self.work_cache.get_mut(current_id) else {
            return;
        };

        let unchanged = template
            .header
            .pow_target()
            .map(|current| current == new_target)
            .unwrap_or(false);

        if unchanged {
            // Reissuing identical work would only reset miner search space.
            debug!("Target unchanged for work unit {current_id}");
            return;
        }

        template.header.target = new_target.to_string();
        template.header.timestamp = now;
        let retargeted = template.clone();

        debug!("Recalculated target for work unit {current_id}");

        self.distribute_new_block(retargeted);
    }

    /// Validates one miner submission: staleness, duplicates, then
    /// proof-of-work against both the chain target (block) and the pool
    /// target (share). A submission can be both.
    async fn submit_work(&mut self, submission: Submission) {
        let Submission {
            client,
            mining_request_id,
            randomness,
        } = submission;

        if self.next_request_id.checked_sub(1) != Some(mining_request_id) {
            debug!(
                "Client {} submitted for stale work unit {mining_request_id}",
                client.id
            );
            return;
        }

        let Some(template) = self.work_cache.get(mining_request_id) else {
            warn!("Work unit {mining_request_id} is no longer cached");
            return;
        };

        // Miner-specific fields go on a copy; the cached original stays
        // untouched.
        let mut template = template.clone();

        if self.recent.is_duplicate(client.id, &randomness) {
            warn!(
                "Client {} resubmitted randomness {randomness}",
                client.id
            );
            return;
        }

        self.recent.record(client.id, randomness.clone());

        template.header.graffiti = client.graffiti.clone();
        template.header.randomness = randomness;

        let bytes = match header::serialize_mineable_header(&template.header) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    "Client {} submitted an unserializable header: {err}",
                    client.id
                );
                self.server.punish(client.id, "malformed submission");
                return;
            }
        };

        let digest = header::hash_mineable_header(&bytes);

        let block_target = match template.header.pow_target() {
            Ok(target) => target,
            Err(err) => {
                warn!("Work unit {mining_request_id} carries a bad target: {err:#}");
                return;
            }
        };

        if block_target.meets(&digest) {
            let hash = hex::encode(digest);
            info!("Block {hash} found by {}", client.public_address);

            match self.upstream.submit_block(&template).await {
                Ok(SubmitResult { added: true, .. }) => {
                    let hash_rate = self.estimate_hash_rate(None).await;
                    let miners = self.server.miner_count();

                    info!("Block {hash} accepted by node");

                    self.webhooks
                        .pool_submitted_block(&hash, hash_rate, miners)
                        .await;
                }
                Ok(SubmitResult { added: false, reason }) => {
                    info!(
                        "Block {hash} rejected by node: {}",
                        reason.unwrap_or_else(|| "no reason given".into())
                    );
                }
                Err(err) => warn!("Failed to submit block {hash}: {err:#}"),
            }
        }

        if self.pool_target.meets(&digest) {
            self.shares.submit_share(&client.public_address).await;
            debug!("Share accepted from {}", client.public_address);
        }
    }

    pub(crate) async fn estimate_hash_rate(&self, public_address: Option<&str>) -> f64 {
        hash_rate::hashes_per_second(
            self.shares.share_rate(public_address).await,
            self.pool_difficulty,
        )
    }

    pub(crate) async fn status(&self, public_address: Option<&str>) -> PoolStatus {
        let (rate, pending) = tokio::join!(
            self.shares.share_rate(None),
            self.shares.shares_pending_payout(None),
        );

        let mut status = PoolStatus {
            name: self.settings.name.clone(),
            hash_rate: hash_rate::hashes_per_second(rate, self.pool_difficulty),
            miners: self.server.miner_count(),
            shares_pending: pending,
            bans: self.server.peers().ban_count(),
            miner: None,
        };

        if let Some(address) = public_address {
            let (rate, pending) = tokio::join!(
                self.shares.share_rate(Some(address)),
                self.shares.shares_pending_payout(Some(address)),
            );

            status.miner = Some(MinerStatus {
                public_address: address.into(),
                hash_rate: hash_rate::hashes_per_second(rate, self.pool_difficulty),
                shares_pending: pending,
                miners: self.server.miner_count_for(address),
            });
        }

        status
    }

    async fn report_status(&self) {
        let status = self.status(None).await;
        info!("{status}");
        self.webhooks.pool_status(&status).await;
    }
}
