use {super::*, std::net::SocketAddr, tokio::net::TcpStream};

/// What the coordinator needs to know about a subscribed miner when it
/// validates a submission.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ClientInfo {
    pub(crate) id: u64,
    pub(crate) public_address: String,
    pub(crate) graffiti: String,
}

/// A miner's answer to a work unit, handed to the coordinator over the
/// submission channel.
#[derive(Clone, Debug)]
pub(crate) struct Submission {
    pub(crate) client: ClientInfo,
    pub(crate) mining_request_id: u64,
    pub(crate) randomness: String,
}

/// Ban bookkeeping for misbehaving miners.
pub(crate) struct Peers {
    bans: AtomicU64,
}

impl Peers {
    fn new() -> Self {
        Self {
            bans: AtomicU64::new(0),
        }
    }

    pub(crate) fn ban_count(&self) -> u64 {
        self.bans.load(Ordering::Relaxed)
    }

    fn record_ban(&self) {
        self.bans.fetch_add(1, Ordering::Relaxed);
    }
}

struct ClientHandle {
    info: ClientInfo,
    subscribed: bool,
    sender: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

struct Inner {
    clients: HashMap<u64, ClientHandle>,
    /// Set while the upstream is gone; new work clears it.
    waiting: bool,
    current: Option<(u64, BlockTemplate)>,
    listener: Option<(CancellationToken, JoinHandle<()>)>,
}

/// The framed TCP server miners connect to. Subscribed clients receive
/// work broadcasts; their submissions are forwarded to the coordinator
/// without interpretation.
pub(crate) struct StratumServer {
    settings: Arc<Settings>,
    pool_target: Target,
    submissions: mpsc::Sender<Submission>,
    inner: Mutex<Inner>,
    peers: Peers,
    next_client_id: AtomicU64,
    next_message_id: AtomicU64,
}

impl StratumServer {
    pub(crate) fn new(settings: Arc<Settings>, submissions: mpsc::Sender<Submission>) -> Self {
        Self {
            pool_target: settings.pool_target(),
            settings,
            submissions,
            inner: Mutex::new(Inner {
                clients: HashMap::new(),
                waiting: false,
                current: None,
                listener: None,
            }),
            peers: Peers::new(),
            next_client_id: AtomicU64::new(1),
            next_message_id: AtomicU64::new(1),
        }
    }

    pub(crate) async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let listener =
            TcpListener::bind((self.settings.address.as_str(), self.settings.port))
                .await
                .with_context(|| {
                    format!(
                        "failed to bind stratum listener on {}:{}",
                        self.settings.address, self.settings.port
                    )
                })?;

        let local_addr = listener.local_addr()?;
        info!("Listening for miners on {local_addr}");

        let cancel = CancellationToken::new();
        let server = self.clone();
        let accept_cancel = cancel.clone();
        let handle = tokio::spawn(async move { server.accept_loop(listener, accept_cancel).await });

        self.inner.lock().listener = Some((cancel, handle));

        Ok(local_addr)
    }

    pub(crate) fn stop(&self) {
        let mut inner = self.inner.lock();

        if let Some((cancel, _handle)) = inner.listener.take() {
            cancel.cancel();
        }

        for (_, client) in inner.clients.drain() {
            client.cancel.cancel();
        }

        inner.current = None;
        inner.waiting = false;
    }

    /// Broadcast a work unit to every subscribed miner and remember it for
    /// late subscribers.
    pub(crate) fn new_work(&self, request_id: u64, template: &BlockTemplate) {
        let frame = self.frame(
            "mining.notify",
            NotifyBody {
                mining_request_id: request_id,
                header: template.header.clone(),
            },
        );

        let mut inner = self.inner.lock();
        inner.waiting = false;
        inner.current = Some((request_id, template.clone()));

        for client in inner.clients.values().filter(|client| client.subscribed) {
            let _ = client.sender.send(frame.clone());
        }
    }

    /// The upstream dropped; tell miners to idle and stop handing the
    /// stale work unit to new subscribers.
    pub(crate) fn wait_for_work(&self) {
        let frame = serde_json::to_string(&StratumMessage {
            id: self.next_message_id.fetch_add(1, Ordering::Relaxed),
            method: "mining.wait_for_work".into(),
            body: None,
        })
        .expect("message serialization should not fail");

        let mut inner = self.inner.lock();
        inner.waiting = true;
        inner.current = None;

        for client in inner.clients.values().filter(|client| client.subscribed) {
            let _ = client.sender.send(frame.clone());
        }
    }

    pub(crate) fn clients(&self) -> Vec<ClientInfo> {
        self.inner
            .lock()
            .clients
            .values()
            .filter(|client| client.subscribed)
            .map(|client| client.info.clone())
            .collect()
    }

    pub(crate) fn miner_count(&self) -> u64 {
        self.clients().len() as u64
    }

    pub(crate) fn miner_count_for(&self, public_address: &str) -> u64 {
        self.clients()
            .iter()
            .filter(|client| client.public_address == public_address)
            .count() as u64
    }

    /// Disconnect a misbehaving miner and count the ban.
    pub(crate) fn punish(&self, client_id: u64, reason: &str) {
        let removed = self.inner.lock().clients.remove(&client_id);

        if let Some(client) = removed {
            warn!(
                "Punishing client {} ({}): {reason}",
                client.info.id, client.info.public_address
            );
            client.cancel.cancel();
            self.peers.record_ban();
        }
    }

    pub(crate) fn peers(&self) -> &Peers {
        &self.peers
    }

    #[cfg(test)]
    pub(crate) fn is_waiting(&self) -> bool {
        self.inner.lock().waiting
    }

    #[cfg(test)]
    pub(crate) fn insert_test_client(
        &self,
        public_address: &str,
        graffiti: &str,
    ) -> (ClientInfo, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);

        let info = ClientInfo {
            id,
            public_address: public_address.into(),
            graffiti: graffiti.into(),
        };

        self.inner.lock().clients.insert(
            id,
            ClientHandle {
                info: info.clone(),
                subscribed: true,
                sender,
                cancel: CancellationToken::new(),
            },
        );

        (info, receiver)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            warn!("Failed to set nodelay for {peer}: {err}");
                        }

                        let server = self.clone();
                        let client_cancel = cancel.child_token();

                        tokio::spawn(async move {
                            if let Err(err) = server.serve_client(stream, peer, client_cancel).await {
                                debug!("Miner connection {peer} ended: {err:#}");
                            }
                        });
                    }
                    Err(err) => warn!("Failed to accept miner connection: {err}"),
                }
            }
        }
    }

    async fn serve_client(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) -> Result {
        debug!("Accepted miner connection from {peer}");

        let (reader, writer) = stream.into_split();
        let mut reader = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE));
        let mut writer = FramedWrite::new(writer, LinesCodec::new());

        let (sender, mut outbound) = mpsc::unbounded_channel::<String>();
        let client_id = self.register(sender, cancel.clone());

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(err) = writer.send(frame).await {
                            break Err(anyhow!("write to {peer} failed: {err}"));
                        }
                    }
                    None => break Ok(()),
                },
                line = reader.next() => match line {
                    Some(Ok(line)) => {
                        if let Err(err) = self.handle_frame(client_id, peer, &line) {
                            break Err(err);
                        }
                    }
                    Some(Err(err)) => break Err(anyhow!("read from {peer} failed: {err}")),
                    None => {
                        debug!("Miner {peer} disconnected");
                        break Ok(());
                    }
                },
            }
        };

        self.inner.lock().clients.remove(&client_id);

        result
    }

    fn register(&self, sender: mpsc::UnboundedSender<String>, cancel: CancellationToken) -> u64 {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);

        self.inner.lock().clients.insert(
            id,
            ClientHandle {
                info: ClientInfo {
                    id,
                    public_address: String::new(),
                    graffiti: String::new(),
                },
                subscribed: false,
                sender,
                cancel,
            },
        );

        id
    }

    fn handle_frame(&self, client_id: u64, peer: SocketAddr, line: &str) -> Result {
        let message = serde_json::from_str::<StratumMessage>(line)
            .map_err(|err| anyhow!("invalid message from {peer}: {err}; line={line:?}"))?;

        match message.method.as_str() {
            "mining.subscribe" => {
                let body = serde_json::from_value::<SubscribeBody>(
                    message.body.unwrap_or(Value::Null),
                )
                .map_err(|err| anyhow!("invalid subscription from {peer}: {err}"))?;

                debug!("SUBSCRIBE from {peer} as {}", body.public_address);

                let mut inner = self.inner.lock();

                let Some(client) = inner.clients.get_mut(&client_id) else {
                    return Ok(());
                };

                client.info.public_address = body.public_address;
                client.info.graffiti = body.graffiti;
                client.subscribed = true;

                let subscribed = serde_json::to_string(&StratumMessage::new(
                    message.id,
                    "mining.subscribed",
                    SubscribedBody {
                        client_id,
                        target: self.pool_target.to_string(),
                    },
                ))
                .expect("message serialization should not fail");

                let _ = client.sender.send(subscribed);

                if !inner.waiting {
                    if let Some((request_id, template)) = &inner.current {
                        let notify = self.frame(
                            "mining.notify",
                            NotifyBody {
                                mining_request_id: *request_id,
                                header: template.header.clone(),
                            },
                        );

                        if let Some(client) = inner.clients.get(&client_id) {
                            let _ = client.sender.send(notify);
                        }
                    }
                }
            }
            "mining.submit" => {
                let body = serde_json::from_value::<SubmitBody>(
                    message.body.unwrap_or(Value::Null),
                )
                .map_err(|err| anyhow!("invalid submission from {peer}: {err}"))?;

                let Some(client) = self
                    .inner
                    .lock()
                    .clients
                    .get(&client_id)
                    .filter(|client| client.subscribed)
                    .map(|client| client.info.clone())
                else {
                    warn!("Ignoring submission from unsubscribed miner {peer}");
                    return Ok(());
                };

                let submission = Submission {
                    client,
                    mining_request_id: body.mining_request_id,
                    randomness: body.randomness,
                };

                if self.submissions.try_send(submission).is_err() {
                    error!("Submission queue full, dropping submission from {peer}");
                }
            }
            method => {
                warn!("Unknown method {method} from {peer}");
            }
        }

        Ok(())
    }

    fn frame(&self, method: &str, body: impl Serialize) -> String {
        serde_json::to_string(&StratumMessage::new(
            self.next_message_id.fetch_add(1, Ordering::Relaxed),
            method,
            body,
        ))
        .expect("message serialization should not fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server() -> (Arc<StratumServer>, mpsc::Receiver<Submission>) {
        let (submissions_tx, submissions_rx) = mpsc::channel(SUBMISSION_QUEUE_SIZE);
        let server = Arc::new(StratumServer::new(
            Arc::new(Settings::for_tests()),
            submissions_tx,
        ));
        (server, submissions_rx)
    }

    fn template() -> BlockTemplate {
        BlockTemplate {
            header: BlockHeader {
                previous_block_hash: "aa".repeat(32),
                target: Target::MAX.to_string(),
                timestamp: 1,
                randomness: "00".repeat(8),
                graffiti: "00".repeat(32),
                extra: BTreeMap::new(),
            },
            extra: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn new_work_reaches_subscribed_clients() {
        let (server, _submissions) = test_server();
        let (_info, mut frames) = server.insert_test_client("miner-a", &"00".repeat(32));

        server.new_work(3, &template());

        let frame = frames.recv().await.unwrap();
        let message = serde_json::from_str::<StratumMessage>(&frame).unwrap();
        assert_eq!(message.method, "mining.notify");

        let body = serde_json::from_value::<NotifyBody>(message.body.unwrap()).unwrap();
        assert_eq!(body.mining_request_id, 3);
    }

    #[tokio::test]
    async fn wait_for_work_flag_clears_on_new_work() {
        let (server, _submissions) = test_server();
        let (_info, mut frames) = server.insert_test_client("miner-a", &"00".repeat(32));

        server.wait_for_work();
        assert!(server.is_waiting());

        let frame = frames.recv().await.unwrap();
        let message = serde_json::from_str::<StratumMessage>(&frame).unwrap();
        assert_eq!(message.method, "mining.wait_for_work");

        server.new_work(0, &template());
        assert!(!server.is_waiting());
    }

    #[tokio::test]
    async fn punish_disconnects_and_counts() {
        let (server, _submissions) = test_server();
        let (info, mut frames) = server.insert_test_client("miner-a", &"00".repeat(32));

        assert_eq!(server.peers().ban_count(), 0);
        assert_eq!(server.miner_count(), 1);

        server.punish(info.id, "testing");

        assert_eq!(server.peers().ban_count(), 1);
        assert_eq!(server.miner_count(), 0);
        assert!(frames.recv().await.is_none(), "sender should be dropped");

        // Punishing an already-removed client changes nothing.
        server.punish(info.id, "again");
        assert_eq!(server.peers().ban_count(), 1);
    }

    #[tokio::test]
    async fn miner_counts_group_by_address() {
        let (server, _submissions) = test_server();
        let _a1 = server.insert_test_client("miner-a", &"00".repeat(32));
        let _a2 = server.insert_test_client("miner-a", &"00".repeat(32));
        let _b = server.insert_test_client("miner-b", &"00".repeat(32));

        assert_eq!(server.miner_count(), 3);
        assert_eq!(server.miner_count_for("miner-a"), 2);
        assert_eq!(server.miner_count_for("miner-b"), 1);
        assert_eq!(server.miner_count_for("miner-c"), 0);
        assert_eq!(server.clients().len(), 3);
    }

    #[tokio::test]
    async fn subscribe_and_submit_over_tcp() {
        let (server, mut submissions) = test_server();
        let addr = server.start().await.unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        let mut reader = FramedRead::new(reader, LinesCodec::new());
        let mut writer = FramedWrite::new(writer, LinesCodec::new());

        let subscribe = serde_json::to_string(&StratumMessage::new(
            1,
            "mining.subscribe",
            SubscribeBody {
                public_address: "miner-a".into(),
                graffiti: "11".repeat(32),
            },
        ))
        .unwrap();
        writer.send(subscribe).await.unwrap();

        let response = reader.next().await.unwrap().unwrap();
        let message = serde_json::from_str::<StratumMessage>(&response).unwrap();
        assert_eq!(message.method, "mining.subscribed");
        assert_eq!(message.id, 1);

        let body = serde_json::from_value::<SubscribedBody>(message.body.unwrap()).unwrap();
        assert_eq!(body.target, Settings::for_tests().pool_target().to_string());

        let submit = serde_json::to_string(&StratumMessage::new(
            2,
            "mining.submit",
            SubmitBody {
                mining_request_id: 0,
                randomness: "00".repeat(8),
            },
        ))
        .unwrap();
        writer.send(submit).await.unwrap();

        let submission = submissions.recv().await.unwrap();
        assert_eq!(submission.client.public_address, "miner-a");
        assert_eq!(submission.mining_request_id, 0);
        assert_eq!(submission.randomness, "00".repeat(8));

        server.stop();
    }
}
