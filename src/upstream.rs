use {
    super::*,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
        net::{
            TcpStream,
            tcp::{OwnedReadHalf, OwnedWriteHalf},
        },
        sync::oneshot,
    },
};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitResult {
    pub(crate) added: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<String>,
}

/// The seam between the coordinator and the node. The template stream and
/// the close signal collapse into `next_template`: `Some(Ok)` is a new
/// template, `Some(Err)` is fatal, `None` means the stream closed and a
/// reconnect is in order.
pub(crate) trait Upstream {
    fn mode(&self) -> &str;

    async fn try_connect(&mut self) -> bool;

    async fn next_template(&mut self) -> Option<Result<TemplateUpdate>>;

    async fn submit_block(&self, template: &BlockTemplate) -> Result<SubmitResult>;

    async fn close(&mut self);
}

/// Newline-delimited JSON client for the node's mining RPC: one
/// subscription request up front, pushed `blockTemplate` notifications,
/// and id-correlated `submitBlock` request/response pairs.
pub(crate) struct NodeClient {
    endpoint: String,
    request_ids: AtomicU64,
    connection: Option<NodeConnection>,
}

struct NodeConnection {
    writer: Arc<tokio::sync::Mutex<BufWriter<OwnedWriteHalf>>>,
    updates: mpsc::Receiver<Result<TemplateUpdate>>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    reader: JoinHandle<()>,
}

impl NodeClient {
    pub(crate) fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            request_ids: AtomicU64::new(0),
            connection: None,
        }
    }

    fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_frame(
        writer: &tokio::sync::Mutex<BufWriter<OwnedWriteHalf>>,
        frame: Value,
    ) -> Result {
        let mut writer = writer.lock().await;
        let frame = serde_json::to_string(&frame)? + "\n";
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn drop_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.reader.abort();

            for (_, sender) in connection.pending.lock().drain() {
                drop(sender);
            }

            let mut writer = connection.writer.lock().await;
            let _ = writer.shutdown().await;
        }
    }
}

impl Upstream for NodeClient {
    fn mode(&self) -> &str {
        "tcp"
    }

    async fn try_connect(&mut self) -> bool {
        self.drop_connection().await;

        let stream = match TcpStream::connect(&self.endpoint).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!("Node connect to {} failed: {err}", self.endpoint);
                return false;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            warn!("Failed to set nodelay on node connection: {err}");
        }

        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(tokio::sync::Mutex::new(BufWriter::new(write_half)));

        let (updates_tx, updates_rx) = mpsc::channel(16);
        let pending = Arc::new(Mutex::new(HashMap::new()));

        let reader = tokio::spawn(read_loop(
            BufReader::new(read_half),
            updates_tx,
            pending.clone(),
        ));

        let subscribe = json!({
            "id": self.next_request_id(),
            "method": "subscribeBlockTemplateStream",
            "body": { "agent": USER_AGENT },
        });

        if let Err(err) = Self::send_frame(&writer, subscribe).await {
            debug!("Node subscription failed: {err}");
            reader.abort();
            return false;
        }

        self.connection = Some(NodeConnection {
            writer,
            updates: updates_rx,
            pending,
            reader,
        });

        true
    }

    async fn next_template(&mut self) -> Option<Result<TemplateUpdate>> {
        match &mut self.connection {
            Some(connection) => connection.updates.recv().await,
            None => None,
        }
    }

    async fn submit_block(&self, template: &BlockTemplate) -> Result<SubmitResult> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| anyhow!("not connected to node"))?;

        let id = self.next_request_id();
        let (sender, receiver) = oneshot::channel();
        connection.pending.lock().insert(id, sender);

        let request = json!({
            "id": id,
            "method": "submitBlock",
            "body": template,
        });

        if let Err(err) = Self::send_frame(&connection.writer, request).await {
            connection.pending.lock().remove(&id);
            return Err(err).context("failed to send block to node");
        }

        let body = tokio::time::timeout(SUBMIT_TIMEOUT, receiver)
            .await
            .context("node did not answer block submission in time")?
            .context("node connection closed before answering block submission")?;

        serde_json::from_value(body).context("malformed submitBlock response from node")
    }

    async fn close(&mut self) {
        self.drop_connection().await;
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    updates: mpsc::Sender<Result<TemplateUpdate>>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
) {
    let mut line = String::new();

    loop {
        line.clear();

        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!("Node read error: {err}");
                break;
            }
        }

        let value = match serde_json::from_str::<Value>(&line) {
            Ok(value) => value,
            Err(err) => {
                let _ = updates
                    .send(Err(anyhow!("invalid message from node: {err}")))
                    .await;
                break;
            }
        };

        if value.get("method").and_then(Value::as_str) == Some("blockTemplate") {
            let body = value.get("body").cloned().unwrap_or(Value::Null);

            match serde_json::from_value::<TemplateUpdate>(body) {
                Ok(update) => {
                    if updates.send(Ok(update)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = updates
                        .send(Err(anyhow!("malformed block template from node: {err}")))
                        .await;
                    break;
                }
            }
        } else if let Some(id) = value.get("id").and_then(Value::as_u64) {
            let sender = pending.lock().remove(&id);

            match sender {
                Some(sender) => {
                    let _ = sender.send(value.get("body").cloned().unwrap_or(Value::Null));
                }
                None => warn!("Unmatched response id {id} from node"),
            }
        } else {
            warn!("Unhandled message from node: {}", line.trim());
        }
    }

    // Dropping `updates` ends the template stream; the coordinator sees
    // the close and reconnects.
    for (_, sender) in pending.lock().drain() {
        drop(sender);
    }
}

#[cfg(test)]
mod tests {
    use {super::*, tokio::net::TcpListener};

    fn update_frame() -> String {
        serde_json::json!({
            "method": "blockTemplate",
            "body": {
                "template": {
                    "header": {
                        "previousBlockHash": "aa".repeat(32),
                        "target": "ff".repeat(32),
                        "timestamp": 5,
                        "randomness": "00".repeat(8),
                        "graffiti": "00".repeat(32)
                    }
                },
                "previousBlock": { "target": "ff".repeat(32), "timestamp": 1 }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn connect_fails_when_node_is_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut client = NodeClient::new(endpoint);
        assert!(!client.try_connect().await);
    }

    #[tokio::test]
    async fn receives_template_updates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let node = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();

            // Wait for the subscription before pushing.
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert!(line.contains("subscribeBlockTemplateStream"));

            let frame = update_frame() + "\n";
            write_half.write_all(frame.as_bytes()).await.unwrap();
        });

        let mut client = NodeClient::new(endpoint);
        assert!(client.try_connect().await);

        let update = client.next_template().await.unwrap().unwrap();
        assert_eq!(update.previous_block.timestamp, 1);

        node.await.unwrap();

        // The node hung up after one update; the stream reports the close.
        assert!(client.next_template().await.is_none());
    }

    #[tokio::test]
    async fn submit_block_round_trips() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let node = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);

            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();

            line.clear();
            reader.read_line(&mut line).await.unwrap();
            let request = serde_json::from_str::<Value>(&line).unwrap();
            assert_eq!(request["method"], "submitBlock");

            let response = serde_json::json!({
                "id": request["id"],
                "body": { "added": false, "reason": "stale" },
            })
            .to_string()
                + "\n";
            write_half.write_all(response.as_bytes()).await.unwrap();

            // Keep the socket open until the client is done reading.
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let mut client = NodeClient::new(endpoint);
        assert!(client.try_connect().await);

        let template = BlockTemplate {
            header: BlockHeader {
                previous_block_hash: "aa".repeat(32),
                target: "ff".repeat(32),
                timestamp: 5,
                randomness: "00".repeat(8),
                graffiti: "00".repeat(32),
                extra: BTreeMap::new(),
            },
            extra: BTreeMap::new(),
        };

        let result = client.submit_block(&template).await.unwrap();
        assert!(!result.added);
        assert_eq!(result.reason.as_deref(), Some("stale"));

        client.close().await;
        node.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_template_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let node = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();

            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();

            // Template without previousBlock: a protocol violation.
            let frame = serde_json::json!({
                "method": "blockTemplate",
                "body": { "template": { "header": {
                    "previousBlockHash": "aa".repeat(32),
                    "target": "ff".repeat(32),
                    "timestamp": 5,
                    "randomness": "00".repeat(8),
                    "graffiti": "00".repeat(32)
                }}},
            })
            .to_string()
                + "\n";
            write_half.write_all(frame.as_bytes()).await.unwrap();

            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let mut client = NodeClient::new(endpoint);
        assert!(client.try_connect().await);

        let item = client.next_template().await.unwrap();
        assert!(item.is_err());

        node.await.unwrap();
    }
}
