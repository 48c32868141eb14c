use super::*;

/// Fans pool lifecycle events out to configured HTTP endpoints. Delivery
/// failures are logged and never bubble up into the coordinator.
pub(crate) struct Webhooks {
    targets: Vec<String>,
    client: reqwest::Client,
    #[cfg(test)]
    recorded: Mutex<Vec<String>>,
}

impl Webhooks {
    pub(crate) fn new(targets: Vec<String>) -> Self {
        Self {
            targets,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
            #[cfg(test)]
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub(crate) async fn pool_connected(&self) {
        self.notify("poolConnected", json!({})).await;
    }

    pub(crate) async fn pool_disconnected(&self) {
        self.notify("poolDisconnected", json!({})).await;
    }

    pub(crate) async fn pool_submitted_block(&self, hash: &str, hash_rate: f64, miners: u64) {
        self.notify(
            "poolSubmittedBlock",
            json!({ "hash": hash, "hashRate": hash_rate, "miners": miners }),
        )
        .await;
    }

    pub(crate) async fn pool_status(&self, status: &PoolStatus) {
        self.notify("poolStatus", json!(status)).await;
    }

    async fn notify(&self, event: &str, payload: Value) {
        #[cfg(test)]
        self.recorded.lock().push(event.to_string());

        let body = json!({ "event": event, "payload": payload });

        for url in &self.targets {
            match self.client.post(url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Notified {url} of {event}");
                }
                Ok(response) => {
                    warn!("Webhook {url} returned {} for {event}", response.status());
                }
                Err(err) => {
                    warn!("Failed to notify webhook {url} of {event}: {err}");
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn recorded(&self) -> Vec<String> {
        self.recorded.lock().clone()
    }
}
