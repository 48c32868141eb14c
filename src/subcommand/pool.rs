use {super::*, crate::settings::PoolOptions, crate::upstream::NodeClient};

#[derive(Debug, Parser)]
pub(crate) struct Pool {
    #[command(flatten)]
    pub(crate) options: PoolOptions,
}

impl Pool {
    pub(crate) async fn run(self, cancel_token: CancellationToken) -> Result {
        let settings = Arc::new(Settings::from_options(self.options)?);

        let (submissions_tx, submissions_rx) = mpsc::channel(SUBMISSION_QUEUE_SIZE);

        let server = Arc::new(StratumServer::new(settings.clone(), submissions_tx));
        let shares = Arc::new(ShareStore::new());
        let webhooks = Arc::new(Webhooks::new(settings.webhook_urls.clone()));
        let upstream = NodeClient::new(settings.node.clone());

        let mut coordinator = Coordinator::new(
            settings,
            upstream,
            server,
            shares,
            webhooks,
            submissions_rx,
        );

        coordinator.run(cancel_token).await
    }
}
