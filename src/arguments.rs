use {super::*, crate::subcommand::Subcommand};

#[derive(Debug, Parser)]
#[command(version, about = "Mining pool coordination server")]
pub(crate) struct Arguments {
    #[command(subcommand)]
    pub(crate) subcommand: Subcommand,
}

impl Arguments {
    pub(crate) async fn run(self, cancel_token: CancellationToken) -> Result {
        self.subcommand.run(cancel_token).await
    }
}
