use {
    anyhow::{Context, Error, anyhow, bail},
    arguments::Arguments,
    block_template::{BlockHeader, BlockTemplate, PreviousBlockInfo, TemplateUpdate},
    clap::Parser,
    coordinator::Coordinator,
    futures::{sink::SinkExt, stream::StreamExt},
    lru::LruCache,
    parking_lot::Mutex,
    primitive_types::{U256, U512},
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    settings::Settings,
    shares::ShareStore,
    status::{MinerStatus, PoolStatus},
    std::{
        collections::{BTreeMap, HashMap},
        fmt::{self, Display, Formatter},
        io,
        num::NonZeroUsize,
        process,
        str::FromStr,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
    stratum::{ClientInfo, StratumServer, Submission},
    submissions::SubmissionSet,
    target::Target,
    tokio::{
        net::TcpListener,
        runtime::Runtime,
        signal::ctrl_c,
        sync::mpsc,
        task::JoinHandle,
        time::{Instant, sleep_until},
    },
    tokio_util::{
        codec::{FramedRead, FramedWrite, LinesCodec},
        sync::CancellationToken,
    },
    tracing::{debug, error, info, warn},
    tracing_appender::non_blocking,
    tracing_subscriber::EnvFilter,
    upstream::{SubmitResult, Upstream},
    webhooks::Webhooks,
    work_cache::WorkCache,
};

mod arguments;
mod block_template;
mod coordinator;
mod decay;
mod hash_rate;
mod header;
mod settings;
mod shares;
mod status;
pub mod stratum;
mod subcommand;
mod submissions;
pub mod target;
mod upstream;
mod webhooks;
mod work_cache;

pub const USER_AGENT: &str = "cinder/0.1.0";

/// Epochs kept around for late submissions before they are evicted.
pub(crate) const WORK_CACHE_SIZE: usize = 12;
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub(crate) const RETARGET_DELAY: Duration = Duration::from_secs(10);
pub(crate) const MAX_MESSAGE_SIZE: usize = 32 * 1024;
pub(crate) const SUBMISSION_QUEUE_SIZE: usize = 256;

type Result<T = (), E = Error> = std::result::Result<T, E>;

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

pub fn main() {
    let (writer, _guard) = non_blocking(io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(writer)
        .init();

    let args = Arguments::parse();

    Runtime::new()
        .expect("Failed to create tokio runtime")
        .block_on(async {
            let cancel_token = CancellationToken::new();

            tokio::spawn({
                let cancel_token = cancel_token.clone();
                async move {
                    if ctrl_c().await.is_ok() {
                        info!("Received shutdown signal (ctrl-c)");
                        cancel_token.cancel();
                    }
                }
            });

            match args.run(cancel_token).await {
                Err(err) => {
                    error!("error: {err:#}");
                    process::exit(1);
                }
                Ok(_) => {
                    process::exit(0);
                }
            }
        });
}
