pub mod stdout;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common::prelude::{FsSnapshotStore, RebroadcastPolicy, RepoHandle};

use crate::state::{AppState, BucketAcl};
use stdout::StdoutTransport;

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a running node needs, resolved from the app state
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub cache_path: PathBuf,
    /// Channel recorded for frames read from stdin
    pub channel: String,
    pub log_level: tracing::Level,
    pub buckets: Vec<BucketAcl>,
    pub rebroadcast_buckets: Vec<Vec<String>>,
    pub rebroadcast_channels: Vec<String>,
    pub policy: RebroadcastPolicy,
    pub cleanup_interval: Duration,
    pub sync_interval: Duration,
    pub rebroadcast_interval: Duration,
}

impl NodeConfig {
    pub fn from_state(state: &AppState, channel: &str) -> Self {
        let config = &state.config;
        // tokio intervals panic on a zero period
        let secs = |s: u64| Duration::from_secs(s.max(1));
        Self {
            cache_path: state.cache_path.clone(),
            channel: channel.to_string(),
            log_level: config.tracing_level(),
            buckets: config.buckets.clone(),
            rebroadcast_buckets: config.rebroadcast.buckets.clone(),
            rebroadcast_channels: config.rebroadcast.channels.clone(),
            policy: config.rebroadcast.policy,
            cleanup_interval: secs(config.cleanup_interval_secs),
            sync_interval: secs(config.sync_interval_secs),
            rebroadcast_interval: secs(config.rebroadcast_interval_secs),
        }
    }
}

/// Initialize logging and the panic handler. Logs go to stderr, stdout
///  carries outbound envelopes. The guard must outlive the node.
fn init_logging(level: tracing::Level) -> tracing_appender::non_blocking::WorkerGuard {
    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let stderr_env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stderr_writer)
        .with_filter(stderr_env_filter);

    tracing_subscriber::registry().with(stderr_layer).init();

    std::panic::set_hook(Box::new(|panic| match panic.location() {
        Some(loc) => tracing::error!(
            message = %panic,
            panic.file = loc.file(),
            panic.line = loc.line(),
        ),
        None => tracing::error!(message = %panic),
    }));
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        storage_version = common::store::STORAGE_VERSION,
        "node starting up"
    );

    stderr_guard
}

/// Fire `shutdown_tx` on the first SIGINT or SIGTERM
fn watch_signals(shutdown_tx: watch::Sender<()>) -> std::io::Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => tracing::debug!("SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::debug!("SIGTERM, shutting down"),
        }
        let _ = shutdown_tx.send(());
    }))
}

/// Wait for a signal or the end of input, then join all tasks with a timeout.
async fn shutdown_and_join(
    graceful_waiter: JoinHandle<()>,
    mut shutdown_rx: watch::Receiver<()>,
    handles: Vec<JoinHandle<()>>,
) {
    let _ = shutdown_rx.changed().await;
    graceful_waiter.abort();

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::error!(
            "Failed to shut down within {} seconds",
            FINAL_SHUTDOWN_TIMEOUT.as_secs()
        );
        std::process::exit(4);
    }
}

/// Runs a node until SIGINT/SIGTERM or until stdin closes.
///
/// - Loads the local cache and applies the configured bucket ACLs
/// - Applies every stdin line, either a JSON envelope or a bare wire message
/// - Periodically drops expired windows, rebroadcasts and saves the cache
pub async fn spawn_node(config: &NodeConfig) -> anyhow::Result<()> {
    let _guard = init_logging(config.log_level);
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let graceful_waiter =
        watch_signals(shutdown_tx.clone()).context("could not install signal handlers")?;

    let store = FsSnapshotStore::new(&config.cache_path);
    let repo = RepoHandle::open(&store).await;
    for acl in &config.buckets {
        repo.init_bucket(&acl.path, &acl.allowed);
    }
    tracing::info!(
        cache = %config.cache_path.display(),
        channel = %config.channel,
        "node ready"
    );

    let ingest_handle = tokio::spawn(ingest(
        repo.clone(),
        config.channel.clone(),
        shutdown_tx,
        shutdown_rx.clone(),
    ));
    let maintenance_handle = tokio::spawn(maintenance(
        repo,
        store,
        config.clone(),
        shutdown_rx.clone(),
    ));

    shutdown_and_join(
        graceful_waiter,
        shutdown_rx,
        vec![ingest_handle, maintenance_handle],
    )
    .await;
    Ok(())
}

async fn ingest(
    repo: RepoHandle,
    channel: String,
    shutdown_tx: watch::Sender<()>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    apply_line(&repo, &line, &channel);
                }
                Ok(None) => {
                    tracing::info!("input closed");
                    let _ = shutdown_tx.send(());
                    break;
                }
                Err(e) => {
                    tracing::error!("could not read input: {}", e);
                    let _ = shutdown_tx.send(());
                    break;
                }
            }
        }
    }
}

/// Feed one input line to the repo. Returns whether it was applied.
fn apply_line(repo: &RepoHandle, line: &str, channel: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }
    if line.starts_with('{') {
        repo.receive_envelope(line, channel)
    } else {
        repo.receive(line, channel)
    }
}

async fn maintenance(
    repo: RepoHandle,
    store: FsSnapshotStore,
    config: NodeConfig,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut cleanup = interval(config.cleanup_interval);
    let mut sync = interval(config.sync_interval);
    let mut rebroadcast = interval(config.rebroadcast_interval);
    for timer in [&mut cleanup, &mut sync, &mut rebroadcast] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // skip the immediate first tick
        timer.reset();
    }
    let transport = StdoutTransport;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = cleanup.tick() => repo.cleanup(),
            _ = sync.tick() => {
                if let Err(e) = repo.sync(&store).await {
                    tracing::warn!("could not write cache: {}", e);
                }
            }
            _ = rebroadcast.tick() => {
                let mut sent = 0;
                for path in &config.rebroadcast_buckets {
                    sent += repo.rebroadcast_to(
                        &transport,
                        path,
                        &config.rebroadcast_channels,
                        &config.policy,
                    );
                }
                if sent > 0 {
                    tracing::debug!(sent, "rebroadcast round");
                }
            }
        }
    }

    match repo.sync(&store).await {
        Ok(()) => tracing::info!("cache saved"),
        Err(e) => tracing::error!("final cache sync failed: {}", e),
    }
}
