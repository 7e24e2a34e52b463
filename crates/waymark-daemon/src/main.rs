//! Waymark Daemon - Background reminder engine
//!
//! This binary runs as a systemd user service and handles:
//! - Location acquisition and geofence evaluation
//! - Durable trigger delivery with redelivery on timeout
//! - Multi-device synchronization with the account's remote store
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! `main` loads the configuration and initializes tracing, then
//! `DaemonService::run` wires the adapters around the core service and
//! runs one task per concern:
//!
//! ```text
//! provider ──→ sampler ──→ evaluation ──→ trigger queue ──→ delivery
//!                              │                               │
//!                           service ←── store ─⇄─ sync engine ─⇄─ remote
//! ```
//!
//! All tasks share a `CancellationToken` that is triggered on receipt of
//! SIGTERM or SIGINT; after cancellation each task gets a grace period
//! to finish its current step.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use waymark_core::config::{Config, LoggingConfig, QueueConfig, SyncConfig};
use waymark_core::domain::newtypes::DeviceId;
use waymark_core::domain::PositionFix;
use waymark_core::ports::{
    ILocationProvider, IReminderObserver, IReminderStore, IRemoteStore, ITriggerQueue,
    ObserverRegistry, ReminderEvent,
};
use waymark_core::usecases::ReminderService;
use waymark_location::{GeoClueProvider, LocationSampler, ReplayProvider};
use waymark_remote::auth::resolve_token;
use waymark_remote::client::ApiClient;
use waymark_remote::provider::HttpRemoteStore;
use waymark_store::{DatabasePool, SqliteStore, StoreError};
use waymark_sync::engine::is_network_error;
use waymark_sync::{Backoff, SyncEngine, SyncScheduler};

// ============================================================================
// Constants
// ============================================================================

/// Capacity of the local-edit wake channel into the sync scheduler
const SYNC_WAKE_CAPACITY: usize = 16;

/// Capacity of the sampler-to-evaluation fix channel
const FIX_CHANNEL_CAPACITY: usize = 16;

/// Seconds between delivery queue polls
const DELIVERY_POLL_SECS: u64 = 5;

/// Seconds between acknowledged-trigger purges
const PURGE_INTERVAL_SECS: u64 = 3600;

/// Seconds between token re-checks while no API token is available
const TOKEN_RETRY_SECS: u64 = 30;

/// Milliseconds between sync-request flag polls
const SYNC_POLL_MS: u64 = 250;

/// Seconds tasks get to finish after the shutdown signal
const SHUTDOWN_GRACE_SECS: u64 = 5;

// ============================================================================
// DaemonService struct
// ============================================================================

/// Main daemon service that orchestrates evaluation, delivery and sync
///
/// Holds the configuration, the open store, the device identity and a
/// cancellation token for graceful shutdown.
struct DaemonService {
    /// Application configuration loaded from YAML
    config: Config,
    /// Stable identity of this device, stamped on every local edit
    device_id: DeviceId,
    /// SQLite store behind both the reminder and trigger queue ports
    store: Arc<SqliteStore>,
    /// Set when the startup integrity check failed; the sync stack then
    /// rebuilds local state from the remote store before syncing
    needs_rebuild: bool,
    /// Token for signalling graceful shutdown to all async tasks
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the database and loads the device identity
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let db_path = config.storage.db_path.clone();
        let pool = DatabasePool::new(&db_path)
            .await
            .context("Failed to open database")?;
        let store = Arc::new(
            SqliteStore::open(pool.pool().clone(), config.evaluator.grid_cell_m)
                .await
                .context("Failed to open reminder store")?,
        );

        let needs_rebuild = match store.integrity_check().await {
            Ok(()) => false,
            Err(StoreError::Corrupted(verdict)) => {
                warn!(
                    %verdict,
                    "Local database failed its integrity check, scheduling a rebuild \
                     from the remote store"
                );
                true
            }
            Err(err) => return Err(err).context("Database integrity check failed"),
        };

        let device_id = load_or_create_device_id(&db_path).await?;
        info!(device = %device_id, "Device identity loaded");

        Ok(Self {
            config,
            device_id,
            store,
            needs_rebuild,
            shutdown,
        })
    }

    // ========================================================================
    // DaemonService::run()
    // ========================================================================

    /// Runs the daemon until the shutdown token fires
    ///
    /// 1. Builds the reminder service over the store and trigger queue
    /// 2. Starts the configured location provider and the sampler
    /// 3. Spawns the evaluation and delivery tasks
    /// 4. Runs the sync stack in the foreground until cancelled
    /// 5. Stops the provider and joins every task with a grace period
    async fn run(&self) -> Result<()> {
        let observers = ObserverRegistry::new();
        observers.subscribe(Arc::new(LogObserver)).await;

        let (wake_tx, wake_rx) = mpsc::channel(SYNC_WAKE_CAPACITY);
        let service = Arc::new(ReminderService::new(
            self.store.clone(),
            self.store.clone(),
            observers.clone(),
            self.device_id,
            &self.config.evaluator,
            Some(wake_tx),
        ));

        let provider: Arc<dyn ILocationProvider> = match self.config.location.provider.as_str() {
            "replay" => {
                let script = self
                    .config
                    .location
                    .replay_path
                    .clone()
                    .context("location.replay_path is required when provider is 'replay'")?;
                info!(script = %script.display(), "Using replay location provider");
                Arc::new(ReplayProvider::new(script))
            }
            _ => {
                info!("Using GeoClue location provider");
                Arc::new(GeoClueProvider::new(self.config.location.clone()))
            }
        };
        let events = provider
            .start()
            .await
            .context("Failed to start location provider")?;

        let sampler = LocationSampler::new(&self.config.location, observers.clone());
        let (fix_tx, fix_rx) = mpsc::channel(FIX_CHANNEL_CAPACITY);
        let sampler_task = tokio::spawn(async move { sampler.run(events, fix_tx).await });

        let evaluation_task = tokio::spawn(run_evaluation(
            service.clone(),
            fix_rx,
            self.shutdown.clone(),
        ));

        let delivery_task = tokio::spawn(run_delivery(
            self.store.clone(),
            self.store.clone(),
            observers.clone(),
            self.config.queue.clone(),
            Duration::from_secs(DELIVERY_POLL_SECS),
            self.shutdown.clone(),
        ));

        info!("Waymark daemon running");

        // The sync stack runs in the foreground; it returns when the
        // shutdown token fires.
        self.run_sync(wake_rx, observers).await;

        info!("Shutdown signal received, stopping tasks");
        if let Err(err) = provider.stop().await {
            warn!(error = %err, "Stopping location provider failed");
        }

        let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
        for (name, handle) in [
            ("sampler", sampler_task),
            ("evaluation", evaluation_task),
            ("delivery", delivery_task),
        ] {
            await_task(name, handle, grace).await;
        }

        info!("Waymark daemon stopped");
        Ok(())
    }

    // ========================================================================
    // Sync stack
    // ========================================================================

    /// Brings up the remote client and sync engine, then runs sync
    /// cycles until shutdown
    ///
    /// Stays in a token re-check loop while no API token is available;
    /// local operation continues meanwhile. A corrupted local store is
    /// rebuilt from the remote before the first cycle, and pushes
    /// interrupted by a previous crash are reset.
    async fn run_sync(&self, wake_rx: mpsc::Receiver<()>, observers: ObserverRegistry) {
        let Some(token) = self.acquire_token().await else {
            return;
        };

        let client = ApiClient::with_base_url(token, self.config.remote.base_url.clone());
        let remote = Arc::new(HttpRemoteStore::new(client));

        match remote.ping().await {
            Ok(()) => info!(base_url = %self.config.remote.base_url, "Remote store reachable"),
            Err(err) if is_network_error(&err) => {
                info!("Remote store unreachable, starting offline");
            }
            Err(err) => warn!(error = %err, "Remote store ping failed"),
        }

        let engine = SyncEngine::new(
            self.store.clone(),
            remote,
            observers,
            self.device_id,
            &self.config.sync,
        );

        if self.needs_rebuild {
            match engine.rebuild_from_remote().await {
                Ok(report) => info!(
                    pulled = report.pulled,
                    "Local state rebuilt from the remote store"
                ),
                Err(err) => {
                    // The purge clears the cursor, so later cycles fall
                    // back to a full pull and converge once connected.
                    error!(error = %err, "Rebuild from the remote store failed");
                }
            }
        } else {
            match engine.reset_interrupted().await {
                Ok(0) => {}
                Ok(count) => info!(count, "Reset pushes interrupted by the previous run"),
                Err(err) => warn!(error = %err, "Resetting interrupted pushes failed"),
            }
        }

        let (mut scheduler, sync_requested) = SyncScheduler::new(
            wake_rx,
            Duration::from_secs(self.config.sync.debounce_secs),
            Duration::from_secs(self.config.sync.interval_secs),
            self.shutdown.clone(),
        );
        let scheduler_task = tokio::spawn(async move { scheduler.run().await });

        run_sync_cycles(&engine, &sync_requested, &self.config.sync, &self.shutdown).await;

        if let Err(err) = scheduler_task.await {
            warn!(error = %err, "Sync scheduler task failed");
        }
    }

    /// Resolves the API token, retrying until one appears or shutdown
    ///
    /// Checks the configuration, the environment and the system keyring
    /// on every attempt, so a token stored while the daemon is running
    /// is picked up without a restart. Returns `None` when cancelled.
    async fn acquire_token(&self) -> Option<String> {
        match resolve_token(&self.config.remote) {
            Ok(token) => return Some(token),
            Err(err) => {
                warn!(error = %err, "Sync is paused until an API token is available");
            }
        }

        let retry = Duration::from_secs(TOKEN_RETRY_SECS);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return None,
                () = tokio::time::sleep(retry) => {}
            }

            match resolve_token(&self.config.remote) {
                Ok(token) => {
                    info!("API token found, starting sync");
                    return Some(token);
                }
                Err(err) => debug!(error = %err, "API token still unavailable"),
            }
        }
    }
}

// ============================================================================
// Sync cycle runner
// ============================================================================

/// Polls the sync-request flag and runs engine cycles with backoff
///
/// The scheduler raises the flag; this loop clears it and runs one
/// cycle. A failed cycle backs off exponentially and re-raises the flag
/// so the retry happens without waiting for the next periodic tick. A
/// cycle dropped by shutdown leaves its rows in Syncing; they are
/// recovered by `reset_interrupted` on the next start.
async fn run_sync_cycles(
    engine: &SyncEngine,
    sync_requested: &AtomicBool,
    sync: &SyncConfig,
    cancel: &CancellationToken,
) {
    info!("Sync runner starting");

    let mut backoff = Backoff::from_config(sync);
    let mut poll = tokio::time::interval(Duration::from_millis(SYNC_POLL_MS));

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = poll.tick() => {}
        }

        if !sync_requested.swap(false, Ordering::AcqRel) {
            continue;
        }

        let outcome = tokio::select! {
            () = cancel.cancelled() => {
                info!("Sync cycle cancelled by shutdown");
                break;
            }
            outcome = engine.sync() => outcome,
        };

        match outcome {
            Ok(_) => backoff.record_success(),
            Err(err) => {
                let delay = backoff.record_failure();
                warn!(
                    error = %err,
                    retry_secs = delay.as_secs(),
                    "Sync cycle failed, backing off"
                );
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {
                        sync_requested.store(true, Ordering::Release);
                    }
                }
            }
        }
    }

    info!("Sync runner stopped");
}

// ============================================================================
// Evaluation task
// ============================================================================

/// Feeds sampled fixes through the reminder service
///
/// One fix at a time, in channel order. Transitions the evaluation
/// produces are enqueued by the service and picked up by the delivery
/// loop. Exits when the pipeline closes or the daemon shuts down.
async fn run_evaluation(
    service: Arc<ReminderService>,
    mut fixes: mpsc::Receiver<PositionFix>,
    cancel: CancellationToken,
) {
    info!("Evaluation task starting");

    loop {
        let fix = tokio::select! {
            () = cancel.cancelled() => break,
            fix = fixes.recv() => match fix {
                Some(fix) => fix,
                None => break,
            },
        };

        match service.handle_fix(fix).await {
            Ok(triggers) => {
                if !triggers.is_empty() {
                    debug!(count = triggers.len(), "Transitions enqueued for delivery");
                }
            }
            Err(err) => warn!(error = %err, "Fix evaluation failed"),
        }
    }

    info!("Evaluation task stopped");
}

// ============================================================================
// Delivery task
// ============================================================================

/// Drains the trigger queue to observers and redelivers on timeout
///
/// Every poll first returns expired deliveries to Pending, then
/// dequeues until the queue is empty. Each dequeued event is published
/// as `Triggered` and stays Delivered until a consumer acknowledges it,
/// so an unacknowledged event comes back after the retry timeout.
/// Acknowledged events are purged on a slower cadence.
async fn run_delivery(
    store: Arc<dyn IReminderStore>,
    queue: Arc<dyn ITriggerQueue>,
    observers: ObserverRegistry,
    config: QueueConfig,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        retry_timeout_secs = config.retry_timeout_secs,
        "Delivery task starting"
    );

    let retry_timeout = chrono::Duration::seconds(config.retry_timeout_secs as i64);
    let purge_after = chrono::Duration::days(i64::from(config.purge_acknowledged_after_days));
    let mut poll = tokio::time::interval(poll_interval);
    let mut purge = tokio::time::interval(Duration::from_secs(PURGE_INTERVAL_SECS));

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = poll.tick() => {
                match queue.requeue_expired(retry_timeout).await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "Requeued expired deliveries"),
                    Err(err) => warn!(error = %err, "Requeueing expired deliveries failed"),
                }
                deliver_pending(store.as_ref(), queue.as_ref(), &observers).await;
            }
            _ = purge.tick() => {
                match queue.purge_acknowledged(Utc::now() - purge_after).await {
                    Ok(0) => {}
                    Ok(count) => debug!(count, "Purged acknowledged triggers"),
                    Err(err) => warn!(error = %err, "Purging acknowledged triggers failed"),
                }
            }
        }
    }

    info!("Delivery task stopped");
}

/// Dequeues every Pending event and publishes it to observers
///
/// Triggers whose reminder no longer exists or is no longer active are
/// acknowledged without delivery, so the queue cannot loop on them.
async fn deliver_pending(
    store: &dyn IReminderStore,
    queue: &dyn ITriggerQueue,
    observers: &ObserverRegistry,
) {
    loop {
        let trigger = match queue.dequeue_next().await {
            Ok(Some(trigger)) => trigger,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "Dequeue failed");
                break;
            }
        };

        match store.get_reminder(trigger.reminder_id()).await {
            Ok(Some(reminder)) if reminder.is_active() => {
                info!(
                    reminder = %reminder.id(),
                    transition = trigger.transition().name(),
                    attempt = trigger.attempts(),
                    "Delivering trigger"
                );
                observers
                    .notify(&ReminderEvent::Triggered { reminder, trigger })
                    .await;
            }
            Ok(_) => {
                // The reminder was completed or deleted after the
                // crossing fired; retire the event.
                if let Err(err) = queue.acknowledge(trigger.id()).await {
                    warn!(error = %err, "Acknowledging an orphaned trigger failed");
                }
            }
            Err(err) => warn!(error = %err, "Loading reminder for trigger failed"),
        }
    }
}

// ============================================================================
// LogObserver
// ============================================================================

/// Writes engine events to the log
///
/// Stands in for the desktop notification surface: trigger deliveries,
/// conflicts and degradation signals all pass through here, so the
/// journal shows what a UI collaborator would have received.
struct LogObserver;

#[async_trait::async_trait]
impl IReminderObserver for LogObserver {
    async fn on_event(&self, event: &ReminderEvent) {
        match event {
            ReminderEvent::Triggered { reminder, trigger } => info!(
                reminder = %reminder.id(),
                title = reminder.title(),
                transition = trigger.transition().name(),
                "Reminder triggered"
            ),
            ReminderEvent::ConflictResolved {
                winner, remote_won, ..
            } => info!(
                reminder = %winner.id(),
                remote_won = *remote_won,
                "Sync conflict resolved"
            ),
            ReminderEvent::SyncDegraded {
                consecutive_failures,
            } => warn!(
                consecutive_failures = *consecutive_failures,
                "Sync degraded"
            ),
            ReminderEvent::SyncRecovered => info!("Sync recovered"),
            ReminderEvent::ProviderDegraded { reason } => {
                warn!(reason = %reason, "Location provider degraded");
            }
            ReminderEvent::ProviderRestored => info!("Location provider restored"),
            other => debug!(event = other.name(), "Engine event"),
        }
    }
}

// ============================================================================
// Device identity
// ============================================================================

/// Loads the device id stored next to the database, creating one on
/// first run
///
/// The id is stamped on every local edit and breaks merge ties, so it
/// must survive restarts. An unreadable file is replaced with a fresh
/// identity rather than failing startup.
async fn load_or_create_device_id(db_path: &Path) -> Result<DeviceId> {
    let path = db_path.with_file_name("device_id");

    match tokio::fs::read_to_string(&path).await {
        Ok(content) => match content.trim().parse::<DeviceId>() {
            Ok(id) => return Ok(id),
            Err(err) => warn!(
                path = %path.display(),
                error = %err,
                "Device id file is unreadable, generating a new identity"
            ),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).context(format!("Failed to read {}", path.display()));
        }
    }

    let id = DeviceId::new();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(&path, format!("{id}\n"))
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!(device = %id, "Created new device identity");
    Ok(id)
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

/// Joins a task, aborting it if the grace period runs out
async fn await_task(name: &str, mut handle: JoinHandle<()>, grace: Duration) {
    match timeout(grace, &mut handle).await {
        Ok(Ok(())) => debug!(task = name, "Task finished"),
        Ok(Err(err)) => warn!(task = name, error = %err, "Task failed"),
        Err(_) => {
            warn!(task = name, "Task did not stop within the grace period, aborting");
            handle.abort();
        }
    }
}

// ============================================================================
// Tracing setup and main entry point
// ============================================================================

/// Initializes the tracing subscriber from the logging configuration
///
/// `RUST_LOG` overrides the configured level when set.
fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);

    init_tracing(&config.logging);
    info!(config_path = %config_path.display(), "Waymark daemon starting (waymarkd)");

    let errors = config.validate();
    if !errors.is_empty() {
        for err in &errors {
            error!(error = %err, "Invalid configuration");
        }
        anyhow::bail!("Configuration is invalid ({} errors)", errors.len());
    }

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token.clone()).await?;
    let result = service.run().await;

    match &result {
        Ok(()) => info!("Waymark daemon shut down gracefully"),
        Err(err) => error!(error = %err, "Waymark daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
