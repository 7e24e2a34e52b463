//! GeoClue2 location provider
//!
//! Talks to the `org.freedesktop.GeoClue2` system service over D-Bus:
//! a client object is requested from the manager, configured with the
//! desktop id and update thresholds, and started; every `LocationUpdated`
//! signal is resolved to a location object whose properties become a
//! [`PositionFix`].
//!
//! Outages (service missing, agent denial, bus errors) are reported
//! in-band as [`ProviderEvent::Unavailable`] and the session is retried
//! until the provider is stopped, so a revoked permission degrades the
//! engine instead of killing it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedObjectPath;

use waymark_core::config::LocationConfig;
use waymark_core::domain::PositionFix;
use waymark_core::ports::location_provider::{ILocationProvider, ProviderEvent};

/// Desktop id GeoClue uses for per-application authorization
const DESKTOP_ID: &str = "waymarkd";

/// GeoClue accuracy level requesting exact positions
const ACCURACY_LEVEL_EXACT: u32 = 8;

/// Capacity of the provider event channel
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Delay between reconnection attempts while GeoClue is unreachable
const RECONNECT_DELAY_SECS: u64 = 30;

// ============================================================================
// GeoClue2 D-Bus proxies
// ============================================================================

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Manager",
    default_service = "org.freedesktop.GeoClue2",
    default_path = "/org/freedesktop/GeoClue2/Manager",
    gen_blocking = false
)]
trait Manager {
    /// Obtains a client object dedicated to this caller
    fn get_client(&self) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Client",
    default_service = "org.freedesktop.GeoClue2",
    gen_blocking = false
)]
trait Client {
    /// Starts position updates
    fn start(&self) -> zbus::Result<()>;

    /// Stops position updates
    fn stop(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_desktop_id(&self, id: &str) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_distance_threshold(&self, meters: u32) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_time_threshold(&self, seconds: u32) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_requested_accuracy_level(&self, level: u32) -> zbus::Result<()>;

    /// Emitted with the previous and the new location object path
    #[zbus(signal)]
    fn location_updated(&self, old: OwnedObjectPath, new: OwnedObjectPath) -> zbus::Result<()>;
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Location",
    default_service = "org.freedesktop.GeoClue2",
    gen_blocking = false
)]
trait Location {
    #[zbus(property)]
    fn latitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn longitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn accuracy(&self) -> zbus::Result<f64>;

    /// Realtime timestamp of the fix as (seconds, microseconds)
    #[zbus(property)]
    fn timestamp(&self) -> zbus::Result<(u64, u64)>;
}

// ============================================================================
// GeoClueProvider struct
// ============================================================================

/// Location provider backed by the GeoClue2 system service
pub struct GeoClueProvider {
    config: LocationConfig,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl GeoClueProvider {
    /// Creates a provider; nothing touches the bus until `start`
    pub fn new(config: LocationConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl ILocationProvider for GeoClueProvider {
    async fn start(&self) -> Result<mpsc::Receiver<ProviderEvent>> {
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("GeoClue provider already started");
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(run_provider(config, tx, cancel));
        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        info!("Stopping GeoClue provider");
        self.cancel.cancel();
        Ok(())
    }
}

// ============================================================================
// Session loop
// ============================================================================

/// Runs GeoClue sessions until stopped, degrading on failure
///
/// Every session failure sends one `Unavailable` event and schedules a
/// reconnect; the first successful restart afterwards sends `Restored`.
async fn run_provider(
    config: LocationConfig,
    tx: mpsc::Sender<ProviderEvent>,
    cancel: CancellationToken,
) {
    let seq = AtomicU64::new(0);
    let mut degraded = false;

    loop {
        match run_session(&config, &tx, &seq, &cancel, &mut degraded).await {
            Ok(()) => {
                info!("GeoClue provider stopped");
                return;
            }
            Err(err) => {
                warn!(error = %err, "GeoClue session failed");
                if !degraded {
                    degraded = true;
                    let reason = format!("{err:#}");
                    if tx.send(ProviderEvent::Unavailable { reason }).await.is_err() {
                        return;
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)) => {}
                }
            }
        }
    }
}

/// One GeoClue client session: configure, start, pump signals
///
/// Returns `Ok` only when the provider was stopped or the consumer went
/// away; any bus failure is an error and the caller handles the retry.
async fn run_session(
    config: &LocationConfig,
    tx: &mpsc::Sender<ProviderEvent>,
    seq: &AtomicU64,
    cancel: &CancellationToken,
    degraded: &mut bool,
) -> Result<()> {
    let connection = zbus::Connection::system()
        .await
        .context("Connecting to the system bus")?;
    let manager = ManagerProxy::new(&connection)
        .await
        .context("Reaching the GeoClue manager")?;
    let client_path = manager
        .get_client()
        .await
        .context("Requesting a GeoClue client")?;
    debug!(path = %client_path, "Obtained GeoClue client");

    let client = ClientProxy::builder(&connection)
        .path(client_path)?
        .build()
        .await
        .context("Building the GeoClue client proxy")?;

    client
        .set_desktop_id(DESKTOP_ID)
        .await
        .context("Setting the desktop id")?;
    client
        .set_distance_threshold(config.min_displacement_m as u32)
        .await
        .context("Setting the distance threshold")?;
    client
        .set_time_threshold(config.min_interval_secs as u32)
        .await
        .context("Setting the time threshold")?;
    client
        .set_requested_accuracy_level(ACCURACY_LEVEL_EXACT)
        .await
        .context("Setting the accuracy level")?;

    let mut updates = client
        .receive_location_updated()
        .await
        .context("Subscribing to location updates")?;

    client.start().await.context("Starting the GeoClue client")?;
    info!(
        distance_threshold_m = config.min_displacement_m,
        time_threshold_secs = config.min_interval_secs,
        "GeoClue client started"
    );

    if *degraded {
        *degraded = false;
        if tx.send(ProviderEvent::Restored).await.is_err() {
            let _ = client.stop().await;
            return Ok(());
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = client.stop().await;
                return Ok(());
            }
            signal = updates.next() => {
                let Some(signal) = signal else {
                    anyhow::bail!("GeoClue signal stream ended unexpectedly");
                };
                let args = signal.args().context("Decoding a LocationUpdated signal")?;
                match read_fix(&connection, args.new, seq).await {
                    Ok(fix) => match tx.try_send(ProviderEvent::Fix(fix)) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // Never block the signal pump; the consumer is
                            // lagging and newer fixes supersede this one.
                            warn!(seq = fix.seq, "Event channel full, dropping fix");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            info!("Event channel closed, stopping GeoClue client");
                            let _ = client.stop().await;
                            return Ok(());
                        }
                    },
                    Err(err) => {
                        warn!(error = %err, "Skipping unreadable location update");
                    }
                }
            }
        }
    }
}

/// Reads the location object behind a `LocationUpdated` signal
async fn read_fix(
    connection: &zbus::Connection,
    path: OwnedObjectPath,
    seq: &AtomicU64,
) -> Result<PositionFix> {
    let location = LocationProxy::builder(connection)
        .path(path)?
        .build()
        .await
        .context("Building the location proxy")?;

    let latitude = location.latitude().await.context("Reading latitude")?;
    let longitude = location.longitude().await.context("Reading longitude")?;
    let accuracy = location.accuracy().await.context("Reading accuracy")?;
    let timestamp = location.timestamp().await.unwrap_or((0, 0));

    let next_seq = seq.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(PositionFix::new(
        latitude,
        longitude,
        accuracy,
        fix_time(timestamp),
        next_seq,
    )?)
}

/// Converts GeoClue's (seconds, microseconds) realtime timestamp
///
/// Some backends leave the property zeroed; fall back to the current
/// time rather than producing a 1970 fix the sampler would discard.
fn fix_time(timestamp: (u64, u64)) -> DateTime<Utc> {
    let (secs, micros) = timestamp;
    if secs == 0 {
        return Utc::now();
    }
    DateTime::from_timestamp(secs as i64, (micros.min(999_999) * 1_000) as u32)
        .unwrap_or_else(Utc::now)
}

// ============================================================================
// Tests
// ============================================================================
