//! Scripted location provider
//!
//! Replays fixes from a JSONL script, one record per line, with per-record
//! delays. Used by tests and by the daemon's replay mode to exercise the
//! full evaluation pipeline without positioning hardware.
//!
//! ## Script format
//!
//! ```text
//! {"event":"fix","latitude":52.520,"longitude":13.405,"accuracy_m":10.0,"delay_ms":100}
//! {"event":"outage","reason":"simulated loss","delay_ms":50}
//! {"event":"restored"}
//! ```
//!
//! Timestamps are assigned at emission so staleness behaves as it would
//! with a live provider. The event stream ends when the script is
//! exhausted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waymark_core::domain::PositionFix;
use waymark_core::ports::location_provider::{ILocationProvider, ProviderEvent};

/// Capacity of the provider event channel
const EVENT_CHANNEL_CAPACITY: usize = 32;

fn default_accuracy_m() -> f64 {
    10.0
}

// ============================================================================
// ReplayRecord enum
// ============================================================================

/// One line of a replay script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplayRecord {
    /// Emit a position fix
    Fix {
        latitude: f64,
        longitude: f64,
        #[serde(default = "default_accuracy_m")]
        accuracy_m: f64,
        /// Delay before emitting, in milliseconds
        #[serde(default)]
        delay_ms: u64,
    },
    /// Simulate a provider outage
    Outage {
        reason: String,
        #[serde(default)]
        delay_ms: u64,
    },
    /// Simulate recovery from an outage
    Restored {
        #[serde(default)]
        delay_ms: u64,
    },
}

impl ReplayRecord {
    fn delay_ms(&self) -> u64 {
        match self {
            ReplayRecord::Fix { delay_ms, .. }
            | ReplayRecord::Outage { delay_ms, .. }
            | ReplayRecord::Restored { delay_ms } => *delay_ms,
        }
    }
}

/// Parses a JSONL script, skipping blank lines
fn parse_script(content: &str) -> Result<Vec<ReplayRecord>> {
    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: ReplayRecord = serde_json::from_str(line)
            .with_context(|| format!("Invalid replay record on line {}", index + 1))?;
        records.push(record);
    }
    Ok(records)
}

// ============================================================================
// ReplayProvider struct
// ============================================================================

/// Location provider that feeds a scripted fix sequence
pub struct ReplayProvider {
    script_path: PathBuf,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl ReplayProvider {
    /// Creates a provider for the given script; the file is read on `start`
    pub fn new(script_path: PathBuf) -> Self {
        Self {
            script_path,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl ILocationProvider for ReplayProvider {
    async fn start(&self) -> Result<mpsc::Receiver<ProviderEvent>> {
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("Replay provider already started");
        }

        let content = tokio::fs::read_to_string(&self.script_path)
            .await
            .with_context(|| format!("Reading replay script {}", self.script_path.display()))?;
        let records = parse_script(&content)?;
        info!(
            path = %self.script_path.display(),
            records = records.len(),
            "Starting replay provider"
        );

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(run_script(records, tx, self.cancel.clone()));
        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

/// Emits the scripted events with their delays until done or stopped
async fn run_script(
    records: Vec<ReplayRecord>,
    tx: mpsc::Sender<ProviderEvent>,
    cancel: CancellationToken,
) {
    let mut seq = 0u64;
    for record in records {
        let delay = record.delay_ms();
        if delay > 0 {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Replay stopped");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
            }
        } else if cancel.is_cancelled() {
            info!("Replay stopped");
            return;
        }

        let event = match record {
            ReplayRecord::Fix {
                latitude,
                longitude,
                accuracy_m,
                ..
            } => {
                seq += 1;
                match PositionFix::new(latitude, longitude, accuracy_m, Utc::now(), seq) {
                    Ok(fix) => ProviderEvent::Fix(fix),
                    Err(err) => {
                        warn!(error = %err, seq, "Skipping invalid scripted fix");
                        continue;
                    }
                }
            }
            ReplayRecord::Outage { reason, .. } => ProviderEvent::Unavailable { reason },
            ReplayRecord::Restored { .. } => ProviderEvent::Restored,
        };

        if tx.send(event).await.is_err() {
            debug!("Replay consumer went away");
            return;
        }
    }
    info!(fixes = seq, "Replay script exhausted");
}

// ============================================================================
// Tests
// ============================================================================
