//! Exponential backoff for failed sync cycles
//!
//! After a cycle fails the next attempt waits base * 2^(n-1), capped at
//! a maximum delay. A jitter factor spreads the retries of devices that
//! lost connectivity at the same moment, so they do not all hammer the
//! remote store in lockstep when it comes back.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use waymark_core::config::SyncConfig;

/// Tracks consecutive failures and computes the delay before the next
/// sync attempt
///
/// The schedule with a 2s base and 0.0 jitter: 2s, 4s, 8s, 16s, ...
/// capped at the configured maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
    consecutive: u32,
}

impl Backoff {
    /// Creates a backoff schedule
    ///
    /// `jitter` is the relative spread of the delay: 0.2 means each
    /// delay is scaled by a factor drawn from [0.8, 1.2]. Values are
    /// clamped to [0.0, 1.0].
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap,
            jitter: jitter.clamp(0.0, 1.0),
            consecutive: 0,
        }
    }

    /// Creates a backoff schedule from the sync configuration
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            Duration::from_secs(config.backoff_base_secs),
            Duration::from_secs(config.backoff_cap_secs),
            config.backoff_jitter,
        )
    }

    /// Records a failed cycle and returns the delay before the next attempt
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive = self.consecutive.saturating_add(1);
        self.delay_for(self.consecutive)
    }

    /// Records a successful cycle, resetting the schedule
    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Number of consecutive failures recorded since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    /// Delay for the nth consecutive failure (1-based)
    ///
    /// Zero failures means no delay.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        // Clamp the exponent so the multiplication cannot overflow
        // before the cap applies.
        let exponent = (failures - 1).min(31);
        let raw = self.base.saturating_mul(2u32.saturating_pow(exponent));
        self.with_jitter(raw.min(self.cap))
    }

    /// Scales a delay by a factor drawn from [1 - jitter, 1 + jitter]
    fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter == 0.0 {
            return delay;
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let unit = f64::from(nanos) / 1_000_000_000.0;
        let factor = 1.0 + (unit * 2.0 - 1.0) * self.jitter;
        delay.mul_f64(factor.max(0.0))
    }
}

// ============================================================================
// Tests
// ============================================================================
