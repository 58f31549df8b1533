//! Background expiry of stale signup attempts.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span};

use crate::signup::SignupManager;

#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SweeperConfig {
    /// Default sweep cadence: every 5 minutes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_interval_seconds(mut self, seconds: u64) -> Self {
        self.interval = Duration::from_secs(seconds);
        self
    }

    /// Clamp a zero interval to one second so the loop never spins.
    #[must_use]
    pub fn normalize(self) -> Self {
        let interval = if self.interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.interval
        };
        Self { interval }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Run one sweep and log the outcome. Returns the number of attempts expired.
pub async fn sweep_once(manager: &SignupManager) -> u64 {
    match manager
        .sweep_expired()
        .instrument(info_span!("signup.sweep"))
        .await
    {
        Ok(0) => {
            debug!("No stale signup attempts");
            0
        }
        Ok(count) => {
            info!("Expired {count} stale signup attempt(s)");
            count
        }
        Err(err) => {
            error!("Signup sweep failed: {err}");
            0
        }
    }
}

/// Spawn a background task that expires stale signup attempts on a fixed cadence.
pub fn spawn(manager: SignupManager, config: SweeperConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = config.normalize().interval();
        loop {
            sweep_once(&manager).await;
            sleep(interval).await;
        }
    })
}
