use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::chain::ChainStep;
use crate::server::monitoring::SYNC_METRICS;

pub const DEFAULT_PLAYBACK_THROTTLE: Duration = Duration::from_millis(2000);

/// `true` while foreground playback is running.
pub type PlaybackActivity = watch::Receiver<bool>;

/// Delays heavy chain steps while playback is active. Advisory: it never cancels work.
#[derive(Debug, Clone)]
pub struct PlaybackThrottle {
    activity: PlaybackActivity,
    delay: Duration,
}

impl PlaybackThrottle {
    pub fn new(activity: PlaybackActivity, delay: Duration) -> Self {
        Self { activity, delay }
    }

    /// A throttle that never delays.
    pub fn disabled() -> Self {
        let (_sender, activity) = watch::channel(false);
        Self::new(activity, Duration::ZERO)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_active(&self) -> bool {
        *self.activity.borrow()
    }

    /// Waits the configured delay if playback is active right now. Returns whether it waited.
    pub async fn before_heavy_step(
        &self,
        chain_name: &str,
        step: ChainStep,
        cancel: &CancellationToken,
    ) -> bool {
        if !self.is_active() || self.delay.is_zero() {
            return false;
        }
        info!(
            event = "playback_throttle_delay",
            chain = chain_name,
            step = %step,
            delay_ms = self.delay.as_millis() as u64,
            "playback active; delaying heavy step"
        );
        if let Some(metrics) = SYNC_METRICS.get() {
            metrics.throttle_delays_total.inc();
        }
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.delay) => {}
        }
        true
    }
}
