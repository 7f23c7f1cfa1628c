use std::collections::HashMap;
use std::sync::Arc;

use eventping_core::ChannelKind;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::{channel::Channel, error::ChannelError, types::ChannelStatus};

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300; // 5 minutes
/// Maximum number of reconnect attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (up to +10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Registry of channel adapters, one per [`ChannelKind`].
///
/// Adapters are held as `Arc<dyn Channel>` so dispatcher workers can clone a
/// handle and send without holding any lock on the registry.
pub struct ChannelManager {
    channels: HashMap<ChannelKind, Arc<dyn Channel>>,
}

impl ChannelManager {
    /// Create an empty manager with no registered channels.
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a channel adapter.
    ///
    /// If an adapter for the same kind is already registered it is replaced.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let kind = channel.kind();
        info!(channel = %kind, "registering channel adapter");
        self.channels.insert(kind, channel);
    }

    /// Return a shared handle to the adapter for `kind`, if one is registered.
    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn Channel>> {
        self.channels.get(&kind).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Connect all registered channels concurrently.
    ///
    /// Each channel gets exponential backoff with jitter up to
    /// [`MAX_ATTEMPTS`] tries; a channel that never connects is logged and
    /// left in its error state. Sends are still attempted against it and
    /// surface as retryable failures.
    pub async fn connect_all(&self) {
        let mut tasks = JoinSet::new();
        for channel in self.channels.values() {
            let channel = Arc::clone(channel);
            tasks.spawn(async move {
                let kind = channel.kind();
                info!(channel = %kind, "connecting channel");
                if let Err(e) = connect_with_backoff(channel.as_ref()).await {
                    error!(channel = %kind, error = %e, "failed to connect channel after retries");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Disconnect all registered channels.
    ///
    /// Errors are logged but do not abort disconnection of remaining channels.
    pub async fn disconnect_all(&self) {
        for (kind, channel) in &self.channels {
            info!(channel = %kind, "disconnecting channel");
            if let Err(e) = channel.disconnect().await {
                warn!(channel = %kind, error = %e, "error while disconnecting channel");
            }
        }
    }

    /// Return the current [`ChannelStatus`] for every registered channel,
    /// sorted by kind for deterministic output.
    pub fn statuses(&self) -> Vec<(ChannelKind, ChannelStatus)> {
        let mut result: Vec<(ChannelKind, ChannelStatus)> = self
            .channels
            .iter()
            .map(|(kind, ch)| (*kind, ch.status()))
            .collect();
        result.sort_by_key(|(kind, _)| *kind);
        result
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Attempt to connect a single channel with exponential backoff and jitter.
///
/// Schedule: 5 s → 10 s → 20 s → … → 300 s (cap), up to [`MAX_ATTEMPTS`] tries.
/// Terminal errors (bad credentials, bad config) are not retried.
async fn connect_with_backoff(channel: &dyn Channel) -> Result<(), ChannelError> {
    let kind = channel.kind();
    let mut delay_secs = BACKOFF_BASE_SECS;
    let mut attempt = 1;

    loop {
        match channel.connect().await {
            Ok(()) => {
                info!(channel = %kind, attempt, "channel connected successfully");
                return Ok(());
            }
            Err(e) if attempt >= MAX_ATTEMPTS || !e.is_retryable() => return Err(e),
            Err(e) => {
                let base = Duration::from_secs(delay_secs);
                let total = base + jitter(base);
                warn!(
                    channel = %kind,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total.as_secs(),
                    "channel connect failed, retrying with backoff"
                );
                sleep(total).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
                attempt += 1;
            }
        }
    }
}

/// Extra delay in `0 ..= JITTER_FRACTION * base` for reconnects and
/// delivery retries.
///
/// Derived from the sub-second part of the wall clock, avoiding a rand
/// dependency.
pub fn jitter(base: Duration) -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_ms = (base.as_millis() as f64 * JITTER_FRACTION) as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(u64::from(nanos) % (max_ms + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eventping_core::ReminderMessage;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::types::StatusCell;

    struct FlakyChannel {
        kind: ChannelKind,
        failures_left: AtomicU32,
        status: StatusCell,
    }

    #[async_trait]
    impl Channel for FlakyChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }
        async fn connect(&self) -> Result<(), ChannelError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ChannelError::AuthFailed("nope".into()));
            }
            self.status.set(ChannelStatus::Connected);
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), ChannelError> {
            self.status.set(ChannelStatus::Disconnected);
            Ok(())
        }
        async fn send(&self, _: &str, _: &ReminderMessage) -> Result<(), ChannelError> {
            Ok(())
        }
        fn status(&self) -> ChannelStatus {
            self.status.get()
        }
    }

    fn flaky(kind: ChannelKind, failures: u32) -> Arc<dyn Channel> {
        Arc::new(FlakyChannel {
            kind,
            failures_left: AtomicU32::new(failures),
            status: StatusCell::new(),
        })
    }

    #[test]
    fn register_replaces_same_kind() {
        let mut mgr = ChannelManager::new();
        mgr.register(flaky(ChannelKind::Email, 0));
        mgr.register(flaky(ChannelKind::Email, 0));
        mgr.register(flaky(ChannelKind::Slack, 0));
        assert_eq!(mgr.statuses().len(), 2);
        assert!(mgr.get(ChannelKind::Discord).is_none());
    }

    #[tokio::test]
    async fn terminal_connect_error_is_not_retried() {
        let mut mgr = ChannelManager::new();
        mgr.register(flaky(ChannelKind::Telegram, 1));
        mgr.register(flaky(ChannelKind::Email, 0));
        mgr.connect_all().await;

        let statuses = mgr.statuses();
        assert_eq!(statuses[0], (ChannelKind::Email, ChannelStatus::Connected));
        assert_eq!(statuses[1], (ChannelKind::Telegram, ChannelStatus::Disconnected));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        for secs in [5, 10, 300] {
            let base = Duration::from_secs(secs);
            assert!(jitter(base) <= base / 10);
        }
        assert_eq!(jitter(Duration::from_millis(5)), Duration::ZERO);
    }
}
