//! Change notification hub.

use tokio::sync::broadcast;

use creditgate_core::BalanceChange;

/// Default capacity of the notification channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out of committed balance changes to every listener in the process.
#[derive(Debug, Clone)]
pub struct ChangeHub {
    tx: broadcast::Sender<BalanceChange>,
}

impl ChangeHub {
    /// Create a hub with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a hub buffering up to `capacity` changes per slow listener.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a committed change. Having no listeners is not an error.
    pub fn publish(&self, change: BalanceChange) {
        tracing::trace!(
            subscriber_id = %change.subscriber_id,
            kind = ?change.kind,
            listeners = self.tx.receiver_count(),
            "Publishing balance change"
        );
        let _ = self.tx.send(change);
    }

    /// Subscribe to future changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BalanceChange> {
        self.tx.subscribe()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}
