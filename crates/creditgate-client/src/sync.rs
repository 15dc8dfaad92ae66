//! Real-time balance sync.
//!
//! A [`SyncContext`] owns a balance cache and a registry of change-feed
//! channels, one per subscriber. The first [`Subscription`] for a subscriber
//! opens the channel, later ones share it, and the last one to detach closes
//! it. Every feed event invalidates the cached balance and schedules a
//! debounced refresh; listeners are called with each refreshed balance.
//!
//! A dropped connection is retried with the context's [`RetryPolicy`]. Once
//! the retries are exhausted the channel reports [`SyncState::Degraded`] and
//! stops; the cache keeps serving its last snapshot. A new subscription
//! restarts a degraded channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;

use creditgate_core::{Balance, RetryPolicy, SubscriberId};

use crate::cache::{BalanceCache, BalanceSource, DEFAULT_TTL};
use crate::client::CreditGateClient;
use crate::error::ClientError;
use crate::feed::{ChangeFeed, FeedEvent, SseChangeFeed};
use crate::scheduler::Debouncer;

/// Default quiet period before a burst of changes is refetched.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Sync settings.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Freshness window for cached balances.
    pub ttl: Duration,
    /// Quiet period before a burst of changes is refetched.
    pub debounce: Duration,
    /// Reconnection schedule for dropped change feeds.
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            debounce: DEFAULT_DEBOUNCE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Connection state of a subscriber's change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Opening the first connection.
    Connecting,
    /// Receiving changes.
    Live,
    /// Waiting to retry after a failure.
    Reconnecting {
        /// Retry number (1-based).
        attempt: u32,
    },
    /// Retries exhausted. Changes are no longer pushed.
    Degraded,
}

type Listener = Arc<dyn Fn(&Balance) + Send + Sync>;

struct Channel {
    ref_count: usize,
    listeners: HashMap<u64, Listener>,
    state: SyncState,
    task: Option<JoinHandle<()>>,
    debouncer: Arc<Debouncer>,
}

struct SyncInner {
    cache: BalanceCache,
    feed: Arc<dyn ChangeFeed>,
    options: SyncOptions,
    channels: Mutex<HashMap<SubscriberId, Channel>>,
    next_listener: AtomicU64,
}

impl SyncInner {
    fn channels(&self) -> MutexGuard<'_, HashMap<SubscriberId, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach(&self, subscriber_id: &SubscriberId, listener_id: u64) {
        let closed = {
            let mut channels = self.channels();
            let Some(channel) = channels.get_mut(subscriber_id) else {
                return;
            };
            if channel.listeners.remove(&listener_id).is_none() {
                return;
            }
            channel.ref_count -= 1;
            if channel.ref_count > 0 {
                return;
            }
            channels.remove(subscriber_id)
        };

        if let Some(channel) = closed {
            if let Some(task) = &channel.task {
                task.abort();
            }
            channel.debouncer.cancel();
            tracing::debug!(subscriber_id = %subscriber_id, "Change feed closed");
        }
    }

    fn set_state(&self, subscriber_id: &SubscriberId, state: SyncState) {
        if let Some(channel) = self.channels().get_mut(subscriber_id) {
            channel.state = state;
        }
    }

    fn listeners(&self, subscriber_id: &SubscriberId) -> Vec<Listener> {
        self.channels()
            .get(subscriber_id)
            .map(|channel| channel.listeners.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        let channels = self
            .channels
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for channel in channels.values() {
            if let Some(task) = &channel.task {
                task.abort();
            }
        }
    }
}

/// Shared balance cache plus per-subscriber change subscriptions.
#[derive(Clone)]
pub struct SyncContext {
    inner: Arc<SyncInner>,
}

impl SyncContext {
    /// Create a context reading balances from `source` and changes from `feed`.
    #[must_use]
    pub fn new(
        source: Arc<dyn BalanceSource>,
        feed: Arc<dyn ChangeFeed>,
        options: SyncOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                cache: BalanceCache::new(source, options.ttl),
                feed,
                options,
                channels: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// Create a context over the service's HTTP API and event stream.
    #[must_use]
    pub fn from_client(client: CreditGateClient, options: SyncOptions) -> Self {
        let feed = Arc::new(SseChangeFeed::new(client.clone()));
        Self::new(Arc::new(client), feed, options)
    }

    /// The underlying balance cache.
    #[must_use]
    pub fn cache(&self) -> &BalanceCache {
        &self.inner.cache
    }

    /// Read a balance through the cache.
    ///
    /// # Errors
    ///
    /// Only fails when nothing is cached and the fetch fails.
    pub async fn balance_snapshot(
        &self,
        subscriber_id: &SubscriberId,
    ) -> Result<Balance, ClientError> {
        self.inner.cache.get(subscriber_id).await
    }

    /// Call `listener` with every refreshed balance of `subscriber_id` until
    /// the returned subscription is dropped or unsubscribed.
    pub fn subscribe<F>(&self, subscriber_id: SubscriberId, listener: F) -> Subscription
    where
        F: Fn(&Balance) + Send + Sync + 'static,
    {
        let listener_id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);

        let mut channels = self.inner.channels();
        let channel = channels.entry(subscriber_id).or_insert_with(|| Channel {
            ref_count: 0,
            listeners: HashMap::new(),
            state: SyncState::Connecting,
            task: None,
            debouncer: Arc::new(Debouncer::new(self.inner.options.debounce)),
        });
        channel.ref_count += 1;
        channel.listeners.insert(listener_id, Arc::new(listener));

        if channel.task.as_ref().map_or(true, JoinHandle::is_finished) {
            channel.state = SyncState::Connecting;
            channel.task = Some(tokio::spawn(run_channel(
                Arc::downgrade(&self.inner),
                subscriber_id,
            )));
            tracing::debug!(subscriber_id = %subscriber_id, "Change feed opened");
        }

        Subscription {
            inner: Arc::downgrade(&self.inner),
            subscriber_id,
            listener_id,
            active: true,
        }
    }

    /// Number of live subscriptions for `subscriber_id`.
    #[must_use]
    pub fn ref_count(&self, subscriber_id: &SubscriberId) -> usize {
        self.inner
            .channels()
            .get(subscriber_id)
            .map_or(0, |channel| channel.ref_count)
    }

    /// Feed state for `subscriber_id`, if it has subscribers.
    #[must_use]
    pub fn state(&self, subscriber_id: &SubscriberId) -> Option<SyncState> {
        self.inner
            .channels()
            .get(subscriber_id)
            .map(|channel| channel.state)
    }

    /// Number of open channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.channels().len()
    }
}

/// A registered balance listener. Detaches on drop.
pub struct Subscription {
    inner: Weak<SyncInner>,
    subscriber_id: SubscriberId,
    listener_id: u64,
    active: bool,
}

impl Subscription {
    /// The subscriber this subscription listens to.
    #[must_use]
    pub const fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    /// Detach now.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.detach(&self.subscriber_id, self.listener_id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subscriber_id", &self.subscriber_id)
            .field("listener_id", &self.listener_id)
            .field("active", &self.active)
            .finish()
    }
}

/// Connection loop for one subscriber's channel. Holds only a weak
/// reference so an abandoned context is not kept alive.
async fn run_channel(inner: Weak<SyncInner>, subscriber_id: SubscriberId) {
    let mut attempt: u32 = 0;

    loop {
        let Some((feed, retry)) = inner
            .upgrade()
            .map(|ctx| (ctx.feed.clone(), ctx.options.retry.clone()))
        else {
            return;
        };

        match feed.connect(&subscriber_id).await {
            Ok(mut events) => {
                attempt = 0;
                set_state(&inner, &subscriber_id, SyncState::Live);
                // Changes may have been missed while disconnected.
                schedule_refresh(&inner, subscriber_id);

                while let Some(event) = events.next().await {
                    match event {
                        Ok(FeedEvent::Changed(_) | FeedEvent::Resync) => {
                            schedule_refresh(&inner, subscriber_id);
                        }
                        Err(e) => {
                            tracing::warn!(
                                subscriber_id = %subscriber_id,
                                error = %e,
                                "Change feed failed"
                            );
                            break;
                        }
                    }
                }
                tracing::debug!(subscriber_id = %subscriber_id, "Change feed disconnected");
            }
            Err(e) => {
                tracing::debug!(
                    subscriber_id = %subscriber_id,
                    attempt = %attempt,
                    error = %e,
                    "Change feed connect failed"
                );
            }
        }

        attempt += 1;
        if !retry.allows(attempt) {
            tracing::warn!(
                subscriber_id = %subscriber_id,
                attempts = %attempt,
                "Change feed degraded, serving cached balance only"
            );
            set_state(&inner, &subscriber_id, SyncState::Degraded);
            return;
        }

        set_state(&inner, &subscriber_id, SyncState::Reconnecting { attempt });
        tokio::time::sleep(retry.delay_for(attempt)).await;
    }
}

fn set_state(inner: &Weak<SyncInner>, subscriber_id: &SubscriberId, state: SyncState) {
    if let Some(ctx) = inner.upgrade() {
        ctx.set_state(subscriber_id, state);
    }
}

fn schedule_refresh(inner: &Weak<SyncInner>, subscriber_id: SubscriberId) {
    let Some(ctx) = inner.upgrade() else {
        return;
    };
    ctx.cache.invalidate(&subscriber_id);

    let debouncer = ctx
        .channels()
        .get(&subscriber_id)
        .map(|channel| channel.debouncer.clone());
    let Some(debouncer) = debouncer else {
        return;
    };

    let weak = inner.clone();
    debouncer.trigger(async move {
        refresh_and_notify(weak, subscriber_id).await;
    });
}

async fn refresh_and_notify(inner: Weak<SyncInner>, subscriber_id: SubscriberId) {
    let Some(cache) = inner.upgrade().map(|ctx| ctx.cache.clone()) else {
        return;
    };

    // Failures are logged by the cache, which keeps its last snapshot.
    let Ok(balance) = cache.refresh(&subscriber_id).await else {
        return;
    };

    let Some(listeners) = inner.upgrade().map(|ctx| ctx.listeners(&subscriber_id)) else {
        return;
    };
    tracing::debug!(
        subscriber_id = %subscriber_id,
        listeners = listeners.len(),
        balance = balance.purchased_balance,
        "Balance refreshed"
    );
    for listener in listeners {
        listener(&balance);
    }
}
