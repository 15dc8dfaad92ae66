//! Client-side balance cache.
//!
//! Entries are replaced wholesale by fresh reads and never mutated
//! optimistically. A read inside the TTL is served from the cache; a read
//! after it returns the stale snapshot immediately and revalidates in the
//! background. Only the very first read for a subscriber waits on the
//! network.
//!
//! The cache is a read-only copy. [`BalanceCache::advisory_check`] exists for
//! UX only; the service's guard is the only check that may gate a call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use creditgate_core::{Actor, Balance, GuardDecision, GuardPolicy, SubscriberId};

use crate::client::CreditGateClient;
use crate::error::ClientError;

/// Default freshness window for cached balances.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Where the cache reads authoritative balances from.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Fetch the latest committed balance.
    async fn fetch_balance(&self, subscriber_id: &SubscriberId) -> Result<Balance, ClientError>;
}

#[async_trait]
impl BalanceSource for CreditGateClient {
    async fn fetch_balance(&self, subscriber_id: &SubscriberId) -> Result<Balance, ClientError> {
        self.get_balance(subscriber_id).await
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    balance: Balance,
    /// `None` once invalidated.
    fetched_at: Option<Instant>,
}

#[derive(Debug)]
struct BackgroundRefresh {
    token: u64,
    handle: AbortHandle,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<SubscriberId, CacheEntry>,
    refreshing: HashMap<SubscriberId, BackgroundRefresh>,
    next_refresh: u64,
    /// Bumped by `evict`; a fetch started under an older generation is not stored.
    generations: HashMap<SubscriberId, u64>,
}

impl CacheState {
    fn generation(&self, subscriber_id: &SubscriberId) -> u64 {
        self.generations.get(subscriber_id).copied().unwrap_or(0)
    }
}

struct CacheInner {
    source: Arc<dyn BalanceSource>,
    ttl: Duration,
    state: Mutex<CacheState>,
}

/// Per-subscriber balance snapshots with TTL and stale-while-revalidate.
#[derive(Clone)]
pub struct BalanceCache {
    inner: Arc<CacheInner>,
}

impl BalanceCache {
    /// Create a cache over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn BalanceSource>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                ttl,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Read a balance.
    ///
    /// Fresh entries are returned as-is. Stale entries are returned
    /// immediately while a background refresh runs. With no entry, waits
    /// for the first fetch.
    ///
    /// # Errors
    ///
    /// Only the first, uncached read can fail.
    pub async fn get(&self, subscriber_id: &SubscriberId) -> Result<Balance, ClientError> {
        let stale = {
            let state = self.lock();
            match state.entries.get(subscriber_id) {
                Some(entry) if self.is_fresh(entry) => {
                    tracing::debug!(subscriber_id = %subscriber_id, "Balance cache hit");
                    return Ok(entry.balance.clone());
                }
                Some(entry) => Some(entry.balance.clone()),
                None => None,
            }
        };

        match stale {
            Some(balance) => {
                tracing::debug!(subscriber_id = %subscriber_id, "Serving stale balance, revalidating");
                self.spawn_refresh(*subscriber_id);
                Ok(balance)
            }
            None => self.refresh(subscriber_id).await,
        }
    }

    /// Fetch a fresh balance and replace the entry.
    ///
    /// On failure the last snapshot is kept and keeps being served. A result
    /// that lands after the subscriber was evicted is returned but not stored.
    ///
    /// # Errors
    ///
    /// Returns the fetch error.
    pub async fn refresh(&self, subscriber_id: &SubscriberId) -> Result<Balance, ClientError> {
        let generation = self.lock().generation(subscriber_id);

        match self.inner.source.fetch_balance(subscriber_id).await {
            Ok(balance) => {
                let mut state = self.lock();
                if state.generation(subscriber_id) == generation {
                    state.entries.insert(
                        *subscriber_id,
                        CacheEntry {
                            balance: balance.clone(),
                            fetched_at: Some(Instant::now()),
                        },
                    );
                } else {
                    tracing::debug!(
                        subscriber_id = %subscriber_id,
                        "Discarding balance fetched before eviction"
                    );
                }
                Ok(balance)
            }
            Err(e) => {
                let cached = self.lock().entries.contains_key(subscriber_id);
                tracing::warn!(
                    subscriber_id = %subscriber_id,
                    error = %e,
                    keeping_snapshot = cached,
                    "Balance refresh failed"
                );
                Err(e)
            }
        }
    }

    /// The cached snapshot, fresh or not, without touching the network.
    #[must_use]
    pub fn peek(&self, subscriber_id: &SubscriberId) -> Option<Balance> {
        self.lock()
            .entries
            .get(subscriber_id)
            .map(|entry| entry.balance.clone())
    }

    /// Mark an entry stale so the next read revalidates.
    pub fn invalidate(&self, subscriber_id: &SubscriberId) {
        if let Some(entry) = self.lock().entries.get_mut(subscriber_id) {
            entry.fetched_at = None;
        }
    }

    /// Drop an entry entirely, as on logout.
    ///
    /// A background refresh in flight is aborted, and any fetch already
    /// running will not bring the entry back.
    pub fn evict(&self, subscriber_id: &SubscriberId) {
        let mut state = self.lock();
        state.entries.remove(subscriber_id);
        *state.generations.entry(*subscriber_id).or_insert(0) += 1;
        if let Some(refresh) = state.refreshing.remove(subscriber_id) {
            refresh.handle.abort();
        }
    }

    /// Evaluate the guard policy against the cached snapshot.
    ///
    /// Advisory only, for hiding or disabling UI affordances. Returns `None`
    /// when nothing is cached.
    #[must_use]
    pub fn advisory_check(
        &self,
        subscriber_id: &SubscriberId,
        policy: &GuardPolicy,
        actor: &Actor,
        ceiling_cost: i64,
    ) -> Option<GuardDecision> {
        self.peek(subscriber_id)
            .map(|balance| policy.evaluate(&balance, actor, ceiling_cost))
    }

    fn spawn_refresh(&self, subscriber_id: SubscriberId) {
        let mut state = self.lock();
        if state.refreshing.contains_key(&subscriber_id) {
            return;
        }
        state.next_refresh += 1;
        let token = state.next_refresh;

        let cache = self.clone();
        let handle = tokio::spawn(async move {
            let _ = cache.refresh(&subscriber_id).await;
            let mut state = cache.lock();
            if state
                .refreshing
                .get(&subscriber_id)
                .is_some_and(|refresh| refresh.token == token)
            {
                state.refreshing.remove(&subscriber_id);
            }
        });
        state.refreshing.insert(
            subscriber_id,
            BackgroundRefresh {
                token,
                handle: handle.abort_handle(),
            },
        );
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry
            .fetched_at
            .is_some_and(|at| at.elapsed() < self.inner.ttl)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

    use creditgate_core::{Plan, RejectReason};

    /// Serves a balance that can be changed between fetches.
    struct FakeSource {
        purchased: AtomicI64,
        fetches: AtomicUsize,
        failing: std::sync::atomic::AtomicBool,
        latency_ms: AtomicU64,
    }

    impl FakeSource {
        fn new(purchased: i64) -> Arc<Self> {
            Arc::new(Self {
                purchased: AtomicI64::new(purchased),
                fetches: AtomicUsize::new(0),
                failing: std::sync::atomic::AtomicBool::new(false),
                latency_ms: AtomicU64::new(0),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BalanceSource for FakeSource {
        async fn fetch_balance(&self, id: &SubscriberId) -> Result<Balance, ClientError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let latency = self.latency_ms.load(Ordering::SeqCst);
            if latency > 0 {
                tokio::time::sleep(Duration::from_millis(latency)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(ClientError::StoreUnavailable("ledger down".into()));
            }
            let mut balance = Balance::new(*id, Plan::Standard);
            balance.purchased_balance = self.purchased.load(Ordering::SeqCst);
            Ok(balance)
        }
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_reads_do_not_refetch() {
        let source = FakeSource::new(100);
        let cache = BalanceCache::new(source.clone(), Duration::from_secs(30));
        let id = SubscriberId::generate();

        assert_eq!(cache.get(&id).await.unwrap().purchased_balance, 100);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get(&id).await.unwrap().purchased_balance, 100);

        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_read_returns_old_value_then_revalidates() {
        let source = FakeSource::new(100);
        let cache = BalanceCache::new(source.clone(), Duration::from_secs(30));
        let id = SubscriberId::generate();

        cache.get(&id).await.unwrap();
        source.purchased.store(40, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(cache.get(&id).await.unwrap().purchased_balance, 100);
        settle().await;

        assert_eq!(source.fetches(), 2);
        assert_eq!(cache.get(&id).await.unwrap().purchased_balance, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_stale_reads_share_one_refresh() {
        let source = FakeSource::new(100);
        let cache = BalanceCache::new(source.clone(), Duration::from_secs(30));
        let id = SubscriberId::generate();

        cache.get(&id).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        for _ in 0..3 {
            cache.get(&id).await.unwrap();
        }
        settle().await;

        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_revalidation_inside_ttl() {
        let source = FakeSource::new(100);
        let cache = BalanceCache::new(source.clone(), Duration::from_secs(30));
        let id = SubscriberId::generate();

        cache.get(&id).await.unwrap();
        cache.invalidate(&id);
        cache.get(&id).await.unwrap();
        settle().await;

        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_last_snapshot() {
        let source = FakeSource::new(100);
        let cache = BalanceCache::new(source.clone(), Duration::from_secs(30));
        let id = SubscriberId::generate();

        cache.get(&id).await.unwrap();
        source.failing.store(true, Ordering::SeqCst);

        let err = cache.refresh(&id).await.unwrap_err();
        assert!(matches!(err, ClientError::StoreUnavailable(_)));
        assert_eq!(cache.peek(&id).unwrap().purchased_balance, 100);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get(&id).await.unwrap().purchased_balance, 100);
    }

    #[tokio::test]
    async fn first_read_failure_is_an_error() {
        let source = FakeSource::new(100);
        source.failing.store(true, Ordering::SeqCst);
        let cache = BalanceCache::new(source, DEFAULT_TTL);

        assert!(cache.get(&SubscriberId::generate()).await.is_err());
    }

    #[tokio::test]
    async fn evict_forgets_the_entry() {
        let source = FakeSource::new(100);
        let cache = BalanceCache::new(source.clone(), DEFAULT_TTL);
        let id = SubscriberId::generate();

        cache.get(&id).await.unwrap();
        cache.evict(&id);
        assert!(cache.peek(&id).is_none());

        cache.get(&id).await.unwrap();
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn evict_cancels_background_revalidation() {
        let source = FakeSource::new(100);
        let cache = BalanceCache::new(source.clone(), Duration::from_secs(30));
        let id = SubscriberId::generate();

        cache.get(&id).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get(&id).await.unwrap().purchased_balance, 100);

        cache.evict(&id);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(cache.peek(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_finishing_after_evict_is_not_stored() {
        let source = FakeSource::new(100);
        source.latency_ms.store(100, Ordering::SeqCst);
        let cache = BalanceCache::new(source.clone(), Duration::from_secs(30));
        let id = SubscriberId::generate();

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.refresh(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.evict(&id);

        let fetched = pending.await.unwrap().unwrap();
        assert_eq!(fetched.purchased_balance, 100);
        assert!(cache.peek(&id).is_none());

        // Later reads cache normally again.
        cache.get(&id).await.unwrap();
        assert!(cache.peek(&id).is_some());
    }

    #[tokio::test]
    async fn advisory_check_uses_cached_snapshot() {
        let source = FakeSource::new(500);
        let cache = BalanceCache::new(source, DEFAULT_TTL);
        let id = SubscriberId::generate();
        let policy = GuardPolicy::default();
        let user = Actor::subscriber("u");

        assert_eq!(cache.advisory_check(&id, &policy, &user, 10), None);

        cache.get(&id).await.unwrap();
        assert_eq!(
            cache.advisory_check(&id, &policy, &user, 10),
            Some(GuardDecision::Rejected(RejectReason::LowBalanceBlock {
                balance: 500,
                security_buffer: 2000
            }))
        );
    }
}
