//! `RocksDB` storage implementation.
//!
//! Mutations for one subscriber are serialized by a striped lock; the read,
//! check and `WriteBatch` commit all happen while the stripe is held.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tokio::sync::broadcast;

use creditgate_core::{
    AdminAdjustmentEvent, AuditEntry, Balance, BalanceChange, ChangeKind, CreditTarget, Plan,
    ShortfallEvent, SubscriberId, UsageEvent,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::ledger;
use crate::notify::ChangeHub;
use crate::schema::{all_column_families, cf};
use crate::LedgerStore;

/// Number of lock stripes.
const LOCK_STRIPES: usize = 64;

/// RocksDB-backed ledger.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    stripes: Vec<Mutex<()>>,
    hub: ChangeHub,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            hub: ChangeHub::new(),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Lock the stripe owning a subscriber.
    fn lock(&self, subscriber_id: &SubscriberId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        subscriber_id.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = hasher.finish() as usize % self.stripes.len();
        self.stripes[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn read_balance(&self, subscriber_id: &SubscriberId) -> Result<Option<Balance>> {
        let cf = self.cf(cf::BALANCES)?;
        self.db
            .get_cf(&cf, keys::balance_key(subscriber_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn require_balance(&self, subscriber_id: &SubscriberId) -> Result<Balance> {
        self.read_balance(subscriber_id)?
            .ok_or_else(|| StoreError::NotFound {
                subscriber_id: subscriber_id.to_string(),
            })
    }

    fn check_duplicate(&self, event: &UsageEvent) -> Result<()> {
        let cf = self.cf(cf::USAGE_EVENTS)?;
        let seen = self
            .db
            .get_cf(&cf, keys::usage_event_key(&event.id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();

        if seen {
            return Err(StoreError::DuplicateEvent {
                event_id: event.id.to_string(),
            });
        }
        Ok(())
    }

    /// Write the balance and audit entries in one batch.
    fn commit(
        &self,
        balance: &Balance,
        entries: &[AuditEntry],
        usage: Option<&UsageEvent>,
    ) -> Result<()> {
        let cf_balances = self.cf(cf::BALANCES)?;
        let cf_audit = self.cf(cf::AUDIT)?;
        let cf_usage = self.cf(cf::USAGE_EVENTS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_balances,
            keys::balance_key(&balance.subscriber_id),
            Self::serialize(balance)?,
        );
        for entry in entries {
            batch.put_cf(
                &cf_audit,
                keys::audit_key(&balance.subscriber_id, &entry.id()),
                Self::serialize(entry)?,
            );
        }
        if let Some(event) = usage {
            batch.put_cf(&cf_usage, keys::usage_event_key(&event.id), []);
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[async_trait]
impl LedgerStore for RocksStore {
    async fn open_account(&self, subscriber_id: SubscriberId, plan: Plan) -> Result<Balance> {
        let _guard = self.lock(&subscriber_id);
        if self.read_balance(&subscriber_id)?.is_some() {
            return Err(StoreError::AlreadyExists {
                subscriber_id: subscriber_id.to_string(),
            });
        }

        let balance = Balance::new(subscriber_id, plan);
        self.commit(&balance, &[], None)?;
        Ok(balance)
    }

    async fn get_balance(&self, subscriber_id: &SubscriberId) -> Result<Balance> {
        self.require_balance(subscriber_id)
    }

    async fn deduct(&self, event: &UsageEvent) -> Result<Balance> {
        let balance = {
            let _guard = self.lock(&event.subscriber_id);
            self.check_duplicate(event)?;
            let mut balance = self.require_balance(&event.subscriber_id)?;
            ledger::apply_deduct(&mut balance, event)?;
            self.commit(&balance, &[AuditEntry::Usage(event.clone())], Some(event))?;
            balance
        };

        self.hub.publish(BalanceChange::new(&balance, ChangeKind::Deduct));
        Ok(balance)
    }

    async fn credit(
        &self,
        subscriber_id: &SubscriberId,
        amount: i64,
        target: CreditTarget,
        reason: &str,
        actor: &str,
    ) -> Result<Balance> {
        let balance = {
            let _guard = self.lock(subscriber_id);
            let mut balance = self.require_balance(subscriber_id)?;
            ledger::apply_credit(&mut balance, amount, target)?;
            let event = AdminAdjustmentEvent::credit(&balance, target, amount, reason, actor);
            self.commit(&balance, &[AuditEntry::Adjustment(event)], None)?;
            balance
        };

        self.hub.publish(BalanceChange::new(&balance, ChangeKind::Credit));
        Ok(balance)
    }

    async fn reset_monthly(&self, subscriber_id: &SubscriberId, actor: &str) -> Result<Balance> {
        let balance = {
            let _guard = self.lock(subscriber_id);
            let mut balance = self.require_balance(subscriber_id)?;
            ledger::apply_monthly_reset(&mut balance);
            let event = AdminAdjustmentEvent::monthly_reset(&balance, actor);
            self.commit(&balance, &[AuditEntry::Adjustment(event)], None)?;
            balance
        };

        self.hub
            .publish(BalanceChange::new(&balance, ChangeKind::ResetMonthly));
        Ok(balance)
    }

    async fn record_shortfall(&self, event: &UsageEvent, available: i64) -> Result<Balance> {
        let balance = {
            let _guard = self.lock(&event.subscriber_id);
            self.check_duplicate(event)?;
            let mut balance = self.require_balance(&event.subscriber_id)?;
            ledger::apply_shortfall(&mut balance, event);
            let entries = [
                AuditEntry::Usage(event.clone()),
                AuditEntry::Shortfall(ShortfallEvent::for_usage(event, available)),
            ];
            self.commit(&balance, &entries, Some(event))?;
            balance
        };

        self.hub
            .publish(BalanceChange::new(&balance, ChangeKind::Shortfall));
        Ok(balance)
    }

    async fn list_audit(
        &self,
        subscriber_id: &SubscriberId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEntry>> {
        self.require_balance(subscriber_id)?;

        let cf_audit = self.cf(cf::AUDIT)?;
        let prefix = keys::audit_prefix(subscriber_id);
        let upper = keys::audit_upper_bound(subscriber_id);

        // Reverse from the upper bound yields newest first.
        let iter = self
            .db
            .iterator_cf(&cf_audit, IteratorMode::From(&upper, Direction::Reverse));

        let mut entries = Vec::new();
        for item in iter.skip(offset) {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) || entries.len() >= limit {
                break;
            }
            entries.push(Self::deserialize(&value)?);
        }

        Ok(entries)
    }

    fn subscribe(&self) -> broadcast::Receiver<BalanceChange> {
        self.hub.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use creditgate_core::ReportedUsage;
    use tempfile::TempDir;

    async fn create_test_store() -> (RocksStore, SubscriberId, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        let id = SubscriberId::generate();
        store.open_account(id, Plan::Standard).await.unwrap();
        (store, id, dir)
    }

    fn usage(id: SubscriberId, cost: i64) -> UsageEvent {
        UsageEvent::new(id, "chat", cost, ReportedUsage::default())
    }

    #[tokio::test]
    async fn balance_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let id = SubscriberId::generate();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.open_account(id, Plan::Pro).await.unwrap();
            store
                .credit(&id, 5000, CreditTarget::PurchasedBalance, "checkout", "billing")
                .await
                .unwrap();
            store.deduct(&usage(id, 1200)).await.unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        let balance = store.get_balance(&id).await.unwrap();
        assert_eq!(balance.purchased_balance, 3800);
        assert_eq!(balance.lifetime_used, 1200);
        assert_eq!(balance.monthly_allowance, 6000);
    }

    #[tokio::test]
    async fn usage_event_idempotency() {
        let (store, id, _dir) = create_test_store().await;
        store
            .credit(&id, 1000, CreditTarget::PurchasedBalance, "funding", "test")
            .await
            .unwrap();
        let event = usage(id, 10);

        let balance = store.deduct(&event).await.unwrap();
        assert_eq!(balance.purchased_balance, 990);

        let result = store.deduct(&event).await;
        assert!(matches!(result, Err(StoreError::DuplicateEvent { .. })));
        assert_eq!(store.get_balance(&id).await.unwrap().purchased_balance, 990);
    }

    #[tokio::test]
    async fn insufficient_credits() {
        let (store, id, _dir) = create_test_store().await;
        store
            .credit(&id, 5, CreditTarget::PurchasedBalance, "funding", "test")
            .await
            .unwrap();

        let result = store.deduct(&usage(id, 100)).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientCredits {
                balance: 5,
                required: 100
            })
        ));
        assert_eq!(store.list_audit(&id, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audit_is_newest_first_and_paginated() {
        let (store, id, _dir) = create_test_store().await;
        store
            .credit(&id, 100, CreditTarget::PurchasedBalance, "first", "test")
            .await
            .unwrap();

        // ULIDs order by millisecond; keep entries in distinct ones.
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.deduct(&usage(id, 40)).await.unwrap();

        let entries = store.list_audit(&id, 10, 0).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(&entries[0], AuditEntry::Usage(u) if u.realized_cost == 40));
        assert!(matches!(&entries[1], AuditEntry::Adjustment(a) if a.reason == "first"));

        let page2 = store.list_audit(&id, 1, 1).await.unwrap();
        assert_eq!(page2, vec![entries[1].clone()]);
    }

    #[tokio::test]
    async fn audit_does_not_leak_between_subscribers() {
        let (store, id, _dir) = create_test_store().await;
        let other = SubscriberId::generate();
        store.open_account(other, Plan::Free).await.unwrap();
        store
            .credit(&other, 1, CreditTarget::PurchasedBalance, "other", "test")
            .await
            .unwrap();

        assert!(store.list_audit(&id, 10, 0).await.unwrap().is_empty());
        assert_eq!(store.list_audit(&other, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shortfall_keeps_balance() {
        let (store, id, _dir) = create_test_store().await;
        let event = usage(id, 300).into_shortfall();

        let balance = store.record_shortfall(&event, 0).await.unwrap();
        assert_eq!(balance.purchased_balance, 0);
        assert_eq!(balance.lifetime_shortfall, 300);
        assert_eq!(store.list_audit(&id, 10, 0).await.unwrap().len(), 2);
    }
}
