//! In-process ledger implementation.
//!
//! Each subscriber's ledger sits behind its own mutex. A mutation takes the
//! lock, validates, applies and appends under it, then publishes the change
//! after releasing it. Different subscribers never contend.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;

use creditgate_core::{
    AdminAdjustmentEvent, AuditEntry, Balance, BalanceChange, ChangeKind, CreditTarget, EventId,
    Plan, ShortfallEvent, SubscriberId, UsageEvent,
};

use crate::error::{Result, StoreError};
use crate::ledger;
use crate::notify::ChangeHub;
use crate::LedgerStore;

/// One subscriber's ledger.
#[derive(Debug)]
struct Ledger {
    balance: Balance,
    audit: Vec<AuditEntry>,
    usage_ids: HashSet<EventId>,
}

impl Ledger {
    fn new(balance: Balance) -> Self {
        Self {
            balance,
            audit: Vec::new(),
            usage_ids: HashSet::new(),
        }
    }

    fn check_duplicate(&self, event: &UsageEvent) -> Result<()> {
        if self.usage_ids.contains(&event.id) {
            return Err(StoreError::DuplicateEvent {
                event_id: event.id.to_string(),
            });
        }
        Ok(())
    }
}

/// Ledger kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ledgers: RwLock<HashMap<SubscriberId, Arc<Mutex<Ledger>>>>,
    hub: ChangeHub,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store publishing to an existing hub.
    #[must_use]
    pub fn with_hub(hub: ChangeHub) -> Self {
        Self {
            ledgers: RwLock::default(),
            hub,
        }
    }

    fn ledger(&self, subscriber_id: &SubscriberId) -> Result<Arc<Mutex<Ledger>>> {
        self.ledgers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subscriber_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                subscriber_id: subscriber_id.to_string(),
            })
    }

    /// Run `f` with the subscriber's ledger locked.
    fn with_ledger<T>(
        &self,
        subscriber_id: &SubscriberId,
        f: impl FnOnce(&mut Ledger) -> Result<T>,
    ) -> Result<T> {
        let ledger = self.ledger(subscriber_id)?;
        let mut guard = ledger.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn open_account(&self, subscriber_id: SubscriberId, plan: Plan) -> Result<Balance> {
        let mut ledgers = self.ledgers.write().unwrap_or_else(PoisonError::into_inner);
        if ledgers.contains_key(&subscriber_id) {
            return Err(StoreError::AlreadyExists {
                subscriber_id: subscriber_id.to_string(),
            });
        }

        let balance = Balance::new(subscriber_id, plan);
        ledgers.insert(subscriber_id, Arc::new(Mutex::new(Ledger::new(balance.clone()))));
        Ok(balance)
    }

    async fn get_balance(&self, subscriber_id: &SubscriberId) -> Result<Balance> {
        self.with_ledger(subscriber_id, |ledger| Ok(ledger.balance.clone()))
    }

    async fn deduct(&self, event: &UsageEvent) -> Result<Balance> {
        let balance = self.with_ledger(&event.subscriber_id, |ledger| {
            ledger.check_duplicate(event)?;
            ledger::apply_deduct(&mut ledger.balance, event)?;
            ledger.usage_ids.insert(event.id);
            ledger.audit.push(AuditEntry::Usage(event.clone()));
            Ok(ledger.balance.clone())
        })?;

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
        let balance = self.with_ledger(subscriber_id, |ledger| {
            ledger::apply_credit(&mut ledger.balance, amount, target)?;
            let event = AdminAdjustmentEvent::credit(&ledger.balance, target, amount, reason, actor);
            ledger.audit.push(AuditEntry::Adjustment(event));
            Ok(ledger.balance.clone())
        })?;

        self.hub.publish(BalanceChange::new(&balance, ChangeKind::Credit));
        Ok(balance)
    }

    async fn reset_monthly(&self, subscriber_id: &SubscriberId, actor: &str) -> Result<Balance> {
        let balance = self.with_ledger(subscriber_id, |ledger| {
            ledger::apply_monthly_reset(&mut ledger.balance);
            let event = AdminAdjustmentEvent::monthly_reset(&ledger.balance, actor);
            ledger.audit.push(AuditEntry::Adjustment(event));
            Ok(ledger.balance.clone())
        })?;

        self.hub
            .publish(BalanceChange::new(&balance, ChangeKind::ResetMonthly));
        Ok(balance)
    }

    async fn record_shortfall(&self, event: &UsageEvent, available: i64) -> Result<Balance> {
        let balance = self.with_ledger(&event.subscriber_id, |ledger| {
            ledger.check_duplicate(event)?;
            ledger::apply_shortfall(&mut ledger.balance, event);
            ledger.usage_ids.insert(event.id);
            ledger.audit.push(AuditEntry::Usage(event.clone()));
            ledger
                .audit
                .push(AuditEntry::Shortfall(ShortfallEvent::for_usage(event, available)));
            Ok(ledger.balance.clone())
        })?;

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
        self.with_ledger(subscriber_id, |ledger| {
            Ok(ledger
                .audit
                .iter()
                .rev()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<BalanceChange> {
        self.hub.subscribe()
    }
}
