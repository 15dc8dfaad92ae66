//! PostgreSQL storage implementation.
//!
//! Deductions are a single conditional `UPDATE` so two racing requests can
//! never both pass the balance check. Other mutations lock the balance row
//! and apply the shared ledger rules inside the same transaction as their
//! audit insert.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use tokio::sync::broadcast;

use creditgate_core::{
    AdminAdjustmentEvent, AuditEntry, Balance, BalanceChange, ChangeKind, CreditTarget, Plan,
    ShortfallEvent, SubscriberId, UsageEvent,
};

use crate::error::{Result, StoreError};
use crate::ledger;
use crate::notify::ChangeHub;
use crate::LedgerStore;

const BALANCE_COLUMNS: &str = "subscriber_id, plan, monthly_allowance, purchased_balance, \
                               lifetime_used, lifetime_shortfall, updated_at";

#[allow(clippy::needless_pass_by_value)]
fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn not_found(subscriber_id: &SubscriberId) -> StoreError {
    StoreError::NotFound {
        subscriber_id: subscriber_id.to_string(),
    }
}

fn balance_from_row(row: &PgRow) -> Result<Balance> {
    let plan: String = row.try_get("plan").map_err(db_error)?;
    Ok(Balance {
        subscriber_id: SubscriberId::from_uuid(row.try_get("subscriber_id").map_err(db_error)?),
        plan: plan.parse().map_err(StoreError::Serialization)?,
        monthly_allowance: row.try_get("monthly_allowance").map_err(db_error)?,
        purchased_balance: row.try_get("purchased_balance").map_err(db_error)?,
        lifetime_used: row.try_get("lifetime_used").map_err(db_error)?,
        lifetime_shortfall: row.try_get("lifetime_shortfall").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

const fn entry_type(entry: &AuditEntry) -> &'static str {
    match entry {
        AuditEntry::Usage(_) => "usage",
        AuditEntry::Adjustment(_) => "adjustment",
        AuditEntry::Shortfall(_) => "shortfall",
    }
}

/// PostgreSQL-backed ledger.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    hub: ChangeHub,
}

impl PgStore {
    /// Connect to the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.map_err(db_error)?;
        Ok(Self::with_pool(pool))
    }

    /// Create with an existing connection pool.
    #[must_use]
    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            hub: ChangeHub::new(),
        }
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>> {
        self.pool.begin().await.map_err(db_error)
    }

    async fn lock_balance(
        tx: &mut Transaction<'_, Postgres>,
        subscriber_id: &SubscriberId,
    ) -> Result<Balance> {
        let query =
            format!("SELECT {BALANCE_COLUMNS} FROM balances WHERE subscriber_id = $1 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(subscriber_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found(subscriber_id))?;
        balance_from_row(&row)
    }

    async fn write_balance(tx: &mut Transaction<'_, Postgres>, balance: &Balance) -> Result<()> {
        sqlx::query(
            "UPDATE balances SET monthly_allowance = $2, purchased_balance = $3, \
             lifetime_used = $4, lifetime_shortfall = $5, updated_at = $6 \
             WHERE subscriber_id = $1",
        )
        .bind(balance.subscriber_id.as_uuid())
        .bind(balance.monthly_allowance)
        .bind(balance.purchased_balance)
        .bind(balance.lifetime_used)
        .bind(balance.lifetime_shortfall)
        .bind(balance.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn append_audit(tx: &mut Transaction<'_, Postgres>, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_entries (id, subscriber_id, entry_type, entry) VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.id().to_string())
        .bind(entry.subscriber_id().as_uuid())
        .bind(entry_type(entry))
        .bind(Json(entry))
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    /// Claim the usage event id. Fails if it was already recorded.
    async fn claim_event(tx: &mut Transaction<'_, Postgres>, event: &UsageEvent) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO usage_events (event_id, subscriber_id) VALUES ($1, $2) \
             ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event.id.to_string())
        .bind(event.subscriber_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                not_found(&event.subscriber_id)
            }
            other => db_error(other),
        })?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::DuplicateEvent {
                event_id: event.id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn open_account(&self, subscriber_id: SubscriberId, plan: Plan) -> Result<Balance> {
        let balance = Balance::new(subscriber_id, plan);
        let query = format!(
            "INSERT INTO balances ({BALANCE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (subscriber_id) DO NOTHING"
        );
        let inserted = sqlx::query(&query)
            .bind(balance.subscriber_id.as_uuid())
            .bind(balance.plan.as_str())
            .bind(balance.monthly_allowance)
            .bind(balance.purchased_balance)
            .bind(balance.lifetime_used)
            .bind(balance.lifetime_shortfall)
            .bind(balance.updated_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?
            .rows_affected();

        if inserted == 0 {
            return Err(StoreError::AlreadyExists {
                subscriber_id: subscriber_id.to_string(),
            });
        }
        Ok(balance)
    }

    async fn get_balance(&self, subscriber_id: &SubscriberId) -> Result<Balance> {
        let query = format!("SELECT {BALANCE_COLUMNS} FROM balances WHERE subscriber_id = $1");
        let row = sqlx::query(&query)
            .bind(subscriber_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found(subscriber_id))?;
        balance_from_row(&row)
    }

    async fn deduct(&self, event: &UsageEvent) -> Result<Balance> {
        if event.realized_cost < 0 {
            return Err(StoreError::InvalidAmount(format!(
                "deduction must not be negative: {}",
                event.realized_cost
            )));
        }

        let mut tx = self.begin().await?;
        Self::claim_event(&mut tx, event).await?;

        let query = format!(
            "UPDATE balances SET purchased_balance = purchased_balance - $2, \
             lifetime_used = lifetime_used + $2, updated_at = NOW() \
             WHERE subscriber_id = $1 AND purchased_balance >= $2 \
             RETURNING {BALANCE_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(event.subscriber_id.as_uuid())
            .bind(event.realized_cost)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;

        let Some(row) = row else {
            // The update matched nothing: report why, leaving the ledger untouched.
            let current = self.get_balance(&event.subscriber_id).await?;
            return Err(StoreError::InsufficientCredits {
                balance: current.purchased_balance,
                required: event.realized_cost,
            });
        };
        let balance = balance_from_row(&row)?;

        Self::append_audit(&mut tx, &AuditEntry::Usage(event.clone())).await?;
        tx.commit().await.map_err(db_error)?;

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
        let mut tx = self.begin().await?;
        let mut balance = Self::lock_balance(&mut tx, subscriber_id).await?;
        ledger::apply_credit(&mut balance, amount, target)?;

        let event = AdminAdjustmentEvent::credit(&balance, target, amount, reason, actor);
        Self::write_balance(&mut tx, &balance).await?;
        Self::append_audit(&mut tx, &AuditEntry::Adjustment(event)).await?;
        tx.commit().await.map_err(db_error)?;

        self.hub.publish(BalanceChange::new(&balance, ChangeKind::Credit));
        Ok(balance)
    }

    async fn reset_monthly(&self, subscriber_id: &SubscriberId, actor: &str) -> Result<Balance> {
        let mut tx = self.begin().await?;
        let mut balance = Self::lock_balance(&mut tx, subscriber_id).await?;
        ledger::apply_monthly_reset(&mut balance);

        let event = AdminAdjustmentEvent::monthly_reset(&balance, actor);
        Self::write_balance(&mut tx, &balance).await?;
        Self::append_audit(&mut tx, &AuditEntry::Adjustment(event)).await?;
        tx.commit().await.map_err(db_error)?;

        self.hub
            .publish(BalanceChange::new(&balance, ChangeKind::ResetMonthly));
        Ok(balance)
    }

    async fn record_shortfall(&self, event: &UsageEvent, available: i64) -> Result<Balance> {
        let mut tx = self.begin().await?;
        let mut balance = Self::lock_balance(&mut tx, &event.subscriber_id).await?;
        Self::claim_event(&mut tx, event).await?;
        ledger::apply_shortfall(&mut balance, event);

        Self::write_balance(&mut tx, &balance).await?;
        Self::append_audit(&mut tx, &AuditEntry::Usage(event.clone())).await?;
        Self::append_audit(
            &mut tx,
            &AuditEntry::Shortfall(ShortfallEvent::for_usage(event, available)),
        )
        .await?;
        tx.commit().await.map_err(db_error)?;

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
        // Unknown subscribers are an error, not an empty trail.
        self.get_balance(subscriber_id).await?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT entry FROM audit_entries WHERE subscriber_id = $1 \
             ORDER BY seq DESC LIMIT $2 OFFSET $3",
        )
        .bind(subscriber_id.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                row.try_get::<Json<AuditEntry>, _>("entry")
                    .map(|entry| entry.0)
                    .map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<BalanceChange> {
        self.hub.subscribe()
    }
}
