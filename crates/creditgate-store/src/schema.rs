//! Column families of the `RocksDB` ledger.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Balance records, keyed by `subscriber_id`.
    pub const BALANCES: &str = "balances";

    /// Audit entries, keyed by `subscriber_id || entry_id`.
    /// Entry IDs are ULIDs, so each subscriber's trail is time-ordered.
    pub const AUDIT: &str = "audit";

    /// Recorded usage event IDs for idempotency. Value is empty.
    pub const USAGE_EVENTS: &str = "usage_events";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::BALANCES, cf::AUDIT, cf::USAGE_EVENTS]
}
