//! Key encoding for the `RocksDB` ledger.

use creditgate_core::{EventId, SubscriberId};

/// Length of an encoded audit key.
pub const AUDIT_KEY_LEN: usize = 32;

/// Create a balance key from a subscriber ID.
#[must_use]
pub fn balance_key(subscriber_id: &SubscriberId) -> Vec<u8> {
    subscriber_id.as_bytes().to_vec()
}

/// Create an audit key.
///
/// Format: `subscriber_id (16 bytes) || entry_id (16 bytes)`
#[must_use]
pub fn audit_key(subscriber_id: &SubscriberId, entry_id: &EventId) -> Vec<u8> {
    let mut key = Vec::with_capacity(AUDIT_KEY_LEN);
    key.extend_from_slice(subscriber_id.as_bytes());
    key.extend_from_slice(&entry_id.to_bytes());
    key
}

/// Prefix shared by all of a subscriber's audit keys.
#[must_use]
pub fn audit_prefix(subscriber_id: &SubscriberId) -> Vec<u8> {
    subscriber_id.as_bytes().to_vec()
}

/// Largest possible audit key for a subscriber; reverse iteration starts here.
#[must_use]
pub fn audit_upper_bound(subscriber_id: &SubscriberId) -> Vec<u8> {
    let mut key = Vec::with_capacity(AUDIT_KEY_LEN);
    key.extend_from_slice(subscriber_id.as_bytes());
    key.extend_from_slice(&[0xff; 16]);
    key
}

/// Create a usage event key from an event ID.
#[must_use]
pub fn usage_event_key(event_id: &EventId) -> Vec<u8> {
    event_id.to_bytes().to_vec()
}
