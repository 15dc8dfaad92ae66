//! API handlers.

pub mod accounts;
pub mod admin;
pub mod health;
pub mod metered;
pub mod stream;
