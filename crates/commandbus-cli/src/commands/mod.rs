//! Command handlers for the operator CLI. Each module delegates to
//! `commandbus_core::Bus` for the actual read/write against the database.

pub mod batch;
pub mod tsq;
