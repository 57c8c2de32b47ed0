//! Command lifecycle, producer API, batch engine, and troubleshooting
//! queue operations over PostgreSQL + PGMQ.

pub mod batch;
pub mod bus;
pub mod config;
pub mod error;
pub mod messages;
pub mod models;
pub mod repository;
pub mod tsq;

/// Embeds the workspace's `migrations/` directory so integration tests can
/// run `#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]` against a
/// freshly provisioned database, mirroring the teacher's per-crate
/// `MIGRATOR` convention.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

pub use bus::{Bus, BatchCompletionCallback, SendRequest, SendResult};
pub use config::CommandBusConfig;
pub use error::{CommandBusError, CommandBusResult, HandlerError, HandlerResult};
pub use messages::{CommandMessage, ReplyError, ReplyMessage, ReplyOutcome};
pub use models::{
    AuditEntry, AuditEventType, Batch, BatchStats, BatchStatus, BatchType, Command, CommandStatus,
    PayloadArchive, Process, ProcessAuditEntry, ProcessStatus,
};
pub use repository::TsqFilter;
