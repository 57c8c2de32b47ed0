//! Durable entities: `Command`, `Audit entry`, `Batch`, `Process`,
//! `Process-audit entry`, `Payload archive`. Mirrors the `commandbus` schema
//! 1:1 — see `migrations/` for the table definitions these are read from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Pending,
    InProgress,
    Completed,
    Canceled,
    InTroubleshootingQueue,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Canceled | CommandStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    Sent,
    Received,
    Completed,
    Canceled,
    Failed,
    MovedToTroubleshooting,
    OperatorRetry,
    OperatorCancel,
    OperatorComplete,
    BatchStarted,
    BatchCompleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchType {
    Command,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    InProgress,
    Completed,
    CompletedWithFailures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Pending,
    InProgress,
    WaitingForReply,
    WaitingForTsq,
    Compensating,
    Completed,
    Compensated,
    Failed,
    Canceled,
}

/// A command's durable metadata row. Payload is never stored here — it
/// lives in the queue body, or in `payload_archive` once moved to TSQ.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Command {
    pub domain: String,
    pub command_id: Uuid,
    pub command_type: String,
    pub status: CommandStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub queue_message_id: Option<i64>,
    pub correlation_id: Option<Uuid>,
    pub reply_queue: String,
    pub batch_id: Option<Uuid>,
    pub last_error_kind: Option<String>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditEntry {
    pub domain: String,
    pub command_id: Uuid,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Batch {
    pub domain: String,
    pub batch_id: Uuid,
    pub name: Option<String>,
    pub batch_type: BatchType,
    pub status: BatchStatus,
    pub total_count: i32,
    pub completed: i32,
    pub canceled: i32,
    pub failed: i32,
    pub in_troubleshooting: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn is_complete(&self) -> bool {
        self.completed + self.canceled + self.failed + self.in_troubleshooting >= self.total_count
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Process {
    pub domain: String,
    pub process_id: Uuid,
    pub process_type: String,
    pub status: ProcessStatus,
    pub current_step: Option<String>,
    pub state: serde_json::Value,
    pub batch_id: Option<Uuid>,
    pub last_error_kind: Option<String>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProcessAuditEntry {
    pub id: i64,
    pub domain: String,
    pub process_id: Uuid,
    pub step_name: String,
    pub command_id: Uuid,
    pub command_type: String,
    pub command_data: serde_json::Value,
    pub sent_at: DateTime<Utc>,
    pub reply_outcome: Option<String>,
    pub reply_data: Option<serde_json::Value>,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PayloadArchive {
    pub domain: String,
    pub command_id: Uuid,
    pub payload: serde_json::Value,
    pub archived_at: DateTime<Utc>,
}

/// Aggregated counters returned by `sp_refresh_batch_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub completed: i32,
    pub canceled: i32,
    pub failed: i32,
    pub in_troubleshooting: i32,
    pub is_complete: bool,
}
