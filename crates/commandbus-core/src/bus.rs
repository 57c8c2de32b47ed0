//! Producer API: `send`, `send_batch`, `create_batch`, plus the read-only
//! conveniences and TSQ entry points a producer process needs (spec §4.2).

use std::sync::Arc;

use chrono::Utc;
use commandbus_pgmq::QueueClient;
use dashmap::DashMap;
use serde_json::Value;
use sqlx::{PgPool, Postgres};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::batch::maybe_fire_completion;
use crate::config::CommandBusConfig;
use crate::error::{CommandBusError, CommandBusResult};
use crate::models::{AuditEventType, BatchStats, BatchType, Command, CommandStatus};
use crate::repository::{self, TsqFilter};
use crate::tsq;

/// A single command to submit, shared by `send`, `send_batch`, and
/// `create_batch`.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub domain: String,
    pub command_type: String,
    pub command_id: Uuid,
    pub data: Value,
    pub max_attempts: Option<i32>,
    pub correlation_id: Option<Uuid>,
    pub reply_to: Option<String>,
    pub batch_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy)]
pub struct SendResult {
    pub command_id: Uuid,
    pub msg_id: i64,
}

pub type BatchCompletionCallback = Arc<dyn Fn(Uuid, BatchStats) + Send + Sync>;

/// Transactional entry point over the command bus. Cheap to clone: the
/// pool and queue client are themselves `Clone` over an `Arc`, and the
/// callback map is shared.
#[derive(Clone)]
pub struct Bus {
    pool: PgPool,
    queue: QueueClient,
    config: CommandBusConfig,
    batch_callbacks: Arc<DashMap<Uuid, BatchCompletionCallback>>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus").finish_non_exhaustive()
    }
}

impl Bus {
    pub fn new(pool: PgPool, queue: QueueClient, config: CommandBusConfig) -> Self {
        Self {
            pool,
            queue,
            config,
            batch_callbacks: Arc::new(DashMap::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn queue(&self) -> &QueueClient {
        &self.queue
    }

    pub fn config(&self) -> &CommandBusConfig {
        &self.config
    }

    /// Submit one command. Inside a single transaction: insert the
    /// metadata row, enqueue, stamp `queue_message_id`, append the `SENT`
    /// audit event, then notify — in that order, so the notification is
    /// only observable after commit.
    #[instrument(skip(self, request), fields(domain = %request.domain, command_type = %request.command_type, command_id = %request.command_id))]
    pub async fn send(&self, request: SendRequest) -> CommandBusResult<SendResult> {
        let mut tx = self.pool.begin().await?;
        let result = Self::send_in(&mut tx, &self.queue, &self.config, request).await?;
        tx.commit().await?;
        info!(msg_id = result.msg_id, "command sent");
        Ok(result)
    }

    /// Core of [`Bus::send`], against a caller-supplied transaction so
    /// [`Bus::create_batch`] can thread every command insert through the
    /// same transaction as the batch row. On a duplicate `command_id` this
    /// returns without committing; the caller's transaction then rolls back
    /// on drop, undoing any earlier commands in the same batch.
    async fn send_in(
        tx: &mut sqlx::Transaction<'static, Postgres>,
        queue: &QueueClient,
        config: &CommandBusConfig,
        request: SendRequest,
    ) -> CommandBusResult<SendResult> {
        let max_attempts = request.max_attempts.unwrap_or(config.default_max_attempts);
        let reply_to = request.reply_to.clone().unwrap_or_default();

        let inserted = sqlx::query(
            "INSERT INTO commandbus.command \
             (domain, command_id, command_type, status, attempts, max_attempts, \
              correlation_id, reply_queue, batch_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $8, now(), now()) \
             ON CONFLICT (domain, command_id) DO NOTHING",
        )
        .bind(&request.domain)
        .bind(request.command_id)
        .bind(&request.command_type)
        .bind(CommandStatus::Pending)
        .bind(max_attempts)
        .bind(request.correlation_id)
        .bind(&reply_to)
        .bind(request.batch_id)
        .execute(&mut **tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(CommandBusError::DuplicateCommand {
                domain: request.domain,
                command_id: request.command_id,
            });
        }

        let queue_name = commandbus_pgmq::commands_queue(&request.domain);
        let body = serde_json::json!({
            "command_id": request.command_id,
            "type": request.command_type,
            "domain": request.domain,
            "correlation_id": request.correlation_id,
            "reply_to": reply_to,
            "created_at": Utc::now(),
            "data": request.data,
        });

        let msg_id = queue.send(&mut **tx, &queue_name, &body).await?;

        sqlx::query(
            "UPDATE commandbus.command SET queue_message_id = $3, updated_at = now() \
             WHERE domain = $1 AND command_id = $2",
        )
        .bind(&request.domain)
        .bind(request.command_id)
        .bind(msg_id)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            "INSERT INTO commandbus.audit (domain, command_id, event_type, timestamp, details) \
             VALUES ($1, $2, $3, now(), $4)",
        )
        .bind(&request.domain)
        .bind(request.command_id)
        .bind(AuditEventType::Sent)
        .bind(serde_json::json!({"msg_id": msg_id}))
        .execute(&mut **tx)
        .await?;

        queue.notify(&mut **tx, &queue_name).await?;

        Ok(SendResult {
            command_id: request.command_id,
            msg_id,
        })
    }

    /// Submit many independent commands, without aggregate tracking.
    /// Inserted in chunks so a single oversized batch doesn't hold one
    /// giant transaction per command; each command is still its own
    /// transaction via [`Bus::send`].
    pub async fn send_batch(
        &self,
        requests: Vec<SendRequest>,
        chunked: bool,
        chunk_size: usize,
    ) -> Vec<CommandBusResult<SendResult>> {
        let chunk_size = if chunked { chunk_size.max(1) } else { requests.len().max(1) };
        let mut results = Vec::with_capacity(requests.len());
        for chunk in requests.chunks(chunk_size) {
            for request in chunk {
                results.push(self.send(request.clone()).await);
            }
        }
        results
    }

    /// Create a batch of commands sharing a `batch_id`, in one transaction
    /// for the batch row and all N command inserts/sends (spec §4.5: "A
    /// batch is created in one transaction that inserts the batch row ...
    /// and all N commands referencing that batch_id"). A failure partway
    /// through — a duplicate `command_id`, a lost connection — rolls the
    /// whole batch back on transaction drop, so `total_count` is never
    /// committed without all N command rows. `on_complete` is registered
    /// in-process only, and only once the batch itself is durably created
    /// (spec §4.5/§9: best-effort, lost on restart).
    pub async fn create_batch(
        &self,
        domain: &str,
        commands: Vec<SendRequest>,
        name: Option<String>,
        on_complete: Option<BatchCompletionCallback>,
    ) -> CommandBusResult<(Uuid, usize)> {
        let batch_id = Uuid::new_v4();
        let total = commands.len();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO commandbus.batch \
             (domain, batch_id, name, batch_type, status, total_count, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now(), now())",
        )
        .bind(domain)
        .bind(batch_id)
        .bind(&name)
        .bind(BatchType::Command)
        .bind(crate::models::BatchStatus::Pending)
        .bind(total as i32)
        .execute(&mut *tx)
        .await?;

        for mut request in commands {
            request.domain = domain.to_string();
            request.batch_id = Some(batch_id);
            Self::send_in(&mut tx, &self.queue, &self.config, request).await?;
        }

        tx.commit().await?;

        if let Some(callback) = on_complete {
            self.batch_callbacks.insert(batch_id, callback);
        }

        Ok((batch_id, total))
    }

    /// Recompute a batch's aggregate stats and fire its completion callback
    /// the first time the refresh observes `is_complete`.
    pub async fn refresh_batch_stats(&self, domain: &str, batch_id: Uuid) -> CommandBusResult<BatchStats> {
        let stats = repository::refresh_batch_stats(&self.pool, domain, batch_id).await?;
        maybe_fire_completion(&self.batch_callbacks, batch_id, stats);
        Ok(stats)
    }

    pub async fn get_command(&self, domain: &str, command_id: Uuid) -> CommandBusResult<Option<Command>> {
        repository::get_command(&self.pool, domain, command_id).await
    }

    pub async fn list_by_batch(&self, domain: &str, batch_id: Uuid) -> CommandBusResult<Vec<Command>> {
        repository::list_by_batch(&self.pool, domain, batch_id).await
    }

    pub async fn list_tsq(&self, domain: &str, filter: &TsqFilter) -> CommandBusResult<Vec<Command>> {
        repository::list_tsq(&self.pool, domain, filter).await
    }

    pub async fn operator_retry(&self, domain: &str, command_id: Uuid) -> CommandBusResult<SendResult> {
        tsq::operator_retry(&self.pool, &self.queue, domain, command_id).await
    }

    pub async fn operator_cancel(&self, domain: &str, command_id: Uuid, reason: &str) -> CommandBusResult<()> {
        tsq::operator_cancel(&self.pool, &self.queue, domain, command_id, reason).await
    }

    pub async fn operator_complete(
        &self,
        domain: &str,
        command_id: Uuid,
        result: Value,
        notes: Option<&str>,
    ) -> CommandBusResult<()> {
        tsq::operator_complete(&self.pool, &self.queue, domain, command_id, result, notes).await
    }
}
