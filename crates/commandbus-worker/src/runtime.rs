//! The dispatch loop (spec §4.4): lease, resolve handler, invoke, transition.
//! Grounded in the teacher's dual listen+poll worker loop
//! (`EventDrivenMessageProcessor`/`WorkerEventSystem`: a fallback poller plus
//! a notify-driven fast path) and in this workspace's own
//! `commandbus_pgmq::spawn_wake_task` bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use commandbus_core::{
    repository, AuditEventType, Bus, CommandMessage, CommandStatus, HandlerError, ReplyError,
    ReplyMessage,
};
use commandbus_pgmq::ReadMessage;
use serde_json::{json, Value};
use sqlx::Postgres;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::registry::{DispatchContext, HandlerRegistry};
use crate::stats::WorkerStats;

/// One worker's view of the dispatch loop for a single `domain`. Cheap to
/// construct; `run` drives it until `stop` is called.
pub struct WorkerRuntime {
    domain: String,
    bus: Bus,
    registry: Arc<HandlerRegistry>,
    semaphore: Arc<Semaphore>,
    stats: Arc<WorkerStats>,
    stopping: Arc<AtomicBool>,
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl WorkerRuntime {
    pub fn new(domain: impl Into<String>, bus: Bus, registry: Arc<HandlerRegistry>) -> Arc<Self> {
        let concurrency = bus.config().worker.concurrency;
        Arc::new(Self {
            domain: domain.into(),
            bus,
            registry,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            stats: Arc::new(WorkerStats::new()),
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Signal the loop to stop reading new messages. `run` returns once
    /// in-flight dispatches drain or the grace period elapses.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Relaxed);
    }

    /// Drive the leasing loop until `stop` is called. Safe to spawn as its
    /// own task; does not return until shutdown completes.
    pub async fn run(self: Arc<Self>) {
        let queue_name = commandbus_pgmq::commands_queue(&self.domain);
        let worker_config = self.bus.config().worker.clone();

        let wake = Arc::new(Notify::new());
        if worker_config.use_notify {
            commandbus_pgmq::spawn_wake_task(self.bus.pool().clone(), queue_name.clone(), wake.clone());
            self.stats.set_listener_connected(true);
        }

        info!(domain = %self.domain, concurrency = worker_config.concurrency, "worker runtime started");

        while !self.stopping.load(Ordering::Relaxed) {
            let available = self.semaphore.available_permits().max(1);
            let batch_size = worker_config.batch_size.min(available as i32).max(1);

            let messages = match self.bus.queue().read(
                &queue_name,
                worker_config.visibility_timeout_seconds,
                batch_size,
            )
            .await
            {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(error = %err, "queue read failed, backing off");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            if messages.is_empty() {
                let poll_wait = Duration::from_secs(worker_config.poll_interval_seconds.max(1));
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(poll_wait) => {}
                }
                continue;
            }

            for message in messages {
                let permit = match self.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let this = self.clone();
                tokio::spawn(async move {
                    this.stats.enter_dispatch();
                    if let Err(err) = this.dispatch(message).await {
                        error!(error = %err, "dispatch failed");
                    }
                    this.stats.exit_dispatch();
                    drop(permit);
                });
            }
        }

        let grace = Duration::from_secs(worker_config.shutdown_grace_period_seconds);
        let drain = self.semaphore.acquire_many(worker_config.concurrency as u32);
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(domain = %self.domain, "shutdown grace period elapsed with handlers still in flight");
        }
        info!(domain = %self.domain, "worker runtime stopped");
    }

    #[instrument(skip(self, message), fields(domain = %self.domain, msg_id = message.msg_id))]
    async fn dispatch(&self, message: ReadMessage) -> crate::error::WorkerResult<()> {
        let queue_name = commandbus_pgmq::commands_queue(&self.domain);
        let command: CommandMessage = serde_json::from_value(message.body.clone())?;

        let received = self.receive_with_local_retry(&command, message.msg_id).await?;

        let received = match received {
            Some(row) => row,
            None => {
                debug!(command_id = %command.command_id, "stale redelivery of an already-terminal command");
                self.bus.queue().delete(&queue_name, message.msg_id).await?;
                return Ok(());
            }
        };

        let ctx = DispatchContext {
            attempt: received.attempts,
            max_attempts: received.max_attempts,
            msg_id: message.msg_id,
        };

        // Spawned so a handler panic is caught as a JoinError instead of
        // taking down this dispatch task before finish_error can run.
        let outcome = match self.registry.get(&self.domain, &command.command_type) {
            Some(handler) => {
                let handler_command = command.clone();
                match tokio::spawn(async move { handler.handle(&handler_command, &ctx).await }).await {
                    Ok(outcome) => outcome,
                    Err(join_err) => Err(HandlerError::from_any(&join_err)),
                }
            }
            None => Err(HandlerError::UnknownHandler {
                domain: self.domain.clone(),
                command_type: command.command_type.clone(),
            }),
        };

        match outcome {
            Ok(result) => self.finish_success(&queue_name, &command, &ctx, result).await,
            Err(err) => self.finish_error(&queue_name, &command, &ctx, err).await,
        }
    }

    async fn begin_timed_tx(&self) -> commandbus_core::CommandBusResult<sqlx::Transaction<'static, Postgres>> {
        let mut tx = self.bus.pool().begin().await?;
        let timeout_ms = self.bus.config().worker.statement_timeout_ms();
        sqlx::query(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// Lease the command via `sp_receive_command`, retrying a bounded
    /// number of times on an infrastructure failure (lost connection,
    /// deadlock, statement timeout) before giving up and letting the
    /// message's lease expire for redelivery (spec §7 "local recovery").
    async fn receive_with_local_retry(
        &self,
        command: &CommandMessage,
        msg_id: i64,
    ) -> crate::error::WorkerResult<Option<commandbus_core::Command>> {
        let worker_config = &self.bus.config().worker;
        let mut attempt = 0;

        loop {
            let attempted = async {
                let mut tx = self.begin_timed_tx().await?;
                let received = repository::receive_command(
                    &mut *tx,
                    &self.domain,
                    command.command_id,
                    CommandStatus::InProgress,
                    msg_id,
                )
                .await?;
                tx.commit().await?;
                Ok::<_, commandbus_core::CommandBusError>(received)
            }
            .await;

            match attempted {
                Ok(received) => return Ok(received),
                Err(err @ commandbus_core::CommandBusError::Database(_)) if attempt < worker_config.local_retry_attempts => {
                    attempt += 1;
                    warn!(attempt, error = %err, command_id = %command.command_id, "local retry after infrastructure error");
                    tokio::time::sleep(Duration::from_millis(worker_config.local_retry_delay_ms)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn finish_success(
        &self,
        queue_name: &str,
        command: &CommandMessage,
        ctx: &DispatchContext,
        result: Value,
    ) -> crate::error::WorkerResult<()> {
        let mut tx = self.begin_timed_tx().await?;
        repository::finish_command(
            &mut *tx,
            &self.domain,
            command.command_id,
            CommandStatus::Completed,
            AuditEventType::Completed,
            None,
            Some(&json!({"result": &result})),
        )
        .await?;
        tx.commit().await?;

        self.bus.queue().delete(queue_name, ctx.msg_id).await?;

        if !command.reply_to.is_empty() {
            let reply = ReplyMessage::success(
                command.command_id,
                command.correlation_id,
                &self.domain,
                &command.command_type,
                result,
            );
            let body = serde_json::to_value(&reply)?;
            self.bus.queue().send(self.bus.pool(), &command.reply_to, &body).await?;
        }

        self.stats.record_completed();
        Ok(())
    }

    async fn finish_error(
        &self,
        queue_name: &str,
        command: &CommandMessage,
        ctx: &DispatchContext,
        err: HandlerError,
    ) -> crate::error::WorkerResult<()> {
        let (kind, code, message) = err.error_triplet();

        if matches!(err, HandlerError::Transient { .. }) && ctx.attempt < ctx.max_attempts {
            let mut tx = self.begin_timed_tx().await?;
            repository::fail_command(
                &mut *tx,
                &self.domain,
                command.command_id,
                kind,
                &code,
                &message,
                ctx.attempt,
                ctx.max_attempts,
            )
            .await?;
            tx.commit().await?;

            let delay = self.bus.config().backoff_for_attempt(ctx.attempt);
            self.bus.queue().set_visibility(queue_name, ctx.msg_id, delay as i32).await?;
            return Ok(());
        }

        let (status, event, reply_outcome_failed) = if matches!(err, HandlerError::BusinessRule { .. }) {
            (CommandStatus::Failed, AuditEventType::Failed, true)
        } else {
            (
                CommandStatus::InTroubleshootingQueue,
                AuditEventType::MovedToTroubleshooting,
                false,
            )
        };

        let mut tx = self.begin_timed_tx().await?;
        repository::finish_command(
            &mut *tx,
            &self.domain,
            command.command_id,
            status,
            event,
            Some((kind, &code, &message)),
            None,
        )
        .await?;
        tx.commit().await?;

        self.bus.queue().archive(queue_name, ctx.msg_id).await?;

        if status == CommandStatus::InTroubleshootingQueue {
            self.archive_payload(command.command_id, command).await?;
            self.stats.record_tsq();
        } else {
            self.stats.record_failed();
        }

        if reply_outcome_failed && !command.reply_to.is_empty() {
            let reply = ReplyMessage::failed(
                command.command_id,
                command.correlation_id,
                &self.domain,
                &command.command_type,
                ReplyError {
                    code: code.clone(),
                    message: message.clone(),
                    class: kind.to_string(),
                },
            );
            let body = serde_json::to_value(&reply)?;
            self.bus.queue().send(self.bus.pool(), &command.reply_to, &body).await?;
        }

        Ok(())
    }

    /// Preserve the payload independently of PGMQ's own archive table, so
    /// operator retry still works after PGMQ's archive is pruned.
    async fn archive_payload(&self, command_id: Uuid, command: &CommandMessage) -> commandbus_core::CommandBusResult<()> {
        sqlx::query(
            "INSERT INTO commandbus.payload_archive (domain, command_id, payload, archived_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (domain, command_id) DO UPDATE SET payload = EXCLUDED.payload, archived_at = now()",
        )
        .bind(&self.domain)
        .bind(command_id)
        .bind(serde_json::to_value(command)?)
        .execute(self.bus.pool())
        .await?;
        Ok(())
    }
}
