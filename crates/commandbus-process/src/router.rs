//! Process-reply router (spec §4.7): a single long-running reader over
//! `<domain>__process_replies`, delivering each reply to `handle_reply` and
//! deleting it only after that returns successfully — on error the lease
//! expires and the reply is redelivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use commandbus_core::{repository, Bus, CommandBusError, ProcessStatus, ReplyMessage, ReplyOutcome};
use sqlx::PgPool;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{ProcessError, ProcessResult};
use crate::registry::ProcessRegistry;
use crate::steps::execute_step;
use crate::types::ProcessHandler;

const VISIBILITY_TIMEOUT_SECONDS: i32 = 30;
const BATCH_SIZE: i32 = 10;
const POLL_INTERVAL_SECONDS: u64 = 5;

/// Drives every process in `domain` to completion by reading its reply
/// queue. One router per domain; processes of any registered type share it.
pub struct ProcessRouter {
    domain: String,
    pool: PgPool,
    bus: Bus,
    registry: Arc<ProcessRegistry>,
    stopping: Arc<AtomicBool>,
}

impl std::fmt::Debug for ProcessRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRouter")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl ProcessRouter {
    pub fn new(domain: impl Into<String>, pool: PgPool, bus: Bus, registry: Arc<ProcessRegistry>) -> Arc<Self> {
        Arc::new(Self {
            domain: domain.into(),
            pool,
            bus,
            registry,
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Relaxed);
    }

    pub async fn run(self: Arc<Self>) {
        let queue_name = commandbus_pgmq::process_replies_queue(&self.domain);
        let wake = Arc::new(Notify::new());
        commandbus_pgmq::spawn_wake_task(self.bus.pool().clone(), queue_name.clone(), wake.clone());

        info!(domain = %self.domain, "process router started");

        while !self.stopping.load(Ordering::Relaxed) {
            let messages = match self.bus.queue().read(&queue_name, VISIBILITY_TIMEOUT_SECONDS, BATCH_SIZE).await {
                Ok(messages) => messages,
                Err(err) => {
                    warn!(error = %err, "process-reply read failed, backing off");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            if messages.is_empty() {
                tokio::select! {
                    _ = wake.notified() => {}
                    _ = tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECONDS)) => {}
                }
                continue;
            }

            for message in messages {
                let reply: ReplyMessage = match serde_json::from_value(message.body.clone()) {
                    Ok(reply) => reply,
                    Err(err) => {
                        error!(error = %err, "malformed process reply, leaving for redelivery");
                        continue;
                    }
                };

                match self.handle_reply(&reply).await {
                    Ok(()) => {
                        if let Err(err) = self.bus.queue().delete(&queue_name, message.msg_id).await {
                            error!(error = %err, "failed to delete processed reply");
                        }
                    }
                    Err(err) => {
                        error!(error = %err, command_id = %reply.command_id, "process reply handling failed, leaving for redelivery");
                    }
                }
            }
        }

        info!(domain = %self.domain, "process router stopped");
    }

    #[instrument(skip(self, reply), fields(domain = %self.domain, command_id = %reply.command_id))]
    async fn handle_reply(&self, reply: &ReplyMessage) -> ProcessResult<()> {
        let process_id = match reply.correlation_id {
            Some(id) => id,
            None => {
                warn!("process-reply without a correlation_id, ignoring");
                return Ok(());
            }
        };

        let outcome = match reply.outcome {
            ReplyOutcome::Success => "SUCCESS",
            ReplyOutcome::Failed => "FAILED",
            ReplyOutcome::Canceled => "CANCELED",
        };

        let step_name = match repository::record_process_reply(
            &self.pool,
            &self.domain,
            process_id,
            reply.command_id,
            outcome,
            Some(&reply.data),
        )
        .await?
        {
            Some(step_name) => step_name,
            None => {
                debug!(%process_id, "reply already recorded, skipping redelivered duplicate");
                return Ok(());
            }
        };

        let process = self.get_process(process_id).await?;

        let handler = self
            .registry
            .get(&process.process_type)
            .ok_or_else(|| CommandBusError::UnknownProcessType(process.process_type.clone()))?;

        match reply.outcome {
            ReplyOutcome::Success if process.status == ProcessStatus::Compensating => {
                self.advance_compensation(handler.as_ref(), process_id).await
            }
            ReplyOutcome::Success => {
                let mut state = process.state.clone();
                handler.update_state(&mut state, &step_name, reply)?;

                match handler.next_step(&step_name, reply, &state)? {
                    Some(next) => {
                        execute_step(
                            &self.pool,
                            &self.bus,
                            handler.as_ref(),
                            &self.domain,
                            process_id,
                            &state,
                            &next,
                            ProcessStatus::WaitingForReply,
                        )
                        .await
                    }
                    None => {
                        repository::finish_process(&self.pool, &self.domain, process_id, ProcessStatus::Completed, &state)
                            .await?;
                        info!(%process_id, "process completed");
                        Ok(())
                    }
                }
            }
            ReplyOutcome::Failed => {
                let error = reply.error.as_ref().ok_or(ProcessError::MissingReplyError)?;
                repository::pause_process_for_tsq(
                    &self.pool,
                    &self.domain,
                    process_id,
                    &error.class,
                    &error.code,
                    &error.message,
                )
                .await?;
                info!(%process_id, "process paused pending operator action on the failing command");
                Ok(())
            }
            ReplyOutcome::Canceled => {
                repository::enter_compensating(&self.pool, &self.domain, process_id).await?;
                self.advance_compensation(handler.as_ref(), process_id).await
            }
        }
    }

    /// Walk completed steps in reverse audit order, issuing the next
    /// not-yet-issued compensation command; once none remain, finish
    /// `COMPENSATED` (spec §4.7 reply outcome `CANCELED`).
    async fn advance_compensation(&self, handler: &dyn ProcessHandler, process_id: Uuid) -> ProcessResult<()> {
        let audit = repository::list_process_audit(&self.pool, &self.domain, process_id).await?;

        let mut successes: Vec<_> = audit
            .iter()
            .filter(|entry| entry.reply_outcome.as_deref() == Some("SUCCESS"))
            .collect();
        successes.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));

        for entry in successes {
            let Some(compensation_step) = handler.compensation_step(&entry.step_name)? else {
                continue;
            };
            if audit.iter().any(|e| e.step_name == compensation_step) {
                continue;
            }

            let process = self.get_process(process_id).await?;
            return execute_step(
                &self.pool,
                &self.bus,
                handler,
                &self.domain,
                process_id,
                &process.state,
                &compensation_step,
                ProcessStatus::Compensating,
            )
            .await;
        }

        let process = self.get_process(process_id).await?;
        repository::finish_process(&self.pool, &self.domain, process_id, ProcessStatus::Compensated, &process.state)
            .await?;
        info!(%process_id, "process compensation complete");
        Ok(())
    }

    async fn get_process(&self, process_id: Uuid) -> ProcessResult<commandbus_core::Process> {
        repository::get_process(&self.pool, &self.domain, process_id)
            .await?
            .ok_or_else(|| {
                ProcessError::CommandBus(CommandBusError::ProcessNotFound {
                    domain: self.domain.clone(),
                    process_id,
                })
            })
    }
}
