//! Shared step-execution helper used by both [`crate::manager::ProcessManager::start`]
//! and [`crate::router::ProcessRouter`]'s continuation/compensation paths
//! (spec §4.7 "Execute-step").

use commandbus_core::{repository, Bus, ProcessStatus, SendRequest};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ProcessResult;
use crate::types::ProcessHandler;

/// Issue a step's command and record it. `status` is the process status to
/// persist alongside `current_step`: `WAITING_FOR_REPLY` for forward
/// progress, `COMPENSATING` while a rollback walk is in flight — the latter
/// keeps `ProcessRouter::handle_reply` routing the step's reply back into
/// `advance_compensation` instead of treating it as forward progress.
pub(crate) async fn execute_step(
    pool: &PgPool,
    bus: &Bus,
    handler: &dyn ProcessHandler,
    domain: &str,
    process_id: Uuid,
    state: &Value,
    step: &str,
    status: ProcessStatus,
) -> ProcessResult<()> {
    let (command_type, data) = handler.build_command(step, state)?;
    let command_id = Uuid::new_v4();
    let reply_to = commandbus_pgmq::process_replies_queue(domain);

    bus.send(SendRequest {
        domain: domain.to_string(),
        command_type: command_type.clone(),
        command_id,
        data: data.clone(),
        max_attempts: None,
        correlation_id: Some(process_id),
        reply_to: Some(reply_to),
        batch_id: None,
    })
    .await?;

    let mut tx = pool.begin().await?;
    repository::insert_process_audit(&mut *tx, domain, process_id, step, command_id, &command_type, &data).await?;
    repository::set_process_step(&mut *tx, domain, process_id, step, state, status).await?;
    tx.commit().await?;
    Ok(())
}
