//! Troubleshooting Queue operator operations (spec §4.6). A command in
//! `IN_TROUBLESHOOTING_QUEUE` is inert for workers; these are the only three
//! ways it leaves that state.

use commandbus_pgmq::QueueClient;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::bus::SendResult;
use crate::error::{CommandBusError, CommandBusResult};
use crate::messages::ReplyMessage;
use crate::models::{AuditEventType, CommandStatus};
use crate::repository;

/// Reconstruct the original command payload for an operator retry:
/// PGMQ's own archive first, falling back to the `payload_archive` table
/// (written when the command moved into TSQ) so retry still works after
/// PGMQ's archive is purged.
async fn reconstruct_payload(
    pool: &PgPool,
    queue: &QueueClient,
    domain: &str,
    command: &crate::models::Command,
) -> CommandBusResult<Value> {
    if let Some(msg_id) = command.queue_message_id {
        let queue_name = commandbus_pgmq::commands_queue(domain);
        if let Some(body) = queue.read_archived(&queue_name, msg_id).await? {
            return Ok(body);
        }
    }

    let archived: Option<(Value,)> = sqlx::query_as(
        "SELECT payload FROM commandbus.payload_archive WHERE domain = $1 AND command_id = $2",
    )
    .bind(domain)
    .bind(command.command_id)
    .fetch_optional(pool)
    .await?;

    archived
        .map(|(payload,)| payload)
        .ok_or_else(|| CommandBusError::CommandNotFound {
            domain: domain.to_string(),
            command_id: command.command_id,
        })
}

async fn require_in_tsq(
    pool: &PgPool,
    domain: &str,
    command_id: Uuid,
) -> CommandBusResult<crate::models::Command> {
    let command = repository::get_command(pool, domain, command_id)
        .await?
        .ok_or(CommandBusError::CommandNotFound {
            domain: domain.to_string(),
            command_id,
        })?;

    if command.status != CommandStatus::InTroubleshootingQueue {
        return Err(CommandBusError::NotInTroubleshootingQueue {
            command_id,
            status: format!("{:?}", command.status),
        });
    }
    Ok(command)
}

/// Requeue a command from TSQ: fresh `msg_id`, `status = PENDING`,
/// `attempts` reset to 0 (resolved Open Question, see DESIGN.md).
#[instrument(skip(pool, queue), fields(%domain, %command_id))]
pub async fn operator_retry(
    pool: &PgPool,
    queue: &QueueClient,
    domain: &str,
    command_id: Uuid,
) -> CommandBusResult<SendResult> {
    let command = require_in_tsq(pool, domain, command_id).await?;
    let payload = reconstruct_payload(pool, queue, domain, &command).await?;

    let queue_name = commandbus_pgmq::commands_queue(domain);
    let new_msg_id = queue.send(pool, &queue_name, &payload).await?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "UPDATE commandbus.command \
         SET status = $3, attempts = 0, queue_message_id = $4, updated_at = now() \
         WHERE domain = $1 AND command_id = $2",
    )
    .bind(domain)
    .bind(command_id)
    .bind(CommandStatus::Pending)
    .bind(new_msg_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO commandbus.audit (domain, command_id, event_type, timestamp, details) \
         VALUES ($1, $2, $3, now(), $4)",
    )
    .bind(domain)
    .bind(command_id)
    .bind(AuditEventType::OperatorRetry)
    .bind(serde_json::json!({"new_msg_id": new_msg_id}))
    .execute(&mut *tx)
    .await?;

    repository::tsq_retry(&mut *tx, domain, command_id, new_msg_id).await?;

    queue.notify(&mut *tx, &queue_name).await?;
    tx.commit().await?;
    info!(new_msg_id, "command retried by operator");

    Ok(SendResult {
        command_id,
        msg_id: new_msg_id,
    })
}

/// Cancel a command parked in TSQ: terminal `CANCELED`, batch counters
/// adjusted, a `CANCELED` reply published if `reply_to` was set.
#[instrument(skip(pool, queue), fields(%domain, %command_id))]
pub async fn operator_cancel(
    pool: &PgPool,
    queue: &QueueClient,
    domain: &str,
    command_id: Uuid,
    reason: &str,
) -> CommandBusResult<()> {
    let command = require_in_tsq(pool, domain, command_id).await?;

    let mut tx = pool.begin().await?;
    repository::finish_command(
        &mut *tx,
        domain,
        command_id,
        CommandStatus::Canceled,
        AuditEventType::OperatorCancel,
        None,
        Some(&serde_json::json!({"reason": reason})),
    )
    .await?;
    repository::tsq_cancel(&mut *tx, domain, command_id, reason).await?;
    tx.commit().await?;

    if !command.reply_queue.is_empty() {
        let reply = ReplyMessage::canceled(
            command_id,
            command.correlation_id,
            domain,
            &command.command_type,
        );
        let body = serde_json::to_value(&reply)?;
        queue.send(pool, &command.reply_queue, &body).await?;
    }

    info!("command canceled by operator");
    Ok(())
}

/// Complete a command parked in TSQ: terminal `COMPLETED`, batch counters
/// adjusted, a `SUCCESS` reply published if `reply_to` was set.
#[instrument(skip(pool, queue, result), fields(%domain, %command_id))]
pub async fn operator_complete(
    pool: &PgPool,
    queue: &QueueClient,
    domain: &str,
    command_id: Uuid,
    result: Value,
    notes: Option<&str>,
) -> CommandBusResult<()> {
    let command = require_in_tsq(pool, domain, command_id).await?;

    let mut tx = pool.begin().await?;
    repository::finish_command(
        &mut *tx,
        domain,
        command_id,
        CommandStatus::Completed,
        AuditEventType::OperatorComplete,
        None,
        Some(&serde_json::json!({"result": result, "notes": notes})),
    )
    .await?;
    repository::tsq_complete(&mut *tx, domain, command_id, &result, notes).await?;
    tx.commit().await?;

    if !command.reply_queue.is_empty() {
        let reply = ReplyMessage::success(
            command_id,
            command.correlation_id,
            domain,
            &command.command_type,
            result,
        );
        let body = serde_json::to_value(&reply)?;
        queue.send(pool, &command.reply_queue, &body).await?;
    }

    info!("command completed by operator");
    Ok(())
}
