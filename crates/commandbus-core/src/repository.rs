//! Typed wrappers over the stored procedures that are the only writers of
//! `command.status` in the worker path (spec §4.3). Each function is a
//! single prepared statement against a PL/pgSQL function in the
//! `commandbus` schema — never an ORM macro — mirroring the teacher's
//! pattern of a thin typed call per stored procedure.

use chrono::Utc;
use serde_json::Value;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::error::CommandBusResult;
use crate::models::{
    AuditEventType, BatchStats, Command, CommandStatus, Process, ProcessAuditEntry, ProcessStatus,
};

/// Atomically transition a leased command to `new_status` (normally
/// `IN_PROGRESS`), bumping `attempts` and recording the receive audit. A
/// `None` result means the row was already terminal (duplicate delivery);
/// the caller should `queue.delete` the stale message without dispatching.
pub async fn receive_command<'e, E>(
    executor: E,
    domain: &str,
    command_id: Uuid,
    new_status: CommandStatus,
    msg_id: i64,
) -> CommandBusResult<Option<Command>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, Command>(
        "SELECT * FROM commandbus.sp_receive_command($1, $2, $3, $4)",
    )
    .bind(domain)
    .bind(command_id)
    .bind(new_status)
    .bind(msg_id)
    .fetch_optional(executor)
    .await?;
    Ok(row)
}

/// Move a command to a terminal (or TSQ) status. Idempotent: a second call
/// for the same target status is a no-op against `status`/`updated_at`, but
/// per the resolved Open Question (DESIGN.md) it still appends an audit row
/// so the audit log stays strictly append-only.
#[allow(clippy::too_many_arguments)]
pub async fn finish_command<'e, E>(
    executor: E,
    domain: &str,
    command_id: Uuid,
    status: CommandStatus,
    event_type: AuditEventType,
    error: Option<(&str, &str, &str)>,
    details: Option<&Value>,
) -> CommandBusResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    let (error_kind, error_code, error_message) = match error {
        Some((kind, code, message)) => (Some(kind), Some(code), Some(message)),
        None => (None, None, None),
    };

    sqlx::query("SELECT commandbus.sp_finish_command($1, $2, $3, $4, $5, $6, $7, $8)")
        .bind(domain)
        .bind(command_id)
        .bind(status)
        .bind(event_type)
        .bind(error_kind)
        .bind(error_code)
        .bind(error_message)
        .bind(details)
        .execute(executor)
        .await?;
    Ok(())
}

/// Record a transient failure without changing `status` — the row stays
/// `IN_PROGRESS`; the worker pairs this with `queue.set_visibility` to
/// schedule the retry.
#[allow(clippy::too_many_arguments)]
pub async fn fail_command<'e, E>(
    executor: E,
    domain: &str,
    command_id: Uuid,
    error_kind: &str,
    error_code: &str,
    error_message: &str,
    attempt: i32,
    max_attempts: i32,
) -> CommandBusResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("SELECT commandbus.sp_fail_command($1, $2, $3, $4, $5, $6, $7)")
        .bind(domain)
        .bind(command_id)
        .bind(error_kind)
        .bind(error_code)
        .bind(error_message)
        .bind(attempt)
        .bind(max_attempts)
        .execute(executor)
        .await?;
    Ok(())
}

/// Recompute a batch's aggregate counters and status on demand. This is the
/// only path that ever touches batch counters on the command side — the
/// terminal procedures above deliberately do not.
pub async fn refresh_batch_stats<'e, E>(
    executor: E,
    domain: &str,
    batch_id: Uuid,
) -> CommandBusResult<BatchStats>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: (i32, i32, i32, i32, bool) = sqlx::query_as(
        "SELECT completed, canceled, failed, in_troubleshooting, is_complete \
         FROM commandbus.sp_refresh_batch_stats($1, $2)",
    )
    .bind(domain)
    .bind(batch_id)
    .fetch_one(executor)
    .await?;

    Ok(BatchStats {
        completed: row.0,
        canceled: row.1,
        failed: row.2,
        in_troubleshooting: row.3,
        is_complete: row.4,
    })
}

/// Operator-retry: requeue a command from `IN_TROUBLESHOOTING_QUEUE` back to
/// `PENDING` with a freshly assigned `msg_id`, resetting `attempts` to 0
/// (resolved Open Question, see DESIGN.md), and decrementing the batch's
/// `in_troubleshooting` counter.
pub async fn tsq_retry<'e, E>(
    executor: E,
    domain: &str,
    command_id: Uuid,
    new_msg_id: i64,
) -> CommandBusResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    // Preconditions (status, existence) are checked by the caller via
    // `require_in_tsq` before this is invoked; this call only adjusts the
    // associated batch's `in_troubleshooting` counter.
    sqlx::query("SELECT commandbus.sp_tsq_retry($1, $2, $3)")
        .bind(domain)
        .bind(command_id)
        .bind(new_msg_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Operator-cancel: finish as `CANCELED` and adjust batch counters.
pub async fn tsq_cancel<'e, E>(
    executor: E,
    domain: &str,
    command_id: Uuid,
    reason: &str,
) -> CommandBusResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("SELECT commandbus.sp_tsq_cancel($1, $2, $3)")
        .bind(domain)
        .bind(command_id)
        .bind(reason)
        .execute(executor)
        .await?;
    Ok(())
}

/// Operator-complete: finish as `COMPLETED` and adjust batch counters.
pub async fn tsq_complete<'e, E>(
    executor: E,
    domain: &str,
    command_id: Uuid,
    result: &Value,
    notes: Option<&str>,
) -> CommandBusResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("SELECT commandbus.sp_tsq_complete($1, $2, $3, $4)")
        .bind(domain)
        .bind(command_id)
        .bind(result)
        .bind(notes)
        .execute(executor)
        .await?;
    Ok(())
}

/// Read-only convenience: fetch a command by its idempotency key.
pub async fn get_command<'e, E>(
    executor: E,
    domain: &str,
    command_id: Uuid,
) -> CommandBusResult<Option<Command>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, Command>(
        "SELECT * FROM commandbus.command WHERE domain = $1 AND command_id = $2",
    )
    .bind(domain)
    .bind(command_id)
    .fetch_optional(executor)
    .await?;
    Ok(row)
}

/// Read-only convenience: all commands sharing a `batch_id`.
pub async fn list_by_batch<'e, E>(
    executor: E,
    domain: &str,
    batch_id: Uuid,
) -> CommandBusResult<Vec<Command>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, Command>(
        "SELECT * FROM commandbus.command WHERE domain = $1 AND batch_id = $2 ORDER BY created_at",
    )
    .bind(domain)
    .bind(batch_id)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

#[derive(Debug, Clone, Default)]
pub struct TsqFilter {
    pub command_type: Option<String>,
    pub since: Option<chrono::DateTime<Utc>>,
    pub until: Option<chrono::DateTime<Utc>>,
    pub limit: i64,
    pub after_command_id: Option<Uuid>,
}

/// List commands currently parked in the troubleshooting queue, newest
/// first, with optional filtering and `(limit, after_command_id)` paging.
pub async fn list_tsq<'e, E>(
    executor: E,
    domain: &str,
    filter: &TsqFilter,
) -> CommandBusResult<Vec<Command>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, Command>(
        "SELECT * FROM commandbus.command \
         WHERE domain = $1 \
           AND status = 'IN_TROUBLESHOOTING_QUEUE' \
           AND ($2::text IS NULL OR command_type = $2) \
           AND ($3::timestamptz IS NULL OR updated_at >= $3) \
           AND ($4::timestamptz IS NULL OR updated_at <= $4) \
           AND ($5::uuid IS NULL OR command_id > $5) \
         ORDER BY command_id \
         LIMIT $6",
    )
    .bind(domain)
    .bind(&filter.command_type)
    .bind(filter.since)
    .bind(filter.until)
    .bind(filter.after_command_id)
    .bind(if filter.limit > 0 { filter.limit } else { 100 })
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// Read-only convenience for the process manager/router: fetch a process
/// by `(domain, process_id)`.
pub async fn get_process<'e, E>(
    executor: E,
    domain: &str,
    process_id: Uuid,
) -> CommandBusResult<Option<Process>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, Process>(
        "SELECT * FROM commandbus.process WHERE domain = $1 AND process_id = $2",
    )
    .bind(domain)
    .bind(process_id)
    .fetch_optional(executor)
    .await?;
    Ok(row)
}

/// Process-audit rows for a process, in issue order — used by the router
/// and by compensation to walk completed steps in reverse.
pub async fn list_process_audit<'e, E>(
    executor: E,
    domain: &str,
    process_id: Uuid,
) -> CommandBusResult<Vec<ProcessAuditEntry>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, ProcessAuditEntry>(
        "SELECT * FROM commandbus.process_audit \
         WHERE domain = $1 AND process_id = $2 \
         ORDER BY sent_at",
    )
    .bind(domain)
    .bind(process_id)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// Create a process's durable row with status `PENDING` (spec §4.7 "Start").
pub async fn insert_process<'e, E>(
    executor: E,
    domain: &str,
    process_id: Uuid,
    process_type: &str,
    state: &Value,
) -> CommandBusResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO commandbus.process \
         (domain, process_id, process_type, status, state, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, now(), now())",
    )
    .bind(domain)
    .bind(process_id)
    .bind(process_type)
    .bind(ProcessStatus::Pending)
    .bind(state)
    .execute(executor)
    .await?;
    Ok(())
}

/// Append a process-audit row for a step just sent.
#[allow(clippy::too_many_arguments)]
pub async fn insert_process_audit<'e, E>(
    executor: E,
    domain: &str,
    process_id: Uuid,
    step_name: &str,
    command_id: Uuid,
    command_type: &str,
    command_data: &Value,
) -> CommandBusResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO commandbus.process_audit \
         (domain, process_id, step_name, command_id, command_type, command_data, sent_at) \
         VALUES ($1, $2, $3, $4, $5, $6, now())",
    )
    .bind(domain)
    .bind(process_id)
    .bind(step_name)
    .bind(command_id)
    .bind(command_type)
    .bind(command_data)
    .execute(executor)
    .await?;
    Ok(())
}

/// Record `step_name` as issued, persisting the state as of the moment it
/// was sent. `status` is `WAITING_FOR_REPLY` for a forward step, or left at
/// `COMPENSATING` for a compensation step — so the router can tell, when the
/// reply lands, whether it's watching forward progress or a rollback walk.
pub async fn set_process_step<'e, E>(
    executor: E,
    domain: &str,
    process_id: Uuid,
    step_name: &str,
    state: &Value,
    status: ProcessStatus,
) -> CommandBusResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE commandbus.process SET current_step = $3, status = $4, state = $5, updated_at = now() \
         WHERE domain = $1 AND process_id = $2",
    )
    .bind(domain)
    .bind(process_id)
    .bind(step_name)
    .bind(status)
    .bind(state)
    .execute(executor)
    .await?;
    Ok(())
}

/// Record a step's reply against its process-audit row, unless it was
/// already recorded (the redelivery-idempotence marker named in spec §4.7's
/// delivery contract). Returns the step name on first recording, `None` on
/// a redelivered duplicate.
pub async fn record_process_reply<'e, E>(
    executor: E,
    domain: &str,
    process_id: Uuid,
    command_id: Uuid,
    outcome: &str,
    data: Option<&Value>,
) -> CommandBusResult<Option<String>>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: Option<(String,)> = sqlx::query_as(
        "UPDATE commandbus.process_audit SET reply_outcome = $4, reply_data = $5, received_at = now() \
         WHERE domain = $1 AND process_id = $2 AND command_id = $3 AND received_at IS NULL \
         RETURNING step_name",
    )
    .bind(domain)
    .bind(process_id)
    .bind(command_id)
    .bind(outcome)
    .bind(data)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|(step_name,)| step_name))
}

/// Terminal process transition (`COMPLETED` or `COMPENSATED`), stamping
/// `completed_at` and the final state.
pub async fn finish_process<'e, E>(
    executor: E,
    domain: &str,
    process_id: Uuid,
    status: ProcessStatus,
    state: &Value,
) -> CommandBusResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE commandbus.process SET status = $3, state = $4, completed_at = now(), updated_at = now() \
         WHERE domain = $1 AND process_id = $2",
    )
    .bind(domain)
    .bind(process_id)
    .bind(status)
    .bind(state)
    .execute(executor)
    .await?;
    Ok(())
}

/// Pause a process on a failing step (reply outcome `FAILED`): `WAITING_FOR_TSQ`
/// plus the error fields, pending operator action on the failing command.
pub async fn pause_process_for_tsq<'e, E>(
    executor: E,
    domain: &str,
    process_id: Uuid,
    error_kind: &str,
    error_code: &str,
    error_message: &str,
) -> CommandBusResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE commandbus.process \
         SET status = $3, last_error_kind = $4, last_error_code = $5, last_error_message = $6, updated_at = now() \
         WHERE domain = $1 AND process_id = $2",
    )
    .bind(domain)
    .bind(process_id)
    .bind(ProcessStatus::WaitingForTsq)
    .bind(error_kind)
    .bind(error_code)
    .bind(error_message)
    .execute(executor)
    .await?;
    Ok(())
}

/// Enter `COMPENSATING` following an operator-cancel reply on the current step.
pub async fn enter_compensating<'e, E>(
    executor: E,
    domain: &str,
    process_id: Uuid,
) -> CommandBusResult<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE commandbus.process SET status = $3, updated_at = now() WHERE domain = $1 AND process_id = $2")
        .bind(domain)
        .bind(process_id)
        .bind(ProcessStatus::Compensating)
        .execute(executor)
        .await?;
    Ok(())
}
