//! Queue client — thin wrapper over the PGMQ extension's SQL surface.
//!
//! Every operation either accepts an `&mut PgConnection` (so it can
//! participate in a caller's transaction, as the producer API requires) or
//! borrows the client's own pool. PGMQ itself is a set of SQL functions in
//! the `pgmq` schema (`pgmq.create`, `pgmq.send`, `pgmq.read`, `pgmq.delete`,
//! `pgmq.archive`, `pgmq.set_vt`); we call those directly via `sqlx::query`
//! rather than through an ORM layer, matching how the spec describes this
//! component ("thin wrapper over the queue extension's SQL surface").

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::{Executor, Postgres};
use tracing::{debug, trace};

use crate::error::{QueueError, QueueResult};
use crate::naming::validate_queue_name;

/// A message leased from a queue via `read`.
#[derive(Debug, Clone)]
pub struct ReadMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    pub vt: DateTime<Utc>,
    pub body: Value,
}

/// Coarse queue metrics used by batch/TSQ observability and health checks.
#[derive(Debug, Clone, Copy)]
pub struct QueueMetrics {
    pub queue_length: i64,
    pub oldest_msg_age_seconds: Option<i32>,
}

/// Queue client bound to a connection pool.
///
/// Cloning is cheap (the pool is an `Arc` internally); every worker, the
/// producer API, and the TSQ operations share one `QueueClient` per process.
#[derive(Debug, Clone)]
pub struct QueueClient {
    pool: PgPool,
}

impl QueueClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a queue (and its archive table) if it doesn't already exist.
    /// Idempotent — PGMQ's `pgmq.create` is itself idempotent.
    pub async fn create(&self, queue_name: &str) -> QueueResult<()> {
        validate_queue_name(queue_name)?;
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|source| QueueError::Operation {
                queue: queue_name.to_string(),
                operation: "create",
                source,
            })?;
        debug!(queue = queue_name, "queue ensured");
        Ok(())
    }

    /// Drop a queue and its archive table. Administrative; not used on the
    /// dispatch hot path.
    pub async fn drop_queue(&self, queue_name: &str) -> QueueResult<()> {
        sqlx::query("SELECT pgmq.drop_queue($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|source| QueueError::Operation {
                queue: queue_name.to_string(),
                operation: "drop_queue",
                source,
            })?;
        Ok(())
    }

    /// Enqueue `body` on `queue_name`, returning the assigned message id.
    /// Runs against `executor` so producers can send inside their own
    /// transaction alongside the business write and the metadata insert.
    pub async fn send<'e, E>(
        &self,
        executor: E,
        queue_name: &str,
        body: &Value,
    ) -> QueueResult<i64>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (msg_id,): (i64,) = sqlx::query_as("SELECT * FROM pgmq.send($1, $2)")
            .bind(queue_name)
            .bind(body)
            .fetch_one(executor)
            .await
            .map_err(|source| QueueError::Operation {
                queue: queue_name.to_string(),
                operation: "send",
                source,
            })?;
        trace!(queue = queue_name, msg_id, "message sent");
        Ok(msg_id)
    }

    /// Lease up to `batch_size` messages, making them invisible for
    /// `visibility_timeout_seconds`.
    pub async fn read(
        &self,
        queue_name: &str,
        visibility_timeout_seconds: i32,
        batch_size: i32,
    ) -> QueueResult<Vec<ReadMessage>> {
        let rows: Vec<(i64, i32, DateTime<Utc>, DateTime<Utc>, Value)> = sqlx::query_as(
            "SELECT msg_id, read_ct, enqueued_at, vt, message \
             FROM pgmq.read($1, $2, $3)",
        )
        .bind(queue_name)
        .bind(visibility_timeout_seconds)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(|source| QueueError::Operation {
            queue: queue_name.to_string(),
            operation: "read",
            source,
        })?;

        Ok(rows
            .into_iter()
            .map(|(msg_id, read_ct, enqueued_at, vt, body)| ReadMessage {
                msg_id,
                read_ct,
                enqueued_at,
                vt,
                body,
            })
            .collect())
    }

    /// Ack success: permanently remove the message.
    pub async fn delete(&self, queue_name: &str, msg_id: i64) -> QueueResult<()> {
        let (deleted,): (bool,) = sqlx::query_as("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|source| QueueError::Operation {
                queue: queue_name.to_string(),
                operation: "delete",
                source,
            })?;
        if !deleted {
            return Err(QueueError::MissingReceipt {
                queue: queue_name.to_string(),
                msg_id,
            });
        }
        Ok(())
    }

    /// Ack terminal failure: move the message to PGMQ's archive table.
    pub async fn archive(&self, queue_name: &str, msg_id: i64) -> QueueResult<()> {
        let (archived,): (bool,) = sqlx::query_as("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|source| QueueError::Operation {
                queue: queue_name.to_string(),
                operation: "archive",
                source,
            })?;
        if !archived {
            return Err(QueueError::MissingReceipt {
                queue: queue_name.to_string(),
                msg_id,
            });
        }
        Ok(())
    }

    /// Extend or shorten a message's lease without re-enqueueing it. Used
    /// both for retry backoff and for the TSQ "run now" nack path (delay 0).
    pub async fn set_visibility(
        &self,
        queue_name: &str,
        msg_id: i64,
        delay_seconds: i32,
    ) -> QueueResult<()> {
        sqlx::query("SELECT * FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(msg_id)
            .bind(delay_seconds)
            .execute(&self.pool)
            .await
            .map_err(|source| QueueError::Operation {
                queue: queue_name.to_string(),
                operation: "set_vt",
                source,
            })?;
        Ok(())
    }

    /// Fetch the archived payload for a message, used to reconstruct the
    /// body on operator retry when the metadata row has no separate
    /// payload-archive entry.
    pub async fn read_archived(&self, queue_name: &str, msg_id: i64) -> QueueResult<Option<Value>> {
        let archive_table = format!("pgmq.a_{queue_name}");
        let row: Option<(Value,)> = sqlx::query_as(&format!(
            "SELECT message FROM {archive_table} WHERE msg_id = $1"
        ))
        .bind(msg_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| QueueError::Operation {
            queue: queue_name.to_string(),
            operation: "read_archived",
            source,
        })?;
        Ok(row.map(|(body,)| body))
    }

    /// Coarse metrics: queue depth and age of the oldest visible message.
    pub async fn metrics(&self, queue_name: &str) -> QueueResult<QueueMetrics> {
        let queue_table = format!("pgmq.q_{queue_name}");
        let (queue_length,): (i64,) =
            sqlx::query_as(&format!("SELECT count(*) FROM {queue_table}"))
                .fetch_one(&self.pool)
                .await
                .map_err(|source| QueueError::Operation {
                    queue: queue_name.to_string(),
                    operation: "metrics",
                    source,
                })?;

        let oldest: Option<(DateTime<Utc>,)> = sqlx::query_as(&format!(
            "SELECT enqueued_at FROM {queue_table} ORDER BY enqueued_at ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|source| QueueError::Operation {
            queue: queue_name.to_string(),
            operation: "metrics",
            source,
        })?;

        let oldest_msg_age_seconds = oldest.map(|(enqueued_at,)| {
            (Utc::now() - enqueued_at).num_seconds().max(0) as i32
        });

        Ok(QueueMetrics {
            queue_length,
            oldest_msg_age_seconds,
        })
    }

    /// Lightweight liveness check against the pool.
    pub async fn health_check(&self) -> QueueResult<bool> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(|source| QueueError::Operation {
                queue: String::new(),
                operation: "health_check",
                source,
            })
    }

    /// Issue a one-byte-payload NOTIFY on `<queue_name>_notify` using
    /// `executor`, so it is only observed by listeners after the caller's
    /// transaction commits.
    pub async fn notify<'e, E>(&self, executor: E, queue_name: &str) -> QueueResult<()>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let channel = crate::naming::notify_channel(queue_name);
        sqlx::query("SELECT pg_notify($1, '1')")
            .bind(&channel)
            .execute(executor)
            .await
            .map_err(|source| QueueError::Operation {
                queue: queue_name.to_string(),
                operation: "notify",
                source,
            })?;
        Ok(())
    }
}
