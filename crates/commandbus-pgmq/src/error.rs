use thiserror::Error;

/// Errors surfaced by the queue client.
///
/// Wraps the underlying `sqlx::Error` with enough context (queue name,
/// operation) to make worker-side retry decisions without re-parsing the
/// database driver error.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue '{queue}': {operation} failed: {source}")]
    Operation {
        queue: String,
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("invalid queue name '{0}': queue names use '__' as the only separator and contain no dots")]
    InvalidQueueName(String),

    #[error("message {msg_id} on queue '{queue}' has no receipt (already deleted or archived)")]
    MissingReceipt { queue: String, msg_id: i64 },

    #[error("listener error: {0}")]
    Listener(#[source] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;
