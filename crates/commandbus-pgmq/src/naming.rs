//! Queue and notification-channel naming conventions.
//!
//! Queue names use a double underscore as the only separator and never
//! contain a dot, so that a single regex-free `contains`/`split` suffices
//! wherever the name must be parsed back into its parts.

use crate::error::{QueueError, QueueResult};

/// Build the command queue name for a domain: `<domain>__commands`.
pub fn commands_queue(domain: &str) -> String {
    format!("{domain}__commands")
}

/// Build the shared reply queue name for a domain: `<domain>__replies`.
pub fn replies_queue(domain: &str) -> String {
    format!("{domain}__replies")
}

/// Build the process-reply router queue name for a domain: `<domain>__process_replies`.
pub fn process_replies_queue(domain: &str) -> String {
    format!("{domain}__process_replies")
}

/// PostgreSQL NOTIFY channel name for a given queue: `<queue>_notify`.
pub fn notify_channel(queue_name: &str) -> String {
    format!("{queue_name}_notify")
}

/// Validate that a queue name follows the `__`-separated, dot-free convention
/// and is within PostgreSQL's 63-byte identifier limit (PGMQ derives table
/// names from the queue name).
pub fn validate_queue_name(queue_name: &str) -> QueueResult<()> {
    if queue_name.is_empty() || queue_name.contains('.') || queue_name.len() > 48 {
        return Err(QueueError::InvalidQueueName(queue_name.to_string()));
    }
    if !queue_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(QueueError::InvalidQueueName(queue_name.to_string()));
    }
    Ok(())
}
