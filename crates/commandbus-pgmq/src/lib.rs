//! PGMQ queue client: SQL wrapper plus NOTIFY-based wake-up and naming
//! conventions shared across the command bus, worker, and process crates.

mod client;
mod error;
mod naming;
mod notify;

pub use client::{QueueClient, QueueMetrics, ReadMessage};
pub use error::{QueueError, QueueResult};
pub use naming::{commands_queue, notify_channel, process_replies_queue, replies_queue, validate_queue_name};
pub use notify::{spawn_wake_task, NotifyListener};
