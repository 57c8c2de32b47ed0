//! PostgreSQL LISTEN/NOTIFY wake-up for queue consumers.
//!
//! PGMQ does not itself push notifications, so producers call
//! [`QueueClient::notify`](crate::client::QueueClient::notify) after a
//! `send` commits, and workers hold a [`NotifyListener`] alongside their
//! polling loop. NOTIFY delivery is best-effort (a dropped connection loses
//! pending notifications), so the listener is always a latency optimization
//! over polling, never a substitute for it.

use std::time::Duration;

use sqlx::postgres::{PgListener, PgPool};
use tokio::sync::Notify as TokioNotify;
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};
use crate::naming::notify_channel;

/// Wraps a single `PgListener` subscribed to one queue's notify channel.
///
/// Not `Clone`: a listener owns a dedicated connection. Workers that need to
/// share a wake signal across tasks should pair one `NotifyListener` with a
/// `tokio::sync::Notify` fanned out to consumers, as [`spawn_wake_task`]
/// does.
#[derive(Debug)]
pub struct NotifyListener {
    listener: PgListener,
    channel: String,
}

impl NotifyListener {
    /// Connect a new listener subscribed to `queue_name`'s notify channel.
    pub async fn connect(pool: &PgPool, queue_name: &str) -> QueueResult<Self> {
        let channel = notify_channel(queue_name);
        let mut listener = PgListener::connect_with(pool)
            .await
            .map_err(QueueError::Listener)?;
        listener
            .listen(&channel)
            .await
            .map_err(QueueError::Listener)?;
        debug!(channel = channel.as_str(), "subscribed to notify channel");
        Ok(Self { listener, channel })
    }

    /// Block until a notification arrives, or `timeout` elapses. Returns
    /// `Ok(true)` on a notification, `Ok(false)` on timeout (the caller
    /// should fall back to polling either way).
    pub async fn recv_timeout(&mut self, timeout: Duration) -> QueueResult<bool> {
        match tokio::time::timeout(timeout, self.listener.recv()).await {
            Ok(Ok(_notification)) => Ok(true),
            Ok(Err(source)) => Err(QueueError::Listener(source)),
            Err(_elapsed) => Ok(false),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// Spawn a background task that bridges a [`NotifyListener`] into a
/// `tokio::sync::Notify`, so a worker's dispatch loop can `notified().await`
/// without owning the PostgreSQL connection directly.
///
/// Reconnects with a short backoff if the listener's connection drops,
/// rather than silently falling permanently back to pure polling.
pub fn spawn_wake_task(
    pool: PgPool,
    queue_name: String,
    wake: std::sync::Arc<TokioNotify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut listener = match NotifyListener::connect(&pool, &queue_name).await {
                Ok(listener) => listener,
                Err(error) => {
                    warn!(queue = queue_name.as_str(), %error, "notify listener connect failed, retrying");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            loop {
                match listener.recv_timeout(Duration::from_secs(30)).await {
                    Ok(true) => wake.notify_one(),
                    Ok(false) => continue,
                    Err(error) => {
                        warn!(queue = queue_name.as_str(), %error, "notify listener lost connection");
                        break;
                    }
                }
            }

            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    })
}
