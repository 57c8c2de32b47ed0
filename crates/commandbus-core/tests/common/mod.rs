use commandbus_pgmq::QueueClient;
use sqlx::PgPool;
use uuid::Uuid;

/// A unique domain per test, so parallel `#[sqlx::test]` runs (each against
/// its own ephemeral database) never collide on queue names even if two
/// tests somehow shared a database.
pub fn unique_domain(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Provision a fresh `Bus` + `QueueClient` for `domain`, creating its
/// command and reply queues.
pub async fn setup_bus(pool: PgPool, domain: &str, config: commandbus_core::CommandBusConfig) -> commandbus_core::Bus {
    let queue = QueueClient::new(pool.clone());
    queue
        .create(&commandbus_pgmq::commands_queue(domain))
        .await
        .expect("create commands queue");
    queue
        .create(&commandbus_pgmq::replies_queue(domain))
        .await
        .expect("create replies queue");
    commandbus_core::Bus::new(pool, queue, config)
}
