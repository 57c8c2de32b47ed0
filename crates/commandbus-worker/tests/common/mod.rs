use commandbus_core::{Bus, CommandBusConfig};
use commandbus_pgmq::QueueClient;
use sqlx::PgPool;

pub fn unique_domain(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

pub async fn setup_bus(pool: PgPool, domain: &str, config: CommandBusConfig) -> Bus {
    let queue = QueueClient::new(pool.clone());
    queue.create(&commandbus_pgmq::commands_queue(domain)).await.expect("create commands queue");
    queue.create(&commandbus_pgmq::replies_queue(domain)).await.expect("create replies queue");
    Bus::new(pool, queue, config)
}
