mod common;

use commandbus_core::{AuditEventType, CommandBusConfig, CommandStatus};
use commandbus_core::repository;
use common::{setup_bus, unique_domain};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

async fn move_to_tsq(pool: &PgPool, domain: &str, command_id: Uuid, msg_id: i64) {
    repository::receive_command(pool, domain, command_id, CommandStatus::InProgress, msg_id)
        .await
        .unwrap()
        .unwrap();
    repository::finish_command(
        pool,
        domain,
        command_id,
        CommandStatus::InTroubleshootingQueue,
        AuditEventType::MovedToTroubleshooting,
        Some(("PERMANENT", "DECLINED", "Account closed")),
        None,
    )
    .await
    .unwrap();
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn operator_retry_requeues_with_attempts_reset(pool: PgPool) {
    let domain = unique_domain("payments");
    let bus = setup_bus(pool.clone(), &domain, CommandBusConfig::default()).await;
    let command_id = Uuid::new_v4();

    let sent = bus
        .send(commandbus_core::SendRequest {
            domain: domain.clone(),
            command_type: "Debit".to_string(),
            command_id,
            data: json!({"account": "A"}),
            max_attempts: None,
            correlation_id: None,
            reply_to: None,
            batch_id: None,
        })
        .await
        .unwrap();

    move_to_tsq(&pool, &domain, command_id, sent.msg_id).await;
    bus.queue().archive(&commandbus_pgmq::commands_queue(&domain), sent.msg_id).await.unwrap();

    let retried = bus.operator_retry(&domain, command_id).await.expect("operator_retry");
    assert_ne!(retried.msg_id, sent.msg_id);

    let command = bus.get_command(&domain, command_id).await.unwrap().unwrap();
    assert_eq!(command.status, CommandStatus::Pending);
    assert_eq!(command.attempts, 0);

    let messages = bus
        .queue()
        .read(&commandbus_pgmq::commands_queue(&domain), 30, 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body["data"]["account"], "A");
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn operator_cancel_publishes_canceled_reply(pool: PgPool) {
    let domain = unique_domain("payments");
    let bus = setup_bus(pool.clone(), &domain, CommandBusConfig::default()).await;
    let command_id = Uuid::new_v4();
    let reply_queue = commandbus_pgmq::replies_queue(&domain);

    let sent = bus
        .send(commandbus_core::SendRequest {
            domain: domain.clone(),
            command_type: "Debit".to_string(),
            command_id,
            data: json!({}),
            max_attempts: None,
            correlation_id: None,
            reply_to: Some(reply_queue.clone()),
            batch_id: None,
        })
        .await
        .unwrap();

    move_to_tsq(&pool, &domain, command_id, sent.msg_id).await;

    bus.operator_cancel(&domain, command_id, "customer requested cancellation")
        .await
        .expect("operator_cancel");

    let command = bus.get_command(&domain, command_id).await.unwrap().unwrap();
    assert_eq!(command.status, CommandStatus::Canceled);

    let replies = bus.queue().read(&reply_queue, 30, 10).await.unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].body["outcome"], "CANCELED");
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn operator_complete_publishes_success_reply(pool: PgPool) {
    let domain = unique_domain("payments");
    let bus = setup_bus(pool.clone(), &domain, CommandBusConfig::default()).await;
    let command_id = Uuid::new_v4();
    let reply_queue = commandbus_pgmq::replies_queue(&domain);

    let sent = bus
        .send(commandbus_core::SendRequest {
            domain: domain.clone(),
            command_type: "Debit".to_string(),
            command_id,
            data: json!({}),
            max_attempts: None,
            correlation_id: None,
            reply_to: Some(reply_queue.clone()),
            batch_id: None,
        })
        .await
        .unwrap();

    move_to_tsq(&pool, &domain, command_id, sent.msg_id).await;

    bus.operator_complete(&domain, command_id, json!({"manually_resolved": true}), Some("waived fee"))
        .await
        .expect("operator_complete");

    let command = bus.get_command(&domain, command_id).await.unwrap().unwrap();
    assert_eq!(command.status, CommandStatus::Completed);

    let replies = bus.queue().read(&reply_queue, 30, 10).await.unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].body["outcome"], "SUCCESS");
    assert_eq!(replies[0].body["data"]["manually_resolved"], true);
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn operator_retry_on_non_tsq_command_is_rejected(pool: PgPool) {
    let domain = unique_domain("payments");
    let bus = setup_bus(pool.clone(), &domain, CommandBusConfig::default()).await;
    let command_id = Uuid::new_v4();

    bus.send(commandbus_core::SendRequest {
        domain: domain.clone(),
        command_type: "Debit".to_string(),
        command_id,
        data: json!({}),
        max_attempts: None,
        correlation_id: None,
        reply_to: None,
        batch_id: None,
    })
    .await
    .unwrap();

    let result = bus.operator_retry(&domain, command_id).await;
    assert!(matches!(
        result,
        Err(commandbus_core::CommandBusError::NotInTroubleshootingQueue { .. })
    ));
}
