//! End-to-end scenarios run against the public facade crate. Each test is
//! one of the nine concrete scenarios the design was seeded from: producer
//! send, worker retry/backoff policy, the troubleshooting queue, batches,
//! and the process manager, all driven through real PostgreSQL + PGMQ.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use commandbus::core::{repository, Bus, BatchStats, CommandBusConfig, CommandBusError, CommandMessage, CommandStatus, HandlerResult, ProcessStatus, SendRequest};
use commandbus::{Handler, HandlerRegistry, ProcessDefinition, ProcessManager, ProcessRegistry, ProcessRouter, TypedProcess, WorkerRuntime};
use commandbus_core::HandlerError;
use common::{setup_bus, unique_domain};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

async fn audit_event_types(pool: &PgPool, domain: &str, command_id: Uuid) -> Vec<String> {
    sqlx::query_scalar::<_, String>(
        "SELECT event_type FROM commandbus.audit WHERE domain = $1 AND command_id = $2 ORDER BY id",
    )
    .bind(domain)
    .bind(command_id)
    .fetch_all(pool)
    .await
    .expect("audit query")
}

async fn wait_for_terminal(bus: &Bus, domain: &str, command_id: Uuid) -> commandbus_core::Command {
    for _ in 0..200 {
        if let Some(command) = bus.get_command(domain, command_id).await.expect("get_command") {
            if command.status.is_terminal() || command.status == CommandStatus::InTroubleshootingQueue {
                return command;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("command {command_id} never reached a terminal status");
}

struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, command: &CommandMessage, _ctx: &commandbus::DispatchContext) -> HandlerResult<Value> {
        Ok(json!({"status": "ok", "balance": command.data["amount"].as_i64().unwrap_or(0) - 100 + 1000}))
    }
}

struct FlakyHandler {
    failures_remaining: AtomicUsize,
}

#[async_trait]
impl Handler for FlakyHandler {
    async fn handle(&self, _command: &CommandMessage, _ctx: &commandbus::DispatchContext) -> HandlerResult<Value> {
        if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
            return Err(HandlerError::transient("TMP", "not yet"));
        }
        Ok(json!({"status": "ok"}))
    }
}

struct AlwaysTransient;

#[async_trait]
impl Handler for AlwaysTransient {
    async fn handle(&self, _command: &CommandMessage, _ctx: &commandbus::DispatchContext) -> HandlerResult<Value> {
        Err(HandlerError::transient("TMP", "still down"))
    }
}

struct PermanentHandler;

#[async_trait]
impl Handler for PermanentHandler {
    async fn handle(&self, _command: &CommandMessage, _ctx: &commandbus::DispatchContext) -> HandlerResult<Value> {
        Err(HandlerError::permanent("DECLINED", "Account closed"))
    }
}

struct FailOnceThenSucceed {
    calls: AtomicUsize,
}

#[async_trait]
impl Handler for FailOnceThenSucceed {
    async fn handle(&self, _command: &CommandMessage, _ctx: &commandbus::DispatchContext) -> HandlerResult<Value> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(HandlerError::permanent("DECLINED", "Account closed"));
        }
        Ok(json!({"status": "ok"}))
    }
}

struct AlwaysSucceeds;

#[async_trait]
impl Handler for AlwaysSucceeds {
    async fn handle(&self, _command: &CommandMessage, _ctx: &commandbus::DispatchContext) -> HandlerResult<Value> {
        Ok(json!({"ok": true}))
    }
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn scenario_1_happy_path(pool: PgPool) {
    let domain = unique_domain("payments");
    let bus = setup_bus(pool.clone(), &domain, CommandBusConfig::default()).await;

    let mut registry = HandlerRegistry::new();
    registry.register(&domain, "Debit", Arc::new(EchoHandler));
    let runtime = WorkerRuntime::new(&domain, bus.clone(), Arc::new(registry));
    let handle = tokio::spawn(runtime.clone().run());

    let command_id = Uuid::new_v4();
    let reply_queue = commandbus_pgmq::replies_queue(&domain);
    bus.send(SendRequest {
        domain: domain.clone(),
        command_type: "Debit".to_string(),
        command_id,
        data: json!({"account": "A", "amount": 100}),
        max_attempts: None,
        correlation_id: None,
        reply_to: Some(reply_queue.clone()),
        batch_id: None,
    })
    .await
    .expect("send");

    let command = wait_for_terminal(&bus, &domain, command_id).await;
    assert_eq!(command.status, CommandStatus::Completed);

    let audit = audit_event_types(&pool, &domain, command_id).await;
    assert_eq!(audit, vec!["SENT", "RECEIVED", "COMPLETED"]);

    let replies = bus.queue().read(&reply_queue, 30, 10).await.expect("read replies");
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].body["outcome"], "SUCCESS");
    assert_eq!(replies[0].body["data"]["balance"], 900);

    runtime.stop();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn scenario_2_transient_with_eventual_success(pool: PgPool) {
    let domain = unique_domain("payments");
    let config = CommandBusConfig {
        default_max_attempts: 3,
        backoff_schedule: vec![1, 2],
        ..Default::default()
    };
    let bus = setup_bus(pool.clone(), &domain, config).await;

    let mut registry = HandlerRegistry::new();
    registry.register(&domain, "Debit", Arc::new(FlakyHandler { failures_remaining: AtomicUsize::new(2) }));
    let runtime = WorkerRuntime::new(&domain, bus.clone(), Arc::new(registry));
    let handle = tokio::spawn(runtime.clone().run());

    let command_id = Uuid::new_v4();
    let started = Instant::now();
    bus.send(SendRequest {
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
    .expect("send");

    let command = wait_for_terminal(&bus, &domain, command_id).await;
    assert_eq!(command.status, CommandStatus::Completed);
    assert_eq!(command.attempts, 3);
    assert!(started.elapsed() >= Duration::from_secs(3), "two backoff waits of 1s+2s must elapse before completion");

    runtime.stop();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn scenario_3_retry_exhaustion(pool: PgPool) {
    let domain = unique_domain("payments");
    let config = CommandBusConfig {
        default_max_attempts: 3,
        backoff_schedule: vec![1],
        ..Default::default()
    };
    let bus = setup_bus(pool.clone(), &domain, config).await;

    let mut registry = HandlerRegistry::new();
    registry.register(&domain, "Debit", Arc::new(AlwaysTransient));
    let runtime = WorkerRuntime::new(&domain, bus.clone(), Arc::new(registry));
    let handle = tokio::spawn(runtime.clone().run());

    let command_id = Uuid::new_v4();
    let reply_queue = commandbus_pgmq::replies_queue(&domain);
    bus.send(SendRequest {
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
    .expect("send");

    let command = wait_for_terminal(&bus, &domain, command_id).await;
    assert_eq!(command.status, CommandStatus::InTroubleshootingQueue);

    let audit = audit_event_types(&pool, &domain, command_id).await;
    assert_eq!(audit.last().map(String::as_str), Some("MOVED_TO_TROUBLESHOOTING"));

    let replies = bus.queue().read(&reply_queue, 1, 10).await.expect("read replies");
    assert!(replies.is_empty(), "a TSQ-bound failure must not auto-reply");

    runtime.stop();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn scenario_4_permanent_failure(pool: PgPool) {
    let domain = unique_domain("payments");
    let bus = setup_bus(pool.clone(), &domain, CommandBusConfig::default()).await;

    let mut registry = HandlerRegistry::new();
    registry.register(&domain, "Debit", Arc::new(PermanentHandler));
    let runtime = WorkerRuntime::new(&domain, bus.clone(), Arc::new(registry));
    let handle = tokio::spawn(runtime.clone().run());

    let command_id = Uuid::new_v4();
    bus.send(SendRequest {
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
    .expect("send");

    let command = wait_for_terminal(&bus, &domain, command_id).await;
    assert_eq!(command.status, CommandStatus::InTroubleshootingQueue);
    assert_eq!(command.attempts, 1);
    assert_eq!(command.last_error_code.as_deref(), Some("DECLINED"));

    runtime.stop();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn scenario_5_operator_retry_then_success(pool: PgPool) {
    let domain = unique_domain("payments");
    let bus = setup_bus(pool.clone(), &domain, CommandBusConfig::default()).await;

    let mut registry = HandlerRegistry::new();
    registry.register(&domain, "Debit", Arc::new(FailOnceThenSucceed { calls: AtomicUsize::new(0) }));
    let runtime = WorkerRuntime::new(&domain, bus.clone(), Arc::new(registry));
    let handle = tokio::spawn(runtime.clone().run());

    let command_id = Uuid::new_v4();
    bus.send(SendRequest {
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
    .expect("send");

    let command = wait_for_terminal(&bus, &domain, command_id).await;
    assert_eq!(command.status, CommandStatus::InTroubleshootingQueue);

    let retried = bus.operator_retry(&domain, command_id).await.expect("operator_retry");
    assert!(retried.msg_id > 0);

    let command = wait_for_terminal(&bus, &domain, command_id).await;
    assert_eq!(command.status, CommandStatus::Completed);
    assert_eq!(command.attempts, 1);

    let audit = audit_event_types(&pool, &domain, command_id).await;
    assert!(audit.contains(&"OPERATOR_RETRY".to_string()));

    runtime.stop();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn scenario_6_duplicate_send(pool: PgPool) {
    let domain = unique_domain("payments");
    let bus = setup_bus(pool.clone(), &domain, CommandBusConfig::default()).await;

    let command_id = Uuid::new_v4();
    let request = SendRequest {
        domain: domain.clone(),
        command_type: "Debit".to_string(),
        command_id,
        data: json!({}),
        max_attempts: None,
        correlation_id: None,
        reply_to: None,
        batch_id: None,
    };

    let (first, second) = tokio::join!(bus.send(request.clone()), bus.send(request));

    let results = [first, second];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(CommandBusError::DuplicateCommand { .. })))
        .count();
    assert_eq!(successes, 1, "exactly one concurrent send must win");
    assert_eq!(duplicates, 1, "the loser must fail with DuplicateCommand");

    let queue_name = commandbus_pgmq::commands_queue(&domain);
    let messages = bus.queue().read(&queue_name, 30, 10).await.expect("read commands queue");
    assert_eq!(messages.len(), 1, "exactly one queue message must exist for the duplicated command_id");
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn scenario_7_batch_completion(pool: PgPool) {
    let domain = unique_domain("batches");
    let bus = setup_bus(pool.clone(), &domain, CommandBusConfig::default()).await;

    let mut registry = HandlerRegistry::new();
    registry.register(&domain, "Step", Arc::new(AlwaysSucceeds));
    let runtime = WorkerRuntime::new(&domain, bus.clone(), Arc::new(registry));
    let handle = tokio::spawn(runtime.clone().run());

    let requests: Vec<SendRequest> = (0..10)
        .map(|_| SendRequest {
            domain: domain.clone(),
            command_type: "Step".to_string(),
            command_id: Uuid::new_v4(),
            data: json!({}),
            max_attempts: None,
            correlation_id: None,
            reply_to: None,
            batch_id: None,
        })
        .collect();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = fired.clone();
    let (batch_id, total) = bus
        .create_batch(
            &domain,
            requests,
            Some("onboarding-batch".to_string()),
            Some(Arc::new(move |_batch_id, stats: BatchStats| {
                assert!(stats.is_complete);
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await
        .expect("create_batch");
    assert_eq!(total, 10);

    let mut stats = bus.refresh_batch_stats(&domain, batch_id).await.expect("refresh_batch_stats");
    for _ in 0..200 {
        if stats.is_complete {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        stats = bus.refresh_batch_stats(&domain, batch_id).await.expect("refresh_batch_stats");
    }

    assert_eq!((stats.completed, stats.canceled, stats.failed, stats.in_troubleshooting, stats.is_complete), (10, 0, 0, 0, true));
    assert_eq!(fired.load(Ordering::SeqCst), 1, "completion callback must fire exactly once");

    let status: String = sqlx::query_scalar("SELECT status FROM commandbus.batch WHERE domain = $1 AND batch_id = $2")
        .bind(&domain)
        .bind(batch_id)
        .fetch_one(&pool)
        .await
        .expect("batch status");
    assert_eq!(status, "COMPLETED");

    runtime.stop();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShipmentState {
    order_id: String,
    reserved: bool,
    charged: bool,
    shipped: bool,
}

struct ShipmentProcess {
    domain: String,
}

impl ProcessDefinition for ShipmentProcess {
    type State = ShipmentState;
    type Step = String;

    fn process_type(&self) -> &str {
        "Shipment"
    }

    fn domain(&self) -> &str {
        &self.domain
    }

    fn create_initial_state(&self, initial_data: Value) -> Self::State {
        ShipmentState {
            order_id: initial_data["order_id"].as_str().unwrap_or_default().to_string(),
            reserved: false,
            charged: false,
            shipped: false,
        }
    }

    fn get_first_step(&self, _state: &Self::State) -> Self::Step {
        "ReserveStock".to_string()
    }

    fn build_command(&self, step: &Self::Step, state: &Self::State) -> (String, Value) {
        (step.clone(), json!({"order_id": state.order_id}))
    }

    fn update_state(&self, state: &mut Self::State, step: &Self::Step, _reply: &commandbus_core::ReplyMessage) {
        match step.as_str() {
            "ReserveStock" => state.reserved = true,
            "ChargeCard" => state.charged = true,
            "ShipOrder" => state.shipped = true,
            _ => {}
        }
    }

    fn get_next_step(
        &self,
        current_step: &Self::Step,
        _reply: &commandbus_core::ReplyMessage,
        _state: &Self::State,
    ) -> Option<Self::Step> {
        match current_step.as_str() {
            "ReserveStock" => Some("ChargeCard".to_string()),
            "ChargeCard" => Some("ShipOrder".to_string()),
            _ => None,
        }
    }

    fn get_compensation_step(&self, step: &Self::Step) -> Option<Self::Step> {
        match step.as_str() {
            "ReserveStock" => Some("ReleaseStock".to_string()),
            _ => None,
        }
    }
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn scenario_8_process_happy_path(pool: PgPool) {
    let domain = unique_domain("shipping");
    let bus = setup_bus(pool.clone(), &domain, CommandBusConfig::default()).await;

    let mut worker_registry = HandlerRegistry::new();
    worker_registry.register(&domain, "ReserveStock", Arc::new(AlwaysSucceeds));
    worker_registry.register(&domain, "ChargeCard", Arc::new(AlwaysSucceeds));
    worker_registry.register(&domain, "ShipOrder", Arc::new(AlwaysSucceeds));
    let worker = WorkerRuntime::new(&domain, bus.clone(), Arc::new(worker_registry));
    let worker_handle = tokio::spawn(worker.clone().run());

    let mut process_registry = ProcessRegistry::new();
    process_registry.register(Arc::new(TypedProcess(ShipmentProcess { domain: domain.clone() })));
    let process_registry = Arc::new(process_registry);

    let router = ProcessRouter::new(domain.clone(), pool.clone(), bus.clone(), process_registry.clone());
    let router_handle = tokio::spawn(router.clone().run());

    let manager = ProcessManager::new(pool.clone(), bus.clone(), process_registry);
    let process_id = manager.start("Shipment", json!({"order_id": "ORD-1"})).await.expect("start process");

    let mut process = repository::get_process(&pool, &domain, process_id).await.expect("get_process");
    for _ in 0..200 {
        if let Some(found) = &process {
            if found.status == ProcessStatus::Completed {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        process = repository::get_process(&pool, &domain, process_id).await.expect("get_process");
    }
    let process = process.expect("process exists");
    assert_eq!(process.status, ProcessStatus::Completed);
    assert_eq!(process.state["reserved"], true);
    assert_eq!(process.state["charged"], true);
    assert_eq!(process.state["shipped"], true);

    let audit = repository::list_process_audit(&pool, &domain, process_id).await.expect("list_process_audit");
    assert_eq!(audit.len(), 3);
    assert!(audit.iter().all(|entry| entry.reply_outcome.as_deref() == Some("SUCCESS")));
    let correlation_ids: Vec<Uuid> = audit.iter().map(|entry| entry.process_id).collect();
    assert!(correlation_ids.iter().all(|id| *id == process_id));

    worker.stop();
    router.stop();
    let _ = tokio::time::timeout(Duration::from_secs(5), worker_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), router_handle).await;
}

#[sqlx::test(migrator = "commandbus_core::MIGRATOR")]
async fn scenario_9_process_compensation(pool: PgPool) {
    let domain = unique_domain("shipping");
    let bus = setup_bus(pool.clone(), &domain, CommandBusConfig::default()).await;

    let mut worker_registry = HandlerRegistry::new();
    worker_registry.register(&domain, "ReserveStock", Arc::new(AlwaysSucceeds));
    worker_registry.register(&domain, "ChargeCard", Arc::new(PermanentHandler));
    worker_registry.register(&domain, "ReleaseStock", Arc::new(AlwaysSucceeds));
    let worker = WorkerRuntime::new(&domain, bus.clone(), Arc::new(worker_registry));
    let worker_handle = tokio::spawn(worker.clone().run());

    let mut process_registry = ProcessRegistry::new();
    process_registry.register(Arc::new(TypedProcess(ShipmentProcess { domain: domain.clone() })));
    let process_registry = Arc::new(process_registry);

    let router = ProcessRouter::new(domain.clone(), pool.clone(), bus.clone(), process_registry.clone());
    let router_handle = tokio::spawn(router.clone().run());

    let manager = ProcessManager::new(pool.clone(), bus.clone(), process_registry);
    let process_id = manager.start("Shipment", json!({"order_id": "ORD-2"})).await.expect("start process");

    let stuck_command_id = {
        let mut found = None;
        for _ in 0..200 {
            let filter = repository::TsqFilter {
                command_type: Some("ChargeCard".to_string()),
                ..Default::default()
            };
            let rows = bus.list_tsq(&domain, &filter).await.expect("list_tsq");
            if let Some(command) = rows.into_iter().next() {
                found = Some(command.command_id);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        found.expect("ChargeCard command never reached the troubleshooting queue")
    };

    bus.operator_cancel(&domain, stuck_command_id, "customer canceled order")
        .await
        .expect("operator_cancel");

    let mut process = repository::get_process(&pool, &domain, process_id).await.expect("get_process");
    for _ in 0..200 {
        if let Some(found) = &process {
            if found.status == ProcessStatus::Compensated {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        process = repository::get_process(&pool, &domain, process_id).await.expect("get_process");
    }
    let process = process.expect("process exists");
    assert_eq!(process.status, ProcessStatus::Compensated);

    let audit = repository::list_process_audit(&pool, &domain, process_id).await.expect("list_process_audit");
    assert!(audit.iter().any(|entry| entry.step_name == "ReleaseStock"));

    worker.stop();
    router.stop();
    let _ = tokio::time::timeout(Duration::from_secs(5), worker_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), router_handle).await;
}
