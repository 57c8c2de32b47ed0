//! Troubleshooting queue operator actions: list, retry, cancel, complete.

use anyhow::{Context, Result};
use commandbus_core::{Bus, TsqFilter};
use uuid::Uuid;

use crate::{output, TsqCommand};

pub async fn run(bus: &Bus, command: TsqCommand, json: bool) -> Result<()> {
    match command {
        TsqCommand::List { domain, command_type, limit } => list(bus, &domain, command_type, limit, json).await,
        TsqCommand::Retry { domain, command_id } => retry(bus, &domain, command_id).await,
        TsqCommand::Cancel { domain, command_id, reason } => cancel(bus, &domain, command_id, &reason).await,
        TsqCommand::Complete { domain, command_id, result, notes } => {
            complete(bus, &domain, command_id, &result, notes).await
        }
    }
}

async fn list(bus: &Bus, domain: &str, command_type: Option<String>, limit: i64, json: bool) -> Result<()> {
    let filter = TsqFilter {
        command_type,
        limit,
        ..Default::default()
    };
    let commands = bus.list_tsq(domain, &filter).await.context("listing troubleshooting queue")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&commands)?);
    } else if commands.is_empty() {
        println!("no commands in the troubleshooting queue for domain {domain}");
    } else {
        println!("{}", output::commands_table(&commands));
    }
    Ok(())
}

async fn retry(bus: &Bus, domain: &str, command_id: Uuid) -> Result<()> {
    let result = bus.operator_retry(domain, command_id).await.context("retrying command")?;
    println!("re-enqueued command_id={} msg_id={}", result.command_id, result.msg_id);
    Ok(())
}

async fn cancel(bus: &Bus, domain: &str, command_id: Uuid, reason: &str) -> Result<()> {
    bus.operator_cancel(domain, command_id, reason).await.context("canceling command")?;
    println!("canceled command_id={command_id}");
    Ok(())
}

async fn complete(bus: &Bus, domain: &str, command_id: Uuid, result: &str, notes: Option<String>) -> Result<()> {
    let result_data = serde_json::from_str(result).context("--result must be valid JSON")?;
    bus.operator_complete(domain, command_id, result_data, notes.as_deref())
        .await
        .context("completing command")?;
    println!("completed command_id={command_id}");
    Ok(())
}
