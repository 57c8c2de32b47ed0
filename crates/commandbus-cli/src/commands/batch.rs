//! Batch read operations: aggregate stats and member command listing.

use anyhow::{Context, Result};
use commandbus_core::Bus;
use serde_json::json;
use uuid::Uuid;

use crate::{output, BatchCommand};

pub async fn run(bus: &Bus, command: BatchCommand, json: bool) -> Result<()> {
    match command {
        BatchCommand::Status { domain, batch_id } => status(bus, &domain, batch_id, json).await,
        BatchCommand::ListCommands { domain, batch_id } => list_commands(bus, &domain, batch_id, json).await,
    }
}

async fn status(bus: &Bus, domain: &str, batch_id: Uuid, json: bool) -> Result<()> {
    let stats = bus.refresh_batch_stats(domain, batch_id).await.context("refreshing batch stats")?;
    if json {
        let stats = json!({
            "completed": stats.completed,
            "canceled": stats.canceled,
            "failed": stats.failed,
            "in_troubleshooting": stats.in_troubleshooting,
            "is_complete": stats.is_complete,
        });
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{}", output::batch_stats_table(&stats));
    }
    Ok(())
}

async fn list_commands(bus: &Bus, domain: &str, batch_id: Uuid, json: bool) -> Result<()> {
    let commands = bus.list_by_batch(domain, batch_id).await.context("listing batch commands")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&commands)?);
    } else if commands.is_empty() {
        println!("no commands found for batch {batch_id}");
    } else {
        println!("{}", output::commands_table(&commands));
    }
    Ok(())
}
