//! Process start (spec §4.7 "Start"): generate `process_id`, build the
//! initial state, persist `PENDING`, compute the first step, execute it.

use std::sync::Arc;

use commandbus_core::{repository, Bus, CommandBusError, ProcessStatus};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ProcessResult;
use crate::registry::ProcessRegistry;
use crate::steps::execute_step;

/// Entry point for starting process instances. Cheap to clone: `Bus` and
/// `PgPool` are themselves pool handles, and the registry is shared.
#[derive(Clone)]
pub struct ProcessManager {
    pool: PgPool,
    bus: Bus,
    registry: Arc<ProcessRegistry>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager").finish_non_exhaustive()
    }
}

impl ProcessManager {
    pub fn new(pool: PgPool, bus: Bus, registry: Arc<ProcessRegistry>) -> Self {
        Self { pool, bus, registry }
    }

    #[instrument(skip(self, initial_data), fields(process_type))]
    pub async fn start(&self, process_type: &str, initial_data: Value) -> ProcessResult<Uuid> {
        let handler = self
            .registry
            .get(process_type)
            .ok_or_else(|| CommandBusError::UnknownProcessType(process_type.to_string()))?;

        let process_id = Uuid::new_v4();
        let domain = handler.domain().to_string();
        let state = handler.create_initial_state(initial_data)?;

        repository::insert_process(&self.pool, &domain, process_id, process_type, &state).await?;

        let first_step = handler.first_step(&state)?;
        execute_step(
            &self.pool,
            &self.bus,
            handler.as_ref(),
            &domain,
            process_id,
            &state,
            &first_step,
            ProcessStatus::WaitingForReply,
        )
        .await?;

        info!(%process_id, process_type, "process started");
        Ok(process_id)
    }
}
