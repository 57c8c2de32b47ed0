//! Batch completion callbacks. The counter arithmetic itself lives in the
//! `sp_refresh_batch_stats` stored procedure ([`crate::repository`]); this
//! module only owns the in-process, best-effort callback registry (spec
//! §4.5/§9 — lost on restart by design, operators must poll for the
//! authoritative answer).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::bus::BatchCompletionCallback;
use crate::models::BatchStats;

/// Fire and remove `batch_id`'s callback the first time `stats` reports
/// completion. Subsequent refreshes of an already-completed batch are a
/// no-op because the entry is gone.
pub fn maybe_fire_completion(
    callbacks: &Arc<DashMap<Uuid, BatchCompletionCallback>>,
    batch_id: Uuid,
    stats: BatchStats,
) {
    if !stats.is_complete {
        return;
    }

    if let Some((_, callback)) = callbacks.remove(&batch_id) {
        debug!(%batch_id, "invoking batch completion callback");
        callback(batch_id, stats);
    }
}
