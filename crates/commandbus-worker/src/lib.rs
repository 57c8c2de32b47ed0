//! Worker runtime: leases messages from `<domain>__commands`, dispatches
//! them to registered handlers, and enforces the retry/troubleshooting-queue
//! policy (spec §4.4).

pub mod error;
pub mod registry;
pub mod runtime;
pub mod stats;

pub use error::{WorkerError, WorkerResult};
pub use registry::{DispatchContext, Handler, HandlerRegistry};
pub use runtime::WorkerRuntime;
pub use stats::{WorkerStats, WorkerStatsSnapshot};
