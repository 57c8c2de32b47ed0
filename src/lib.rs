//! Durable command bus over PostgreSQL and PGMQ: a thin facade crate that
//! re-exports the producer/worker/process-manager crates as one dependency.
//!
//! - [`commandbus_core`] — command lifecycle, producer API (`Bus`), batch
//!   engine, troubleshooting queue.
//! - [`commandbus_worker`] — the dispatch loop that leases and executes
//!   commands.
//! - [`commandbus_process`] — typed multi-step process/saga manager built
//!   on top of the same bus.
//! - [`commandbus_pgmq`] — the PGMQ SQL wrapper both of the above sit on.

pub use commandbus_core as core;
pub use commandbus_pgmq as pgmq;
pub use commandbus_process as process;
pub use commandbus_worker as worker;

pub use commandbus_core::{
    Bus, BatchCompletionCallback, CommandBusConfig, CommandBusError, CommandBusResult, SendRequest, SendResult,
};
pub use commandbus_process::{ProcessDefinition, ProcessHandler, ProcessManager, ProcessRegistry, ProcessRouter, TypedProcess};
pub use commandbus_worker::{DispatchContext, Handler, HandlerRegistry, WorkerRuntime};
