//! Typed multi-step process manager over the command bus (spec §4.7): a
//! process type is a named state machine whose steps are commands sent
//! through the same bus, driven to completion or saga compensation by a
//! single reply router.

pub mod error;
pub mod manager;
pub mod registry;
pub mod router;
mod steps;
pub mod types;

pub use error::{ProcessError, ProcessResult};
pub use manager::ProcessManager;
pub use registry::ProcessRegistry;
pub use router::ProcessRouter;
pub use types::{ProcessDefinition, ProcessHandler, TypedProcess};
