//! Handler registration (spec §4.4 step 3: "resolve handler by
//! `(domain, command_type)` via the handler registry").

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use commandbus_core::{CommandMessage, HandlerResult};

/// Context passed alongside a command: the delivery attempt counters the
/// handler may inspect, and the queue message id (for handlers that log
/// against it).
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext {
    pub attempt: i32,
    pub max_attempts: i32,
    pub msg_id: i64,
}

/// A single command handler. Implementations should be cheap to construct
/// and hold their own clones of whatever state (database pools, HTTP
/// clients) they need to do the actual work.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        command: &CommandMessage,
        ctx: &DispatchContext,
    ) -> HandlerResult<serde_json::Value>;
}

/// Maps `(domain, command_type)` to the handler that services it. Built
/// once at startup and shared read-only across dispatch tasks.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), Arc<dyn Handler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registered", &self.handlers.len())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        domain: impl Into<String>,
        command_type: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        self.handlers.insert((domain.into(), command_type.into()), handler);
        self
    }

    pub fn get(&self, domain: &str, command_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .get(&(domain.to_string(), command_type.to_string()))
            .cloned()
    }
}
