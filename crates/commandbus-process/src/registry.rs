//! Maps `process_type` to the handler that drives it (spec §4.7). Mirrors
//! `commandbus_worker::registry::HandlerRegistry`'s shape one level up.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::ProcessHandler;

#[derive(Default)]
pub struct ProcessRegistry {
    handlers: HashMap<String, Arc<dyn ProcessHandler>>,
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("registered", &self.handlers.len())
            .finish()
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ProcessHandler>) -> &mut Self {
        self.handlers.insert(handler.process_type().to_string(), handler);
        self
    }

    pub fn get(&self, process_type: &str) -> Option<Arc<dyn ProcessHandler>> {
        self.handlers.get(process_type).cloned()
    }
}
