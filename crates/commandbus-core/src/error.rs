use thiserror::Error;

/// Library-internal errors: everything that can go wrong talking to the
/// database or the queue while moving a command through its lifecycle.
#[derive(Debug, Error)]
pub enum CommandBusError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Queue(#[from] commandbus_pgmq::QueueError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("duplicate command: domain '{domain}' command_id '{command_id}' already exists")]
    DuplicateCommand { domain: String, command_id: uuid::Uuid },

    #[error("batch '{batch_id}' not found in domain '{domain}'")]
    BatchNotFound { domain: String, batch_id: uuid::Uuid },

    #[error("command '{command_id}' not found in domain '{domain}'")]
    CommandNotFound { domain: String, command_id: uuid::Uuid },

    #[error("command '{command_id}' is not in the troubleshooting queue (status: {status})")]
    NotInTroubleshootingQueue { command_id: uuid::Uuid, status: String },

    #[error("process '{process_id}' not found in domain '{domain}'")]
    ProcessNotFound { domain: String, process_id: uuid::Uuid },

    #[error("no process type registered as '{0}'")]
    UnknownProcessType(String),

    #[error("queue currently unavailable: {0}")]
    QueueUnavailable(String),
}

pub type CommandBusResult<T> = Result<T, CommandBusError>;

/// Errors a handler may raise. The worker's dispatch loop matches on this
/// enum to decide retry vs. troubleshooting-queue vs. terminal failure;
/// a handler that panics instead of returning one of these is caught at its
/// dispatch boundary and converted to `Transient` by
/// [`HandlerError::from_any`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Retryable. Another attempt may succeed.
    #[error("transient error [{code}]: {message}")]
    Transient {
        code: String,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Not retryable; needs a human. Moves the command to the
    /// troubleshooting queue on first failure.
    #[error("permanent error [{code}]: {message}")]
    Permanent {
        code: String,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Not retryable, not operable. Terminal `FAILED`, never TSQ.
    #[error("business rule error [{code}]: {message}")]
    BusinessRule { code: String, message: String },

    /// No handler registered for `(domain, command_type)`.
    #[error("no handler registered for domain '{domain}' command_type '{command_type}'")]
    UnknownHandler { domain: String, command_type: String },
}

impl HandlerError {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn business_rule(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BusinessRule {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build the `(kind, code, message)` triplet persisted to
    /// `last_error_*` and embedded in audit details / reply errors.
    pub fn error_triplet(&self) -> (&'static str, String, String) {
        match self {
            HandlerError::Transient { code, message, .. } => ("TRANSIENT", code.clone(), message.clone()),
            HandlerError::Permanent { code, message, .. } => ("PERMANENT", code.clone(), message.clone()),
            HandlerError::BusinessRule { code, message } => ("BUSINESS_RULE", code.clone(), message.clone()),
            HandlerError::UnknownHandler { domain, command_type } => (
                "PERMANENT",
                "NO_HANDLER".to_string(),
                format!("no handler registered for domain '{domain}' command_type '{command_type}'"),
            ),
        }
    }

    pub fn details(&self) -> Option<&serde_json::Value> {
        match self {
            HandlerError::Transient { details, .. } | HandlerError::Permanent { details, .. } => {
                details.as_ref()
            }
            _ => None,
        }
    }

    /// Uncategorized exceptions default to `Transient` (spec §7). Used by
    /// `WorkerRuntime::dispatch` when a handler panics instead of returning
    /// a `HandlerError` of its own.
    pub fn from_any(error: &(dyn std::error::Error + 'static)) -> Self {
        Self::transient("UNCATEGORIZED", error.to_string())
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;
