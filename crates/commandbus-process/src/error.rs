use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    CommandBus(#[from] commandbus_core::CommandBusError),

    #[error(transparent)]
    Queue(#[from] commandbus_pgmq::QueueError),

    #[error("process state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid step name '{0}' for process type {1}")]
    InvalidStep(String, &'static str),

    #[error("a FAILED reply carried no error payload")]
    MissingReplyError,
}

pub type ProcessResult<T> = Result<T, ProcessError>;
