use thiserror::Error;

/// Worker-crate error boundary. Wraps the core library's errors; the worker
/// itself introduces no new failure modes beyond "the database or queue is
/// unavailable".
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    CommandBus(#[from] commandbus_core::CommandBusError),

    #[error(transparent)]
    Queue(#[from] commandbus_pgmq::QueueError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
