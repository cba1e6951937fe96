use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////

/// Returned by [`DueQueue::add`](crate::DueQueue::add) when the queue's
/// cancellation token fired before the entry was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("due queue was cancelled")]
pub struct CancelledError;

////////////////////////////////////////////////////////////////////////////////

/// Errors rejected while constructing a queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Нет рантайма, на котором можно запустить фоновые задачи
    #[error("no tokio runtime available to spawn the coordinator on: {0}")]
    NoRuntime(String),

    /// У рантайма выключен драйвер времени (`enable_time`)
    #[error("tokio runtime has its time driver disabled")]
    TimerDisabled,
}
