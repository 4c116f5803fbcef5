use std::time::Duration;

use thiserror::Error;

/// Per-request failure returned to the caller that submitted the request.
///
/// A handler crash is intentionally absent: it is re-raised as a panic in
/// the submitting task instead of being turned into a value.
#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// `submit` was called while the dispatcher is not running.
    #[error("dispatcher is stopped")]
    Stopped,

    /// The target shard queue is at capacity (backpressure).
    #[error("shard buffer is full")]
    BufferFull,

    /// The handler's own error, passed through verbatim.
    #[error("handler failed: {0}")]
    Handler(E),

    /// The caller stopped waiting. The request itself still runs to completion.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The reply slot was dropped without a response (worker torn down).
    #[error("request was abandoned before a response was delivered")]
    Abandoned,
}

impl<E> DispatchError<E> {
    /// Rejected before reaching a worker (`Stopped` / `BufferFull`).
    ///
    /// The handler has not been invoked for such a request, so resubmitting
    /// it cannot cause a duplicate execution.
    pub fn is_rejection(&self) -> bool {
        matches!(self, DispatchError::Stopped | DispatchError::BufferFull)
    }
}

/// Invalid dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("number of workers must be positive")]
    ZeroWorkers,

    #[error("worker buffer size must not be negative (got {0})")]
    NegativeBufferSize(i64),

    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Why `Dispatcher::try_start` refused to start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("dispatcher is already started")]
    AlreadyStarted,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}
