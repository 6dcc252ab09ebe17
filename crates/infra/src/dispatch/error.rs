use thiserror::Error;

/// Why one dispatch attempt failed.
///
/// Messages are captured as strings so the error can be cloned into logs,
/// the dead-letter sink and the returned outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("handler {handler} still asked for a retry after {invocations} invocations: {reason}")]
    HandlerRetriesExhausted {
        handler: String,
        invocations: u32,
        reason: String,
    },

    #[error("handler {handler} failed: {message}")]
    HandlerFailed { handler: String, message: String },

    #[error("handler {handler} panicked: {message}")]
    HandlerPanicked { handler: String, message: String },

    #[error("mutator {mutator} failed: {message}")]
    Mutator { mutator: String, message: String },

    #[error("unit of work {unit} failed to begin: {message}")]
    UnitOfWorkBegin { unit: String, message: String },

    #[error("unit of work {unit} failed to end: {message}")]
    UnitOfWorkEnd { unit: String, message: String },

    #[error("dispatch panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Only an explicit retry signal from a handler is retryable; everything
    /// else is fatal for the attempt (it still consumes a retry).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::HandlerRetriesExhausted { .. })
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> String {
        if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        }
    }
}
