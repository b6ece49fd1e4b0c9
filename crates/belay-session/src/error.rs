use thiserror::Error;

use belay_protocol::{EngineError, ExecutionError};

/// Everything a [`crate::Session`] call can fail with.
///
/// Mirrors spec kinds 2–8: transport/protocol failures collapse to
/// `Broken` (the session is no longer usable; caller must reconnect),
/// `Device`/`Refused`/`Cancelled`/`Timeout` are recoverable, and
/// `Value`/`UnresolvedPlaceholder`/`UnsafeTemplate` never touch the wire.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("device session is broken and must be reconnected")]
    Broken,

    #[error("device raised an exception")]
    Device { traceback: Vec<u8> },

    #[error("device refused the raw-paste transfer")]
    Refused,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,

    #[error("result value did not match the requested type: {0}")]
    Value(#[from] crate::value::ValueError),

    #[error("unresolved placeholder(s) remain in rendered template")]
    UnresolvedPlaceholder,

    #[error("rendered template matched the deny-list: {pattern:?}")]
    UnsafeTemplate { pattern: String },

    #[error("transaction already committed or rolled back")]
    TransactionAlreadyResolved,
}

pub type Result<T> = std::result::Result<T, SessionError>;

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Execution(ExecutionError::Device { traceback }) => SessionError::Device { traceback },
            EngineError::Execution(ExecutionError::Refused) => SessionError::Refused,
            EngineError::Execution(ExecutionError::Cancelled) => SessionError::Cancelled,
            EngineError::Execution(ExecutionError::Timeout) => SessionError::Timeout,
            EngineError::Protocol(_) | EngineError::Broken => SessionError::Broken,
        }
    }
}
