use thiserror::Error;

/// Errors an [`crate::Dispatcher`] call can fail with, on top of whatever a
/// [`belay_session::Session`] call itself returns.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Session(#[from] belay_session::SessionError),

    #[error("no operation named {0:?} registered")]
    UnknownOperation(String),

    #[error("operation {0:?} is not a {1}")]
    WrongKind(String, &'static str),

    #[error("setup {0:?} failed and is marked critical; aborting connect")]
    CriticalSetupFailed(String),

    #[error("operation {0:?} timed out")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
