use thiserror::Error;

/// Framing-level failures: unexpected bytes, ack mismatch, bad banner. The
/// engine retries once via `Friendly → Raw` on any of these; a second
/// failure is fatal to the session.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unexpected banner from device: {0:?}")]
    UnexpectedBanner(Vec<u8>),

    #[error("ack mismatch: expected \"OK\", got {0:?}")]
    AckMismatch(Vec<u8>),

    #[error("unexpected byte {0:#04x} while waiting for raw-paste window credit")]
    UnexpectedWindowByte(u8),

    #[error("friendly prompt not observed after {0} attempts")]
    PromptNotObserved(u32),

    #[error("receive buffer exceeded bound of {0} bytes without a terminator")]
    BufferOverrun(usize),

    #[error("transport reported EOF mid-frame")]
    UnexpectedEof,

    #[error(transparent)]
    Transport(#[from] belay_transport::TransportError),
}

/// Execution-level outcomes that leave the engine usable (`ExecutionError::Device`,
/// `::Refused`) or that describe a bounded interruption (`::Cancelled`, `::Timeout`).
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("device raised an exception")]
    Device { traceback: Vec<u8> },

    #[error("device refused the raw-paste transfer")]
    Refused,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,
}

/// Top-level error returned by [`crate::engine::Engine`] operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("engine is broken and must be reconnected")]
    Broken,
}

pub type Result<T> = std::result::Result<T, EngineError>;
