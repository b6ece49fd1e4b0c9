use std::io;

use thiserror::Error;

/// Errors that can occur while opening or operating a [`crate::Transport`].
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, TransportError>;
