//! Facade over the belay-transport / belay-protocol / belay-session /
//! belay-dispatch stack: connection strings in, a connected [`Session`] (or
//! [`Dispatcher`]) out.
//!
//! This crate does not install a `tracing` subscriber — that's a binary's
//! job, not a library's. Callers who want the wire-level and session-level
//! `debug!`/`trace!` spans need to set one up themselves.

mod connection;

pub use belay_dispatch::{
    DeviceBuilder, DispatchError, Dispatcher, Operation, OperationKind, OperationOptions, SetupOptions, TaskOptions,
    TeardownOptions, Template, ThreadOptions,
};
pub use belay_session::{Capabilities, FromResultBytes, RawBytes, Session, SessionConfig, SessionError, Value, ValueError};
pub use belay_transport::{SerialConfig, SubprocessConfig, Transport, TransportError, DEFAULT_BAUD};
pub use connection::ConfigError;

use tokio_util::sync::CancellationToken;

/// Parses a connection string and connects a [`Session`] over it,
/// using `config` for the session-level deadlines, buffer sizes, and cache
/// policy. Returns `ConfigError` before any I/O happens if the string is
/// malformed or names an unknown scheme.
pub async fn connect(
    connection_string: &str,
    config: SessionConfig,
    cancel: &CancellationToken,
) -> Result<Session, ConnectError> {
    let transport = connection::parse(connection_string)?;
    let mut session = Session::new(transport, config);
    session.connect(cancel).await?;
    Ok(session)
}

#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
