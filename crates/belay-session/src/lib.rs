//! The externally visible device object: execution, typed results, binary
//! file transfer, one-shot capability detection, a result cache, and
//! compensating-action pseudo-transactions, all bound to a single
//! `belay_transport::Transport` + `belay_protocol::Engine` pair.
//!
//! This crate knows nothing about connection strings or declarative
//! attribute dispatch — those live in the `belay` facade and
//! `belay-dispatch` respectively.

mod cache;
mod capabilities;
mod chunk;
mod config;
mod error;
mod session;
mod transaction;
pub mod value;

pub use capabilities::Capabilities;
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use session::Session;
pub use transaction::{CompensatingAction, Transaction};
pub use value::{FromResultBytes, RawBytes, Value, ValueError};
