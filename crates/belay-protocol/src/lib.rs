//! The Raw REPL / Raw-Paste protocol engine: the byte-level state machine
//! that drives a MicroPython device's Raw REPL over any [`belay_transport::Transport`].
//!
//! This crate knows nothing about connection strings, attribute dispatch,
//! or file transfer — those live in `belay-session` and `belay-dispatch`.
//! It only knows how to get Python source in and `{stdout, result}` bytes
//! back out, reliably, across both classic Raw framing and windowed
//! Raw-Paste framing.

pub mod control;
mod engine;
mod error;

pub use engine::{Engine, EngineConfig, ExecutionOutcome, State};
pub use error::{EngineError, ExecutionError, ProtocolError, Result};
