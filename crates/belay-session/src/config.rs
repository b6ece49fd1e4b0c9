use std::time::Duration;

use belay_protocol::EngineConfig;

/// The "global" configuration the protocol leaves as tunable defaults,
/// made concrete here. Read once at `Session` construction and never
/// re-read from the device.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for `connect()`, covering friendly/raw entry and capability
    /// detection together.
    pub connect_deadline: Duration,
    /// Default deadline for `execute`/`execute_typed` when an attribute
    /// doesn't supply its own.
    pub operation_deadline: Duration,
    /// Receive buffer capacity handed to the underlying [`EngineConfig`].
    pub recv_buffer_cap: usize,
    /// Initial raw-paste window advertised before the device's own value is
    /// learned during the capability probe.
    pub initial_window: u16,
    /// Adaptive chunk optimizer bounds and starting point.
    pub chunk_initial: usize,
    pub chunk_min: usize,
    pub chunk_max: usize,
    /// Cache capacity (entry count) and per-entry TTL.
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_deadline: Duration::from_secs(30),
            operation_deadline: Duration::from_secs(30),
            recv_buffer_cap: 4096,
            initial_window: 256,
            chunk_initial: 256,
            chunk_min: 64,
            chunk_max: 4096,
            cache_capacity: 256,
            cache_ttl: Duration::from_secs(60),
        }
    }
}

impl SessionConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            recv_buffer_cap: self.recv_buffer_cap,
            initial_window: self.initial_window,
            ..EngineConfig::default()
        }
    }
}
