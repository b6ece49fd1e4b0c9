//! In-memory transport over a duplex pipe, for driving the protocol engine
//! against a fake device in tests. Only compiled with the `test-support`
//! feature; the closed `{Serial, Subprocess}` union described in the data
//! model is unchanged for ordinary builds.

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};

pub struct MemoryTransport {
    stream: Option<DuplexStream>,
}

impl MemoryTransport {
    pub fn new(stream: DuplexStream) -> Self {
        Self { stream: Some(stream) }
    }

    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::Unavailable("memory transport closed".to_string()))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = stream.read(buf) => result.map_err(TransportError::Io),
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8], cancel: &CancellationToken) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::Unavailable("memory transport closed".to_string()))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = stream.write_all(bytes) => result.map_err(TransportError::Io),
        }
    }

    pub fn close(&mut self) {
        self.stream = None;
    }
}
