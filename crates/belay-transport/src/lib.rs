//! Byte-stream transports for driving a MicroPython Raw REPL.
//!
//! [`Transport`] is a closed, two-variant union over a serial port and a
//! subprocess's stdio. Callers never reach for the variant-specific types
//! directly; everything above this crate talks to `Transport`.

mod error;
#[cfg(feature = "test-support")]
mod memory;
pub mod serial;
pub mod subprocess;

pub use error::{Result, TransportError};
#[cfg(feature = "test-support")]
pub use memory::MemoryTransport;
pub use serial::{SerialConfig, SerialTransport, DEFAULT_BAUD};
pub use subprocess::{SubprocessConfig, SubprocessTransport};

#[cfg(feature = "test-support")]
use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// A byte-stream to the device: either a serial port or a child process's
/// stdio. At most one outstanding read and one outstanding write at any
/// time — enforced by the engine above this crate, which never issues a
/// second call before the first resolves.
///
/// With the `test-support` feature, a third `Memory` variant is available
/// for driving the protocol engine against a fake device over an in-memory
/// pipe; it does not exist in ordinary builds.
pub enum Transport {
    Serial(SerialTransport),
    Subprocess(SubprocessTransport),
    #[cfg(feature = "test-support")]
    Memory(MemoryTransport),
}

impl Transport {
    pub fn serial(config: SerialConfig) -> Self {
        Transport::Serial(SerialTransport::new(config))
    }

    pub fn subprocess(config: SubprocessConfig) -> Self {
        Transport::Subprocess(SubprocessTransport::new(config))
    }

    #[cfg(feature = "test-support")]
    pub fn memory(stream: DuplexStream) -> Self {
        Transport::Memory(MemoryTransport::new(stream))
    }

    #[instrument(skip(self), fields(kind = self.kind()))]
    pub async fn open(&mut self) -> Result<()> {
        debug!("opening transport");
        match self {
            Transport::Serial(t) => t.open().await,
            Transport::Subprocess(t) => t.open().await,
            #[cfg(feature = "test-support")]
            Transport::Memory(_) => Ok(()),
        }
    }

    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        match self {
            Transport::Serial(t) => t.read(buf, cancel).await,
            Transport::Subprocess(t) => t.read(buf, cancel).await,
            #[cfg(feature = "test-support")]
            Transport::Memory(t) => t.read(buf, cancel).await,
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8], cancel: &CancellationToken) -> Result<()> {
        match self {
            Transport::Serial(t) => t.write_all(bytes, cancel).await,
            Transport::Subprocess(t) => t.write_all(bytes, cancel).await,
            #[cfg(feature = "test-support")]
            Transport::Memory(t) => t.write_all(bytes, cancel).await,
        }
    }

    pub fn close(&mut self) {
        match self {
            Transport::Serial(t) => t.close(),
            Transport::Subprocess(t) => t.close(),
            #[cfg(feature = "test-support")]
            Transport::Memory(t) => t.close(),
        }
    }

    /// Diagnostic tail of the subprocess's stderr stream. Empty for serial
    /// and in-memory transports, which have no analogous side channel.
    pub async fn stderr_tail(&self) -> Vec<String> {
        match self {
            Transport::Serial(_) => Vec::new(),
            Transport::Subprocess(t) => t.stderr_tail().await,
            #[cfg(feature = "test-support")]
            Transport::Memory(_) => Vec::new(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Transport::Serial(_) => "serial",
            Transport::Subprocess(_) => "subprocess",
            #[cfg(feature = "test-support")]
            Transport::Memory(_) => "memory",
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_reflects_variant() {
        let t = Transport::serial(SerialConfig::new("/dev/null"));
        assert_eq!(t.kind(), "serial");

        let t = Transport::subprocess(SubprocessConfig::new("true", vec![]));
        assert_eq!(t.kind(), "subprocess");
    }
}
