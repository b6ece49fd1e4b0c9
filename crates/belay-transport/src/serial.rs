//! Serial-port transport variant.
//!
//! Opens a device path in raw mode (no echo, no canonical line discipline,
//! no CR/LF translation) at a configurable baud rate, 8N1, with no hardware
//! flow control. `tokio-serial` already applies most of this through
//! `serialport`'s builder; on Unix we additionally clear `HUPCL` and force
//! `cfmakeraw`-equivalent termios flags the same way `berkowski-mio-serial`
//! does in its `unix.rs`, because `serialport`'s raw-mode guarantees are
//! best-effort on some platforms.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};

/// Default baud rate used when a connection string doesn't specify one.
pub const DEFAULT_BAUD: u32 = 115_200;

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub path: String,
    pub baud: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl SerialConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud: DEFAULT_BAUD,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SerialTransport {
    config: SerialConfig,
    port: Option<tokio_serial::SerialStream>,
}

impl SerialTransport {
    pub fn new(config: SerialConfig) -> Self {
        Self { config, port: None }
    }

    pub async fn open(&mut self) -> Result<()> {
        let port = tokio_serial::new(&self.config.path, self.config.baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TransportError::Unavailable(format!("{}: {e}", self.config.path)))?;

        #[cfg(unix)]
        set_raw_mode(&port)?;

        self.port = Some(port);
        Ok(())
    }

    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        let port = self.port.as_mut().ok_or_else(|| {
            TransportError::Unavailable("serial port not open".to_string())
        })?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(self.config.read_timeout, port.read(buf)) => {
                match result {
                    Ok(Ok(n)) => Ok(n),
                    Ok(Err(e)) => Err(TransportError::Io(e)),
                    Err(_) => Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "serial read timed out",
                    ))),
                }
            }
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8], cancel: &CancellationToken) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(|| {
            TransportError::Unavailable("serial port not open".to_string())
        })?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(self.config.write_timeout, port.write_all(bytes)) => {
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(TransportError::Io(e)),
                    Err(_) => Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "serial write timed out",
                    ))),
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.port = None;
    }
}

#[cfg(unix)]
fn set_raw_mode(port: &tokio_serial::SerialStream) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    use nix::sys::termios::{self, SetArg};

    let fd = port.as_raw_fd();
    let mut attrs = termios::tcgetattr(fd)
        .map_err(|e| TransportError::Unavailable(format!("tcgetattr: {e}")))?;

    termios::cfmakeraw(&mut attrs);
    attrs.control_flags.remove(termios::ControlFlags::HUPCL);

    termios::tcsetattr(fd, SetArg::TCSANOW, &attrs)
        .map_err(|e| TransportError::Unavailable(format!("tcsetattr: {e}")))?;

    Ok(())
}
