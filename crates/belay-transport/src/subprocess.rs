//! Subprocess transport variant: drives a MicroPython-compatible interpreter
//! launched as a child process, using its stdin/stdout as the byte channel.
//! Stderr is drained to a bounded ring buffer for diagnostics but is never
//! part of the protocol stream.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TransportError};

/// Number of trailing stderr lines retained for diagnostics.
const STDERR_TAIL_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    pub executable: String,
    pub args: Vec<String>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl SubprocessConfig {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SubprocessTransport {
    config: SubprocessConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl SubprocessTransport {
    pub fn new(config: SubprocessConfig) -> Self {
        Self {
            config,
            child: None,
            stdin: None,
            stdout: None,
            stderr_tail: Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_CAPACITY))),
        }
    }

    pub async fn open(&mut self) -> Result<()> {
        let mut command = Command::new(&self.config.executable);
        command
            .args(&self.config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            TransportError::Unavailable(format!("{}: {e}", self.config.executable))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Unavailable("no stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Unavailable("no stdout handle".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Unavailable("no stderr handle".to_string()))?;

        let tail = Arc::clone(&self.stderr_tail);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut tail = tail.lock().await;
                if tail.len() == STDERR_TAIL_CAPACITY {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        Ok(())
    }

    pub async fn read(&mut self, buf: &mut [u8], cancel: &CancellationToken) -> Result<usize> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| TransportError::Unavailable("subprocess not open".to_string()))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(self.config.read_timeout, stdout.read(buf)) => {
                match result {
                    Ok(Ok(n)) => Ok(n),
                    Ok(Err(e)) => Err(TransportError::Io(e)),
                    Err(_) => Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "subprocess read timed out",
                    ))),
                }
            }
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8], cancel: &CancellationToken) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TransportError::Unavailable("subprocess not open".to_string()))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = tokio::time::timeout(self.config.write_timeout, stdin.write_all(bytes)) => {
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(TransportError::Io(e)),
                    Err(_) => Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "subprocess write timed out",
                    ))),
                }
            }
        }
    }

    /// Snapshot of the most recent stderr lines, oldest first. For
    /// diagnostics only; never consumed by the protocol engine.
    pub async fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().await.iter().cloned().collect()
    }

    pub fn close(&mut self) {
        self.stdin = None;
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            debug!("killing subprocess transport child");
            let _ = child.start_kill();
        }
    }
}
