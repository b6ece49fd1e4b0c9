//! The externally visible device handle: one [`Session`] owns exactly one
//! [`belay_protocol::Engine`] and one [`belay_transport::Transport`].
//! Everything above this crate (`belay-dispatch`, the `belay` facade) talks
//! to a `Session`, never to the engine or transport directly.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use belay_protocol::{Engine, State};
use belay_transport::Transport;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cache::{Cache, CacheKey};
use crate::capabilities::{Capabilities, CAPABILITY_PROBE};
use crate::chunk::ChunkOptimizer;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::transaction::{CompensatingAction, PendingRollbacks, Transaction};
use crate::value::{encode_python_literal, FromResultBytes, Value};

/// The device-side name used to hold an open file handle across the
/// multiple `execute()` round trips a single file transfer spans (adaptive
/// chunking means one round trip per chunk). Chosen to avoid colliding
/// with anything a caller's own template might declare.
const FILE_HANDLE_VAR: &str = "_belay_f";

/// The single logical connection to one device over one transport. Owns
/// its `Engine`, its `Transport`, capabilities detected once on connect,
/// the result cache, the adaptive chunk optimizers for file transfer, and
/// the pending-rollback queue unresolved transactions drain into.
pub struct Session {
    transport: Transport,
    engine: Engine,
    config: SessionConfig,
    capabilities: Option<Capabilities>,
    cache: Cache,
    chunk_read: ChunkOptimizer,
    chunk_write: ChunkOptimizer,
    pending_rollbacks: PendingRollbacks,
    connected: bool,
}

impl Session {
    pub fn new(transport: Transport, config: SessionConfig) -> Self {
        let cache = Cache::new(config.cache_capacity, config.cache_ttl);
        let chunk_read = ChunkOptimizer::new(config.chunk_initial, config.chunk_min, config.chunk_max);
        let chunk_write = ChunkOptimizer::new(config.chunk_initial, config.chunk_min, config.chunk_max);
        let engine = Engine::new(config.engine_config());
        Self {
            transport,
            engine,
            config,
            capabilities: None,
            cache,
            chunk_read,
            chunk_write,
            pending_rollbacks: Rc::new(RefCell::new(Vec::new())),
            connected: false,
        }
    }

    /// Opens the transport, enters Raw mode, probes raw-paste once, and runs
    /// capability detection — all under `config.connect_deadline`, so a
    /// non-responding device fails the call instead of hanging it forever.
    #[instrument(skip(self, cancel))]
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<()> {
        let deadline = self.config.connect_deadline;
        match tokio::time::timeout(deadline, self.connect_inner(cancel)).await {
            Ok(result) => result,
            Err(_) => {
                self.connected = false;
                Err(SessionError::Timeout)
            }
        }
    }

    async fn connect_inner(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.transport.open().await.map_err(|_| SessionError::Broken)?;
        self.engine.connect(&mut self.transport, cancel).await?;

        let probe = format!("import sys; {CAPABILITY_PROBE}");
        let outcome = self.engine.execute(&mut self.transport, probe.as_bytes(), cancel).await?;
        let raw_paste = self.engine.supports_raw_paste().unwrap_or(false);
        let capabilities = Capabilities::parse(&outcome.result, raw_paste)?;

        self.cache.clear();
        info!(fingerprint = %capabilities.fingerprint(), version = %capabilities.version, "session connected");
        self.capabilities = Some(capabilities);
        self.connected = true;
        Ok(())
    }

    /// `any → Friendly`, then closes the transport. Idempotent.
    #[instrument(skip(self, cancel))]
    pub async fn disconnect(&mut self, cancel: &CancellationToken) {
        if !self.connected {
            return;
        }
        self.engine.disconnect(&mut self.transport, cancel).await;
        self.transport.close();
        self.connected = false;
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    pub fn is_broken(&self) -> bool {
        self.engine.is_broken()
    }

    /// Opens a scoped list of compensating actions sharing this session's
    /// pending-rollback queue.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(Rc::clone(&self.pending_rollbacks))
    }

    /// Runs `code`, returning only its result section; stdout is logged but
    /// not returned.
    #[instrument(skip(self, code, cancel), fields(len = code.len()))]
    pub async fn execute(&mut self, code: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.drain_pending_rollbacks().await?;
        let outcome = self.engine.execute(&mut self.transport, code.as_bytes(), cancel).await?;
        if !outcome.stdout.is_empty() {
            debug!(stdout = %String::from_utf8_lossy(&outcome.stdout), "execution stdout");
        }
        Ok(outcome.result)
    }

    /// Runs `code` and parses its result section as `T`.
    pub async fn execute_typed<T: FromResultBytes>(&mut self, code: &str, cancel: &CancellationToken) -> Result<T> {
        let bytes = self.execute(code, cancel).await?;
        Ok(T::from_result_bytes(&bytes)?)
    }

    /// Runs `code`, memoizing the result under `(fingerprint, firmware,
    /// signature_hash)` with the session's configured TTL. On a hit the
    /// transport is never touched at all.
    pub async fn execute_cached(&mut self, signature_hash: u64, code: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let caps = self.capabilities.as_ref().ok_or(SessionError::Broken)?;
        let key = CacheKey {
            fingerprint: caps.fingerprint(),
            firmware_version: caps.version.clone(),
            signature_hash,
        };
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let result = self.execute(code, cancel).await?;
        self.cache.put(key, result.clone());
        Ok(result)
    }

    /// Reads a remote file in adaptively-sized chunks. Keeps one
    /// device-side file handle open across the whole transfer so each round
    /// trip carries exactly one chunk.
    #[instrument(skip(self, cancel))]
    pub async fn read_file(&mut self, remote_path: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.drain_pending_rollbacks().await?;
        let quoted_path = encode_python_literal(&Value::Str(remote_path.to_string()));
        self.execute(
            &format!("import ubinascii; {FILE_HANDLE_VAR} = open({quoted_path}, 'rb')"),
            cancel,
        )
        .await?;

        let mut out = Vec::new();
        loop {
            let n = self.chunk_read.current();
            let started = Instant::now();
            let bytes = self
                .execute_typed::<Vec<u8>>(
                    &format!("ubinascii.b2a_base64({FILE_HANDLE_VAR}.read({n}))"),
                    cancel,
                )
                .await;
            let bytes = match bytes {
                Ok(b) => b,
                Err(err) => {
                    let _ = self.execute(&format!("{FILE_HANDLE_VAR}.close()"), cancel).await;
                    return Err(err);
                }
            };
            let decoded = BASE64.decode(decode_trailing_newline(&bytes)).unwrap_or_default();
            if decoded.is_empty() {
                break;
            }
            self.chunk_read.record(decoded.len(), started.elapsed());
            out.extend_from_slice(&decoded);
        }

        self.execute(&format!("{FILE_HANDLE_VAR}.close()"), cancel).await?;
        Ok(out)
    }

    /// Writes `bytes` to a remote file in adaptively-sized chunks. Host-side
    /// base64 encoding; the device decodes and appends each chunk.
    #[instrument(skip(self, bytes, cancel), fields(len = bytes.len()))]
    pub async fn write_file(&mut self, remote_path: &str, bytes: &[u8], cancel: &CancellationToken) -> Result<()> {
        self.drain_pending_rollbacks().await?;
        let quoted_path = encode_python_literal(&Value::Str(remote_path.to_string()));
        self.execute(
            &format!("import ubinascii; {FILE_HANDLE_VAR} = open({quoted_path}, 'wb')"),
            cancel,
        )
        .await?;

        let mut remaining = bytes;
        while !remaining.is_empty() {
            let n = self.chunk_write.current().min(remaining.len());
            let (chunk, rest) = remaining.split_at(n);
            let encoded = BASE64.encode(chunk);
            let quoted = encode_python_literal(&Value::Bytes(encoded.into_bytes()));

            let started = Instant::now();
            let result = self
                .execute(&format!("{FILE_HANDLE_VAR}.write(ubinascii.a2b_base64({quoted}))"), cancel)
                .await;
            if let Err(err) = result {
                let _ = self.execute(&format!("{FILE_HANDLE_VAR}.close()"), cancel).await;
                return Err(err);
            }
            self.chunk_write.record(n, started.elapsed());
            remaining = rest;
        }

        self.execute(&format!("{FILE_HANDLE_VAR}.close()"), cancel).await?;
        Ok(())
    }

    /// `__import__('os').remove(path)` as a single expression.
    pub async fn delete_file(&mut self, remote_path: &str, cancel: &CancellationToken) -> Result<()> {
        let quoted_path = encode_python_literal(&Value::Str(remote_path.to_string()));
        self.execute(&format!("__import__('os').remove({quoted_path})"), cancel).await?;
        Ok(())
    }

    /// `__import__('os').listdir(path)` as a single expression.
    pub async fn list_files(&mut self, remote_path: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        let quoted_path = encode_python_literal(&Value::Str(remote_path.to_string()));
        self.execute_typed::<Vec<String>>(&format!("__import__('os').listdir({quoted_path})"), cancel).await
    }

    async fn drain_pending_rollbacks(&mut self) -> Result<()> {
        loop {
            let next = self.pending_rollbacks.borrow_mut().pop();
            match next {
                Some(action) => self.run_compensating(action).await?,
                None => return Ok(()),
            }
        }
    }

    pub(crate) async fn run_compensating(&mut self, action: CompensatingAction) -> Result<()> {
        match action {
            CompensatingAction::DeleteFile(path) => {
                let cancel = CancellationToken::new();
                // Best-effort: a file that never existed (e.g. the write it
                // was guarding never got far enough to create it) is not a
                // rollback failure.
                let _ = self.delete_file(&path, &cancel).await;
                Ok(())
            }
        }
    }
}

/// `ubinascii.b2a_base64` appends a trailing newline; strip it before
/// handing the payload to a standard base64 decoder.
fn decode_trailing_newline(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\n").unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_newline() {
        assert_eq!(decode_trailing_newline(b"aGVsbG8=\n"), b"aGVsbG8=");
        assert_eq!(decode_trailing_newline(b"aGVsbG8="), b"aGVsbG8=");
    }
}
