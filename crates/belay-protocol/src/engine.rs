//! The Raw REPL / Raw-Paste state machine.
//!
//! [`Engine`] turns a Python source string into an [`ExecutionOutcome`] by
//! driving a borrowed [`Transport`] through classic Raw mode, or Raw-Paste
//! with window-based flow control when the device advertises support for
//! it. The engine owns no I/O resource itself — `Transport` is borrowed in
//! per call.

use std::collections::VecDeque;
use std::time::Duration;

use belay_transport::{Transport, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::control::*;
use crate::error::{EngineError, ExecutionError, ProtocolError, Result};

/// Tracebacks emitted by the device always begin with this line; used to
/// tell a traceback apart from an ordinary (firmware-echoed) result value
/// in the second output section.
const TRACEBACK_PREFIX: &[u8] = b"Traceback (most recent call last):";

/// Engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unknown,
    Friendly,
    Raw,
    RawPaste,
    Executing,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawPasteSupport {
    Unknown,
    Yes,
    No,
}

/// Tunables the data model leaves as "e.g." defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on the internal receive buffer (data model: "bounded, e.g. 4 KiB").
    pub recv_buffer_cap: usize,
    /// Delays between friendly-prompt retries (data model: "100/250/500 ms").
    pub friendly_retry_delays_ms: Vec<u64>,
    /// Wall-clock budget for draining back to a friendly prompt after a
    /// cancellation; exceeding it marks the session broken.
    pub cancel_drain_budget: Duration,
    /// Hard ceiling on a single output section, guarding against a runaway
    /// device that never emits the terminating EOF byte.
    pub max_section_bytes: usize,
    /// Window size assumed before the device has advertised its own, during
    /// the first raw-paste handshake of the session (data model: "negotiated
    /// raw-paste window size (default 256 bytes)").
    pub initial_window: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recv_buffer_cap: 4096,
            friendly_retry_delays_ms: vec![100, 250, 500],
            cancel_drain_budget: Duration::from_secs(2),
            max_section_bytes: 16 * 1024 * 1024,
            initial_window: DEFAULT_WINDOW,
        }
    }
}

/// The stdout/result halves of one execution. Error info (a device
/// traceback) is modeled as the `Err` side of `execute`'s `Result` rather
/// than a third field here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionOutcome {
    pub stdout: Vec<u8>,
    pub result: Vec<u8>,
}

/// Internal control-flow classification for a failed read/write step.
/// Collapsed into `EngineError` at the public-method boundary.
enum Flow {
    Protocol(ProtocolError),
    Cancelled,
    Device(Vec<u8>),
    Refused,
}

impl Flow {
    fn from_transport(e: TransportError) -> Flow {
        match e {
            TransportError::Cancelled => Flow::Cancelled,
            other => Flow::Protocol(ProtocolError::Transport(other)),
        }
    }
}

fn flow_into_engine_error(flow: Flow) -> EngineError {
    match flow {
        Flow::Protocol(e) => EngineError::Protocol(e),
        Flow::Cancelled => EngineError::Execution(ExecutionError::Cancelled),
        Flow::Device(traceback) => EngineError::Execution(ExecutionError::Device { traceback }),
        Flow::Refused => EngineError::Execution(ExecutionError::Refused),
    }
}

/// The Raw REPL / Raw-Paste protocol engine. One per session; see
/// `belay-session::Session` for the owner.
pub struct Engine {
    config: EngineConfig,
    state: State,
    recv_buf: VecDeque<u8>,
    raw_paste: RawPasteSupport,
    window: u16,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let window = config.initial_window;
        Self {
            config,
            state: State::Unknown,
            recv_buf: VecDeque::new(),
            raw_paste: RawPasteSupport::Unknown,
            window,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_broken(&self) -> bool {
        self.state == State::Broken
    }

    /// `None` until the raw-paste probe has run once; `Some` afterwards.
    pub fn supports_raw_paste(&self) -> Option<bool> {
        match self.raw_paste {
            RawPasteSupport::Yes => Some(true),
            RawPasteSupport::No => Some(false),
            RawPasteSupport::Unknown => None,
        }
    }

    pub fn window(&self) -> u16 {
        self.window
    }

    /// `Unknown → Friendly → Raw`, probing raw-paste once if not already known.
    #[instrument(skip_all)]
    pub async fn connect(&mut self, transport: &mut Transport, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(EngineError::Execution(ExecutionError::Cancelled));
        }
        self.enter_friendly(transport, cancel).await?;
        self.enter_raw(transport, cancel).await?;
        if matches!(self.raw_paste, RawPasteSupport::Unknown) {
            self.probe_raw_paste(transport, cancel).await?;
        }
        debug!(raw_paste = ?self.raw_paste, window = self.window, "engine connected");
        Ok(())
    }

    /// `any → Friendly`, best-effort. Guaranteed to run on session close.
    pub async fn disconnect(&mut self, transport: &mut Transport, cancel: &CancellationToken) {
        if self.state == State::Broken {
            return;
        }
        if let Err(e) = self.exit_to_friendly(transport, cancel).await {
            warn!(error = %e, "disconnect did not reach a friendly prompt cleanly");
        }
    }

    /// Runs `code` to completion and returns its stdout/result sections.
    /// Chooses classic or raw-paste framing based on the probed capability.
    #[instrument(skip_all, fields(len = code.len()))]
    pub async fn execute(
        &mut self,
        transport: &mut Transport,
        code: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome> {
        if self.state == State::Broken {
            return Err(EngineError::Broken);
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Execution(ExecutionError::Cancelled));
        }
        debug_assert_eq!(
            self.state,
            State::Raw,
            "execute() called outside Raw state; caller must serialize calls per session"
        );

        self.state = State::Executing;
        let use_paste = matches!(self.raw_paste, RawPasteSupport::Yes);
        trace!(use_paste, "dispatching execution");

        let outcome = if use_paste {
            self.execute_raw_paste(transport, code, cancel).await
        } else {
            self.execute_classic(transport, code, cancel).await
        };

        match outcome {
            Ok(outcome) => {
                self.state = State::Raw;
                Ok(outcome)
            }
            Err(Flow::Device(traceback)) => {
                self.state = State::Raw;
                Err(EngineError::Execution(ExecutionError::Device { traceback }))
            }
            Err(Flow::Refused) => {
                self.state = State::Raw;
                Err(EngineError::Execution(ExecutionError::Refused))
            }
            Err(Flow::Cancelled) => match self.recover_from_cancellation(transport).await {
                Ok(()) => {
                    self.state = State::Raw;
                    Err(EngineError::Execution(ExecutionError::Cancelled))
                }
                Err(()) => {
                    self.state = State::Broken;
                    Err(EngineError::Broken)
                }
            },
            Err(Flow::Protocol(err)) => {
                // A `ProtocolError` is fatal to the session (§7: "Kinds 1-3
                // tear the session down; further calls fail with a 'session
                // broken' marker"), which `SessionError::from(EngineError)`
                // enforces unconditionally. The `Friendly → Raw` re-entry
                // below is attempted best-effort purely to leave the wire in
                // a clean state for whatever reconnect follows; its outcome
                // must not put `self.state` back to `Raw`, or the engine
                // would report itself usable while the caller is told
                // `Broken`.
                let _ = self.retry_via_friendly(transport, cancel).await;
                self.state = State::Broken;
                Err(EngineError::Protocol(err))
            }
        }
    }

    // ---- state transitions ----

    async fn enter_friendly(&mut self, transport: &mut Transport, cancel: &CancellationToken) -> Result<()> {
        let delays = self.config.friendly_retry_delays_ms.clone();
        let attempts = delays.len().max(1);

        for attempt in 0..attempts {
            let sent = transport
                .write_all(&[INTERRUPT, INTERRUPT], cancel)
                .await
                .and(transport.write_all(b"\r", cancel).await);
            if let Err(e) = sent {
                self.state = State::Broken;
                return Err(EngineError::Protocol(ProtocolError::Transport(e)));
            }

            match self.wait_for_prompt(transport, FRIENDLY_PROMPT, cancel).await {
                Ok(()) => {
                    self.state = State::Friendly;
                    return Ok(());
                }
                Err(Flow::Cancelled) => {
                    return Err(EngineError::Execution(ExecutionError::Cancelled));
                }
                Err(flow) if attempt + 1 < attempts => {
                    debug!(attempt, "friendly prompt not observed, retrying");
                    let _ = flow;
                    tokio::time::sleep(Duration::from_millis(delays.get(attempt).copied().unwrap_or(500))).await;
                }
                Err(flow) => {
                    self.state = State::Broken;
                    return Err(flow_into_engine_error(flow));
                }
            }
        }

        self.state = State::Broken;
        Err(EngineError::Protocol(ProtocolError::PromptNotObserved(attempts as u32)))
    }

    async fn enter_raw(&mut self, transport: &mut Transport, cancel: &CancellationToken) -> Result<()> {
        match self.try_enter_raw_once(transport, cancel).await {
            Ok(()) => {
                self.state = State::Raw;
                Ok(())
            }
            Err(Flow::Cancelled) => Err(EngineError::Execution(ExecutionError::Cancelled)),
            Err(first_err) => {
                self.enter_friendly(transport, cancel).await?;
                match self.try_enter_raw_once(transport, cancel).await {
                    Ok(()) => {
                        self.state = State::Raw;
                        Ok(())
                    }
                    Err(Flow::Cancelled) => Err(EngineError::Execution(ExecutionError::Cancelled)),
                    Err(_second_err) => {
                        self.state = State::Broken;
                        Err(flow_into_engine_error(first_err))
                    }
                }
            }
        }
    }

    async fn try_enter_raw_once(
        &mut self,
        transport: &mut Transport,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), Flow> {
        transport
            .write_all(&[ENTER_RAW], cancel)
            .await
            .map_err(Flow::from_transport)?;
        let banner = self.read_exact_n(transport, RAW_REPL_BANNER.len(), cancel).await?;
        if banner != RAW_REPL_BANNER {
            return Err(Flow::Protocol(ProtocolError::UnexpectedBanner(banner)));
        }
        Ok(())
    }

    /// Performs the `Raw → RawPaste` handshake with no code to send: this is
    /// exactly an `execute("")` over raw-paste framing, used once per session
    /// purely to learn whether the device supports it. The handshake bytes
    /// are identical to the ones every later raw-paste `execute` resends —
    /// there is no separate "probe-only" wire form.
    async fn probe_raw_paste(&mut self, transport: &mut Transport, cancel: &CancellationToken) -> Result<bool> {
        match self.execute_raw_paste(transport, b"", cancel).await {
            Ok(_outcome) => Ok(matches!(self.raw_paste, RawPasteSupport::Yes)),
            Err(flow) => {
                self.state = State::Broken;
                Err(flow_into_engine_error(flow))
            }
        }
    }

    /// Sends the `RAW_PASTE 'A' 0x01` handshake that enters RawPaste for one
    /// execution. Returns `Ok(true)` with the negotiated window recorded, or
    /// `Ok(false)` if the device declined (classic framing must be used for
    /// this call).
    async fn enter_raw_paste_for_call(
        &mut self,
        transport: &mut Transport,
        cancel: &CancellationToken,
    ) -> std::result::Result<bool, Flow> {
        transport
            .write_all(&[RAW_PASTE, b'A', 0x01], cancel)
            .await
            .map_err(Flow::from_transport)?;
        let ack = self.read_exact_n(transport, 2, cancel).await?;
        match ack.as_slice() {
            b"R\x00" => {
                self.raw_paste = RawPasteSupport::No;
                Ok(false)
            }
            b"R\x01" => {
                let window_bytes = self.read_exact_n(transport, 2, cancel).await?;
                self.window = u16::from_le_bytes([window_bytes[0], window_bytes[1]]);
                let eof = self.read_exact_n(transport, 1, cancel).await?;
                if eof != [EOF] {
                    return Err(Flow::Protocol(ProtocolError::UnexpectedWindowByte(eof[0])));
                }
                self.raw_paste = RawPasteSupport::Yes;
                Ok(true)
            }
            other => Err(Flow::Protocol(ProtocolError::AckMismatch(other.to_vec()))),
        }
    }

    async fn exit_to_friendly(&mut self, transport: &mut Transport, cancel: &CancellationToken) -> Result<()> {
        transport
            .write_all(&[EXIT_RAW], cancel)
            .await
            .map_err(|e| EngineError::Protocol(ProtocolError::Transport(e)))?;
        match self.wait_for_prompt(transport, FRIENDLY_PROMPT, cancel).await {
            Ok(()) => {
                self.state = State::Friendly;
                Ok(())
            }
            Err(flow) => {
                self.state = State::Broken;
                Err(flow_into_engine_error(flow))
            }
        }
    }

    async fn retry_via_friendly(&mut self, transport: &mut Transport, cancel: &CancellationToken) -> Result<()> {
        self.enter_friendly(transport, cancel).await?;
        self.enter_raw(transport, cancel).await?;
        Ok(())
    }

    /// INTERRUPT + drain to a friendly prompt, then back into Raw, all under
    /// a fresh (uncancelled) token and a wall-clock budget — the original
    /// token is already cancelled, so it cannot gate this recovery I/O.
    async fn recover_from_cancellation(&mut self, transport: &mut Transport) -> std::result::Result<(), ()> {
        let fresh = CancellationToken::new();
        let budget = self.config.cancel_drain_budget;

        let attempt = async {
            transport.write_all(&[INTERRUPT], &fresh).await.map_err(|_| ())?;
            self.wait_for_prompt(transport, FRIENDLY_PROMPT, &fresh)
                .await
                .map_err(|_| ())?;
            self.state = State::Friendly;
            self.enter_raw(transport, &fresh).await.map_err(|_| ())?;
            Ok::<(), ()>(())
        };

        match tokio::time::timeout(budget, attempt).await {
            Ok(Ok(())) => Ok(()),
            _ => Err(()),
        }
    }

    // ---- framing ----

    async fn execute_classic(
        &mut self,
        transport: &mut Transport,
        code: &[u8],
        cancel: &CancellationToken,
    ) -> std::result::Result<ExecutionOutcome, Flow> {
        transport.write_all(code, cancel).await.map_err(Flow::from_transport)?;
        transport.write_all(&[EOF], cancel).await.map_err(Flow::from_transport)?;
        let ack = self.read_exact_n(transport, 2, cancel).await?;
        if ack != CLASSIC_OK {
            return Err(Flow::Protocol(ProtocolError::AckMismatch(ack)));
        }
        self.read_output_sections(transport, cancel).await
    }

    async fn execute_raw_paste(
        &mut self,
        transport: &mut Transport,
        code: &[u8],
        cancel: &CancellationToken,
    ) -> std::result::Result<ExecutionOutcome, Flow> {
        if !self.enter_raw_paste_for_call(transport, cancel).await? {
            return self.execute_classic(transport, code, cancel).await;
        }

        let mut remaining = code;
        let mut credit = self.window as usize;

        loop {
            let take = credit.min(remaining.len());
            if take > 0 {
                transport
                    .write_all(&remaining[..take], cancel)
                    .await
                    .map_err(Flow::from_transport)?;
                remaining = &remaining[take..];
                credit -= take;
            }

            if credit == 0 {
                let b = self.read_byte(transport, cancel).await?;
                match b {
                    WINDOW_INCREMENT => credit += self.window as usize,
                    EOF => {
                        let _ = transport.write_all(&[EOF], cancel).await;
                        return Err(Flow::Refused);
                    }
                    other => return Err(Flow::Protocol(ProtocolError::UnexpectedWindowByte(other))),
                }
            }

            if remaining.is_empty() {
                break;
            }
        }

        transport.write_all(&[EOF], cancel).await.map_err(Flow::from_transport)?;
        self.read_output_sections(transport, cancel).await
    }

    async fn read_output_sections(
        &mut self,
        transport: &mut Transport,
        cancel: &CancellationToken,
    ) -> std::result::Result<ExecutionOutcome, Flow> {
        let stdout = self.read_until_eof_byte(transport, cancel).await?;
        let result = self.read_until_eof_byte(transport, cancel).await?;
        let trailer = self.read_exact_n(transport, 1, cancel).await?;
        if trailer != [b'>'] {
            return Err(Flow::Protocol(ProtocolError::UnexpectedBanner(trailer)));
        }
        if result.starts_with(TRACEBACK_PREFIX) {
            return Err(Flow::Device(result));
        }
        Ok(ExecutionOutcome { stdout, result })
    }

    // ---- byte-level reads ----

    async fn wait_for_prompt(
        &mut self,
        transport: &mut Transport,
        prompt: &[u8],
        cancel: &CancellationToken,
    ) -> std::result::Result<(), Flow> {
        let mut tail: VecDeque<u8> = VecDeque::with_capacity(prompt.len());
        let mut total = 0usize;
        loop {
            let b = self.read_byte(transport, cancel).await?;
            total += 1;
            if total > self.config.max_section_bytes {
                return Err(Flow::Protocol(ProtocolError::BufferOverrun(self.config.max_section_bytes)));
            }
            tail.push_back(b);
            if tail.len() > prompt.len() {
                tail.pop_front();
            }
            if tail.len() == prompt.len() && tail.iter().copied().eq(prompt.iter().copied()) {
                return Ok(());
            }
        }
    }

    async fn read_until_eof_byte(
        &mut self,
        transport: &mut Transport,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<u8>, Flow> {
        let mut out = Vec::new();
        loop {
            let b = self.read_byte(transport, cancel).await?;
            if b == EOF {
                return Ok(out);
            }
            out.push(b);
            if out.len() > self.config.max_section_bytes {
                return Err(Flow::Protocol(ProtocolError::BufferOverrun(self.config.max_section_bytes)));
            }
        }
    }

    async fn read_exact_n(
        &mut self,
        transport: &mut Transport,
        n: usize,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<u8>, Flow> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.read_byte(transport, cancel).await?);
        }
        Ok(out)
    }

    async fn read_byte(
        &mut self,
        transport: &mut Transport,
        cancel: &CancellationToken,
    ) -> std::result::Result<u8, Flow> {
        if self.recv_buf.is_empty() {
            let mut scratch = vec![0u8; self.config.recv_buffer_cap];
            let n = transport.read(&mut scratch, cancel).await.map_err(Flow::from_transport)?;
            if n == 0 {
                return Err(Flow::Protocol(ProtocolError::UnexpectedEof));
            }
            self.recv_buf.extend(scratch[..n].iter().copied());
        }
        Ok(self.recv_buf.pop_front().expect("buffer just filled"))
    }
}
