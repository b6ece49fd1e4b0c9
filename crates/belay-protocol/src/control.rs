//! Control bytes of the MicroPython Raw REPL / Raw-Paste wire protocol.

/// Abort running program, return to friendly REPL.
pub const INTERRUPT: u8 = 0x03;
/// Terminate an input block; also delimits output sections.
pub const EOF: u8 = 0x04;
/// Switch friendly REPL → raw REPL.
pub const ENTER_RAW: u8 = 0x01;
/// Switch raw REPL → friendly REPL.
pub const EXIT_RAW: u8 = 0x02;
/// Request raw-paste mode (sent after `ENTER_RAW`).
pub const RAW_PASTE: u8 = 0x05;

/// Banner the device emits after `ENTER_RAW` on entering raw mode.
pub const RAW_REPL_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";
/// Prompt the device emits in friendly (interactive) mode.
pub const FRIENDLY_PROMPT: &[u8] = b">>> ";
/// Two-byte ack after classic-mode code submission.
pub const CLASSIC_OK: &[u8] = b"OK";
/// Raw-paste window-increment signal byte.
pub const WINDOW_INCREMENT: u8 = 0x01;
/// Default raw-paste window size if none has been negotiated yet.
pub const DEFAULT_WINDOW: u16 = 256;
