//! Connection strings: a single-string configuration surface —
//! `serial:<path>[?baud=N]` or `subprocess:<exe>[ arg ...]`. Parsing never
//! touches I/O; an unknown scheme or malformed string is rejected before a
//! [`belay_transport::Transport`] is even constructed.

use belay_transport::{SerialConfig, SubprocessConfig, Transport};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("connection string is empty")]
    Empty,

    #[error("unknown transport scheme {0:?}; expected \"serial\" or \"subprocess\"")]
    UnknownScheme(String),

    #[error("serial connection string is missing a device path")]
    MissingPath,

    #[error("subprocess connection string is missing an executable")]
    MissingExecutable,

    #[error("invalid baud rate {0:?}")]
    InvalidBaud(String),

    #[error("unsupported query parameter {0:?} in serial connection string")]
    UnsupportedParam(String),
}

/// Parses a connection string into a ready [`Transport`]. Neither branch
/// performs I/O; `Transport::open` does that later.
pub fn parse(connection_string: &str) -> Result<Transport, ConfigError> {
    let connection_string = connection_string.trim();
    if connection_string.is_empty() {
        return Err(ConfigError::Empty);
    }

    if let Some(rest) = connection_string.strip_prefix("serial:") {
        return parse_serial(rest).map(Transport::serial);
    }
    if let Some(rest) = connection_string.strip_prefix("subprocess:") {
        return parse_subprocess(rest).map(Transport::subprocess);
    }

    let scheme = connection_string.split(':').next().unwrap_or(connection_string);
    Err(ConfigError::UnknownScheme(scheme.to_string()))
}

fn parse_serial(rest: &str) -> Result<SerialConfig, ConfigError> {
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    if path.is_empty() {
        return Err(ConfigError::MissingPath);
    }

    let mut config = SerialConfig::new(path);
    if let Some(query) = query {
        for param in query.split('&') {
            if param.is_empty() {
                continue;
            }
            match param.split_once('=') {
                Some(("baud", value)) => {
                    config.baud = value
                        .parse()
                        .map_err(|_| ConfigError::InvalidBaud(value.to_string()))?;
                }
                _ => return Err(ConfigError::UnsupportedParam(param.to_string())),
            }
        }
    }
    Ok(config)
}

fn parse_subprocess(rest: &str) -> Result<SubprocessConfig, ConfigError> {
    let mut parts = rest.split_whitespace();
    let executable = parts.next().ok_or(ConfigError::MissingExecutable)?;
    let args = parts.map(str::to_string).collect();
    Ok(SubprocessConfig::new(executable, args))
}
