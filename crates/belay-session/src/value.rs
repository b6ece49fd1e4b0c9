//! Python literal rendering and parsing.
//!
//! `encode_python_literal` is used by template substitution to turn a
//! declared parameter into Python source text; `decode_python_literal`
//! parses a device's result section back into a [`Value`]. Together they
//! form a round trip:
//! `encode_python_literal(decode_python_literal(x)) == x`.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValueError {
    #[error("empty result where a value was expected")]
    Empty,

    #[error("unrecognized literal: {0:?}")]
    Unrecognized(String),

    #[error("unterminated string literal: {0:?}")]
    Unterminated(String),

    #[error("invalid escape sequence \\{0} in literal")]
    InvalidEscape(char),

    #[error("not valid UTF-8: {0:?}")]
    NotUtf8(Vec<u8>),

    #[error("expected a {expected} value, got {actual:?}")]
    WrongShape { expected: &'static str, actual: Value },
}

/// A Python value, restricted to the shapes this core renders or parses:
/// integers, floats, booleans, `None`, strings, byte strings, homogeneous
/// lists, and key-value mappings.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_python_literal(self))
    }
}

/// Render a [`Value`] as Python source text. This is the only place the
/// crate generates Python source from a value.
pub fn encode_python_literal(value: &Value) -> String {
    match value {
        Value::Int(n) => n.to_string(),
        Value::Float(x) => encode_float(*x),
        Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        Value::None => "None".to_string(),
        Value::Str(s) => encode_quoted(s.as_bytes(), '\''),
        Value::Bytes(bytes) => format!("b{}", encode_quoted(bytes, '\'')),
        Value::List(items) => {
            let rendered: Vec<String> = items.iter().map(encode_python_literal).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Map(entries) => {
            let rendered: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", encode_python_literal(k), encode_python_literal(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
    }
}

fn encode_float(x: f64) -> String {
    if x.is_nan() {
        return "float('nan')".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "float('inf')".to_string() } else { "float('-inf')".to_string() };
    }
    let rendered = format!("{x}");
    if rendered.contains(['.', 'e', 'E']) {
        rendered
    } else {
        format!("{rendered}.0")
    }
}

/// Escape bytes into a quoted Python literal body (without the leading `b`
/// for byte strings — callers prepend that themselves).
fn encode_quoted(bytes: &[u8], quote: char) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push(quote);
    for &byte in bytes {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\'' if quote == '\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push(quote);
    out
}

/// Parse a device result section (already known to be UTF-8-ish Python
/// source — decoding raw bytes to UTF-8 is a caller concern upstream of
/// this parser) into a [`Value`].
pub fn decode_python_literal(text: &str) -> Result<Value, ValueError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValueError::Empty);
    }
    let (value, rest) = parse_value(trimmed)?;
    if !rest.trim().is_empty() {
        return Err(ValueError::Unrecognized(trimmed.to_string()));
    }
    Ok(value)
}

/// Parse one value from the front of `s`, returning the value and the
/// unconsumed remainder (used recursively for list/map elements).
fn parse_value(s: &str) -> Result<(Value, &str), ValueError> {
    let s = s.trim_start();
    if let Some(rest) = s.strip_prefix("None") {
        return Ok((Value::None, rest));
    }
    if let Some(rest) = s.strip_prefix("True") {
        return Ok((Value::Bool(true), rest));
    }
    if let Some(rest) = s.strip_prefix("False") {
        return Ok((Value::Bool(false), rest));
    }
    if let Some(rest) = s.strip_prefix("b'").or_else(|| s.strip_prefix("b\"")) {
        let quote = s.as_bytes()[1] as char;
        let (bytes, rest) = parse_quoted_bytes(rest, quote)?;
        return Ok((Value::Bytes(bytes), rest));
    }
    if s.starts_with('\'') || s.starts_with('"') {
        let quote = s.chars().next().unwrap();
        let (bytes, rest) = parse_quoted_bytes(&s[1..], quote)?;
        let text = String::from_utf8(bytes).map_err(|e| ValueError::NotUtf8(e.into_bytes()))?;
        return Ok((Value::Str(text), rest));
    }
    if let Some(rest) = s.strip_prefix('[') {
        return parse_sequence(rest, ']').map(|(items, rest)| (Value::List(items), rest));
    }
    if let Some(rest) = s.strip_prefix('{') {
        return parse_mapping(rest);
    }
    parse_number(s)
}

fn parse_quoted_bytes(s: &str, quote: char) -> Result<(Vec<u8>, &str), ValueError> {
    let mut out = Vec::new();
    let mut chars = s.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if ch == quote {
            return Ok((out, &s[idx + ch.len_utf8()..]));
        }
        if ch == '\\' {
            let (_, escape) = chars.next().ok_or_else(|| ValueError::Unterminated(s.to_string()))?;
            match escape {
                '\\' => out.push(b'\\'),
                '\'' => out.push(b'\''),
                '"' => out.push(b'"'),
                'n' => out.push(b'\n'),
                't' => out.push(b'\t'),
                'r' => out.push(b'\r'),
                'x' => {
                    let hex: String = (0..2)
                        .filter_map(|_| chars.next().map(|(_, c)| c))
                        .collect();
                    let byte = u8::from_str_radix(&hex, 16).map_err(|_| ValueError::InvalidEscape('x'))?;
                    out.push(byte);
                }
                other => return Err(ValueError::InvalidEscape(other)),
            }
            continue;
        }
        let mut buf = [0u8; 4];
        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
    }
    Err(ValueError::Unterminated(s.to_string()))
}

fn parse_number(s: &str) -> Result<(Value, &str), ValueError> {
    let bytes = s.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
        end += 1;
    }
    let mut saw_digit = false;
    let mut is_float = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => {
                saw_digit = true;
                end += 1;
            }
            b'.' | b'e' | b'E' if saw_digit => {
                is_float = true;
                end += 1;
            }
            b'-' | b'+' if is_float && matches!(bytes[end - 1], b'e' | b'E') => {
                end += 1;
            }
            _ => break,
        }
    }
    if !saw_digit {
        return Err(ValueError::Unrecognized(s.to_string()));
    }
    let (token, rest) = s.split_at(end);
    if is_float {
        let x: f64 = token.parse().map_err(|_| ValueError::Unrecognized(token.to_string()))?;
        Ok((Value::Float(x), rest))
    } else {
        let n: i64 = token.parse().map_err(|_| ValueError::Unrecognized(token.to_string()))?;
        Ok((Value::Int(n), rest))
    }
}

fn parse_sequence(s: &str, close: char) -> Result<(Vec<Value>, &str), ValueError> {
    let mut items = Vec::new();
    let mut rest = s.trim_start();
    if let Some(after) = rest.strip_prefix(close) {
        return Ok((items, after));
    }
    loop {
        let (value, after) = parse_value(rest)?;
        items.push(value);
        rest = after.trim_start();
        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma.trim_start();
            if let Some(after_close) = rest.strip_prefix(close) {
                return Ok((items, after_close));
            }
            continue;
        }
        if let Some(after_close) = rest.strip_prefix(close) {
            return Ok((items, after_close));
        }
        return Err(ValueError::Unrecognized(rest.to_string()));
    }
}

fn parse_mapping(s: &str) -> Result<(Value, &str), ValueError> {
    let mut entries = Vec::new();
    let mut rest = s.trim_start();
    if let Some(after) = rest.strip_prefix('}') {
        return Ok((Value::Map(entries), after));
    }
    loop {
        let (key, after_key) = parse_value(rest)?;
        let after_key = after_key.trim_start();
        let after_colon = after_key
            .strip_prefix(':')
            .ok_or_else(|| ValueError::Unrecognized(after_key.to_string()))?;
        let (value, after_value) = parse_value(after_colon)?;
        entries.push((key, value));
        rest = after_value.trim_start();
        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma.trim_start();
            if let Some(after_close) = rest.strip_prefix('}') {
                return Ok((Value::Map(entries), after_close));
            }
            continue;
        }
        if let Some(after_close) = rest.strip_prefix('}') {
            return Ok((Value::Map(entries), after_close));
        }
        return Err(ValueError::Unrecognized(rest.to_string()));
    }
}

/// Raw bytes, passed through `execute_typed::<RawBytes>` with no literal
/// parsing at all — the raw-bytes shape alongside the parsed ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBytes(pub Vec<u8>);

/// Implemented for every shape `execute_typed<T>` can produce.
pub trait FromResultBytes: Sized {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ValueError>;
}

impl FromResultBytes for Value {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ValueError::NotUtf8(bytes.to_vec()))?;
        decode_python_literal(text)
    }
}

impl FromResultBytes for RawBytes {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        Ok(RawBytes(bytes.to_vec()))
    }
}

impl FromResultBytes for i64 {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        match Value::from_result_bytes(bytes)? {
            Value::Int(n) => Ok(n),
            other => Err(ValueError::WrongShape { expected: "int", actual: other }),
        }
    }
}

impl FromResultBytes for f64 {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        match Value::from_result_bytes(bytes)? {
            Value::Float(x) => Ok(x),
            Value::Int(n) => Ok(n as f64),
            other => Err(ValueError::WrongShape { expected: "float", actual: other }),
        }
    }
}

impl FromResultBytes for bool {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        match Value::from_result_bytes(bytes)? {
            Value::Bool(b) => Ok(b),
            other => Err(ValueError::WrongShape { expected: "bool", actual: other }),
        }
    }
}

impl FromResultBytes for String {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        match Value::from_result_bytes(bytes)? {
            Value::Str(s) => Ok(s),
            other => Err(ValueError::WrongShape { expected: "str", actual: other }),
        }
    }
}

impl FromResultBytes for Vec<u8> {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        match Value::from_result_bytes(bytes)? {
            Value::Bytes(b) => Ok(b),
            other => Err(ValueError::WrongShape { expected: "bytes", actual: other }),
        }
    }
}

impl FromResultBytes for Vec<String> {
    fn from_result_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        match Value::from_result_bytes(bytes)? {
            Value::List(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Str(s) => Ok(s),
                    other => Err(ValueError::WrongShape { expected: "str", actual: other }),
                })
                .collect(),
            other => Err(ValueError::WrongShape { expected: "list", actual: other }),
        }
    }
}
