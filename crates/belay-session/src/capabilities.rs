//! Device capability detection.
//!
//! Exactly one batched Python expression is executed during `connect()`;
//! the result is a dict literal that this module parses into a typed,
//! immutable [`Capabilities`] record. Never re-queried after connect.

use crate::value::{decode_python_literal, Value, ValueError};

/// The single Python expression issued during capability detection. Feature
/// probes happen inside the expression itself (import attempts wrapped in
/// `try`/`except`), never as separate round trips.
pub const CAPABILITY_PROBE: &str = concat!(
    "{'impl': sys.implementation.name, ",
    "'platform': sys.platform, ",
    "'version': '.'.join(str(v) for v in sys.implementation.version), ",
    "'features': [m for m in ('os', 'io', 'machine', 'network') ",
    "if __import__('importlib').util.find_spec(m) is not None], ",
    "'mem_free': __import__('gc').mem_free(), ",
    "'raw_paste': True}",
);

/// Immutable record describing the connected device. Populated once per
/// session on first use.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub implementation: String,
    pub platform: String,
    pub version: String,
    pub features: Vec<String>,
    pub mem_free: i64,
    pub supports_raw_paste: bool,
}

impl Capabilities {
    /// A stable string identifying this device's combination of firmware
    /// implementation and platform, used as part of the cache key.
    pub fn fingerprint(&self) -> String {
        format!("{}/{}", self.implementation, self.platform)
    }

    /// Parse the dict literal the device returned for [`CAPABILITY_PROBE`],
    /// combined with the raw-paste flag the engine already learned during
    /// its own connect-time probe. The wire dict also carries a `raw_paste`
    /// entry, but the engine's own tri-state flag is authoritative.
    pub fn parse(result: &[u8], engine_raw_paste: bool) -> Result<Self, ValueError> {
        let text = std::str::from_utf8(result).map_err(|_| ValueError::NotUtf8(result.to_vec()))?;
        let value = decode_python_literal(text)?;
        let entries = match value {
            Value::Map(entries) => entries,
            other => return Err(ValueError::WrongShape { expected: "dict", actual: other }),
        };

        let mut implementation = None;
        let mut platform = None;
        let mut version = None;
        let mut features = Vec::new();
        let mut mem_free = None;

        for (key, val) in entries {
            let key = match key {
                Value::Str(s) => s,
                other => return Err(ValueError::WrongShape { expected: "str key", actual: other }),
            };
            match key.as_str() {
                "impl" => implementation = Some(expect_str(val)?),
                "platform" => platform = Some(expect_str(val)?),
                "version" => version = Some(expect_str(val)?),
                "mem_free" => mem_free = Some(expect_int(val)?),
                "features" => {
                    features = match val {
                        Value::List(items) => items.into_iter().map(expect_str).collect::<Result<_, _>>()?,
                        other => return Err(ValueError::WrongShape { expected: "list", actual: other }),
                    };
                }
                // `raw_paste` is present in the wire dict but the engine's
                // own probe is authoritative; ignored here.
                _ => {}
            }
        }

        Ok(Capabilities {
            implementation: implementation.ok_or_else(|| ValueError::Unrecognized("missing 'impl'".to_string()))?,
            platform: platform.ok_or_else(|| ValueError::Unrecognized("missing 'platform'".to_string()))?,
            version: version.unwrap_or_default(),
            features,
            mem_free: mem_free.unwrap_or(0),
            supports_raw_paste: engine_raw_paste,
        })
    }
}

fn expect_str(value: Value) -> Result<String, ValueError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(ValueError::WrongShape { expected: "str", actual: other }),
    }
}

fn expect_int(value: Value) -> Result<i64, ValueError> {
    match value {
        Value::Int(n) => Ok(n),
        other => Err(ValueError::WrongShape { expected: "int", actual: other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_dict() {
        let text = b"{'impl': 'micropython', 'platform': 'rp2', 'version': '1.22.0', 'features': ['os', 'machine'], 'mem_free': 102400, 'raw_paste': True}";
        let caps = Capabilities::parse(text, true).unwrap();
        assert_eq!(caps.implementation, "micropython");
        assert_eq!(caps.platform, "rp2");
        assert_eq!(caps.version, "1.22.0");
        assert_eq!(caps.features, vec!["os".to_string(), "machine".to_string()]);
        assert_eq!(caps.mem_free, 102400);
        assert!(caps.supports_raw_paste);
        assert_eq!(caps.fingerprint(), "micropython/rp2");
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let text = b"{'platform': 'rp2'}";
        assert!(Capabilities::parse(text, false).is_err());
    }
}
