//! Template substitution.
//!
//! A template is Python source text with `{name}` placeholders. Rendering
//! replaces each placeholder matching a declared parameter with that
//! value's Python literal rendering for ints/floats/bools/`None`/strings/
//! byte strings/lists/mappings — reusing
//! `belay_session::value::encode_python_literal`, the same renderer the
//! synthesized-call path in [`crate::dispatch`] uses — then checks for any
//! remaining placeholder and against a best-effort deny-list. If
//! substitution is disabled the source passes through verbatim and
//! parameters are ignored.

use std::collections::HashMap;

use belay_session::value::{encode_python_literal, Value};
use belay_session::SessionError;

/// Three example patterns forming a best-effort deny-list. Not a sandbox;
/// `DeviceBuilder::deny_list` lets a caller override it entirely.
pub fn default_deny_list() -> Vec<String> {
    vec!["os.system".to_string(), "exec(".to_string(), "__import__".to_string()]
}

#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    substitute: bool,
}

impl Template {
    /// A template whose `{name}` placeholders are substituted from the
    /// operation's declared parameters.
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into(), substitute: true }
    }

    /// A template passed through unchanged; parameters are ignored when
    /// substitution is disabled on the operation.
    pub fn verbatim(source: impl Into<String>) -> Self {
        Self { source: source.into(), substitute: false }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, params: &HashMap<String, Value>, deny_list: &[String]) -> Result<String, SessionError> {
        if !self.substitute {
            return Ok(self.source.clone());
        }
        let rendered = substitute_placeholders(&self.source, params)?;
        check_deny_list(&rendered, deny_list)?;
        Ok(rendered)
    }
}

fn substitute_placeholders(source: &str, params: &HashMap<String, Value>) -> Result<String, SessionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '{' {
            if let Some(end_offset) = chars[i + 1..].iter().position(|&c| c == '}') {
                let end = i + 1 + end_offset;
                let name: String = chars[i + 1..end].iter().collect();
                if let Some(value) = params.get(&name) {
                    out.push_str(&encode_python_literal(value));
                    i = end + 1;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    if has_placeholder(&out) {
        return Err(SessionError::UnresolvedPlaceholder);
    }
    Ok(out)
}

fn has_placeholder(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    for i in 0..chars.len() {
        if chars[i] == '{' && chars[i + 1..].iter().any(|&c| c == '}') {
            return true;
        }
    }
    false
}

fn check_deny_list(rendered: &str, deny_list: &[String]) -> Result<(), SessionError> {
    for pattern in deny_list {
        if rendered.contains(pattern.as_str()) {
            return Err(SessionError::UnsafeTemplate { pattern: pattern.clone() });
        }
    }
    Ok(())
}

/// Renders a synthesized `name(arg1, arg2, ...)` call using the same
/// value-to-Python rendering templates use, for operations with no
/// declared template.
pub fn synthesize_call(name: &str, args: &[Value]) -> String {
    let rendered: Vec<String> = args.iter().map(encode_python_literal).collect();
    format!("{name}({})", rendered.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn substitutes_declared_placeholders() {
        let template = Template::new("led.on({pin})");
        let rendered = template.render(&params(&[("pin", Value::Int(5))]), &[]).unwrap();
        assert_eq!(rendered, "led.on(5)");
    }

    #[test]
    fn string_values_are_quoted_and_escaped() {
        let template = Template::new("print({msg})");
        let rendered = template
            .render(&params(&[("msg", Value::Str("hi\nthere".to_string()))]), &[])
            .unwrap();
        assert_eq!(rendered, "print('hi\\nthere')");
    }

    #[test]
    fn unresolved_placeholder_is_an_error() {
        let template = Template::new("led.on({pin})");
        let err = template.render(&params(&[]), &[]).unwrap_err();
        assert!(matches!(err, SessionError::UnresolvedPlaceholder));
    }

    #[test]
    fn deny_list_matches_rendered_text() {
        let template = Template::new("{cmd}");
        let err = template
            .render(&params(&[("cmd", Value::Str("os.system('rm -rf /')".to_string()))]), &default_deny_list())
            .unwrap_err();
        assert!(matches!(err, SessionError::UnsafeTemplate { .. }));
    }

    #[test]
    fn verbatim_template_ignores_parameters() {
        let template = Template::verbatim("import machine; machine.reset()");
        let rendered = template.render(&HashMap::new(), &[]).unwrap();
        assert_eq!(rendered, "import machine; machine.reset()");
    }

    #[test]
    fn synthesizes_positional_call() {
        let rendered = synthesize_call("set_pin", &[Value::Int(5), Value::Bool(true)]);
        assert_eq!(rendered, "set_pin(5, True)");
    }
}
