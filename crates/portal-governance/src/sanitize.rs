//! Recursive sanitization of untrusted JSON input.
//!
//! Every string leaf and every object key goes through the same pipeline:
//! strip NUL bytes, trim, escape, cap the length. Escaping is done one input
//! character at a time and the cap is applied to whole escaped units, so a
//! capped string never ends inside an entity or after a lone backslash.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::config::SanitizationOptions;
use crate::error::{GovernanceError, Result};

/// Markup and injection patterns worth a warning when seen in raw input.
static SUSPICIOUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<script[^>]*>",
        r"(?i)javascript:",
        r#"(?i)on\w+\s*="#,
        r"(?i)<iframe[^>]*>",
        r#"(?i)\b(OR|AND)\b\s+['"]?\w+['"]?\s*=\s*['"]?\w+['"]?"#,
        r"(?i)\b(UNION|DROP|DELETE)\b.*\b(SELECT|TABLE|FROM)\b",
        r"--",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Whether raw input carries script or SQL injection markers.
#[must_use]
pub fn looks_malicious(input: &str) -> bool {
    SUSPICIOUS_PATTERNS.iter().any(|re| re.is_match(input))
}

fn push_html_escaped(out: &mut String, c: char) {
    match c {
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        '\'' => out.push_str("&#x27;"),
        '/' => out.push_str("&#x2F;"),
        other => out.push(other),
    }
}

fn is_sql_meta(c: char) -> bool {
    matches!(c, '\\' | '\'' | '"' | ';')
}

/// Escape `< > " ' /` as HTML entities. `&` is left alone.
#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        push_html_escaped(&mut out, c);
    }
    out
}

/// Backslash-escape `\ ' " ;`.
#[must_use]
pub fn escape_sql(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if is_sql_meta(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Remove NUL bytes.
#[must_use]
pub fn strip_null_bytes(input: &str) -> String {
    input.chars().filter(|&c| c != '\0').collect()
}

/// String and tree sanitizer.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    options: SanitizationOptions,
}

impl Sanitizer {
    /// Create a sanitizer.
    #[must_use]
    pub fn new(options: SanitizationOptions) -> Self {
        Self { options }
    }

    /// Options in effect.
    #[must_use]
    pub fn options(&self) -> &SanitizationOptions {
        &self.options
    }

    fn escape_unit(&self, c: char, unit: &mut String) {
        unit.clear();
        if self.options.escape_sql && is_sql_meta(c) {
            if self.options.escape_xss {
                unit.push('\\');
                push_html_escaped(unit, c);
            } else {
                unit.push('\\');
                unit.push(c);
            }
        } else if self.options.escape_xss {
            push_html_escaped(unit, c);
        } else {
            unit.push(c);
        }
    }

    /// Sanitize one string.
    ///
    /// Truncation keeps whole escape sequences, so the result is at most
    /// `max_string_length` characters and may be shorter when the next
    /// sequence does not fit: `"ab<<"` capped at 5 yields `"ab"`.
    #[must_use]
    pub fn sanitize_str(&self, input: &str) -> String {
        let max = self.options.max_string_length;
        let mut out = String::with_capacity(input.len().min(max));
        let mut out_chars = 0usize;
        let mut unit = String::with_capacity(8);

        let stripped = strip_null_bytes(input);
        for c in stripped.trim().chars() {
            self.escape_unit(c, &mut unit);
            let unit_chars = unit.chars().count();
            if out_chars + unit_chars > max {
                break;
            }
            out.push_str(&unit);
            out_chars += unit_chars;
        }
        out
    }

    /// Sanitize every string leaf and object key of `value`.
    ///
    /// Nesting deeper than `max_depth` containers is rejected as malformed,
    /// as is an object whose keys collide once sanitized (`"email"` and
    /// `"email "`).
    pub fn sanitize_value(&self, value: Value) -> Result<Value> {
        self.sanitize_at(value, 0)
    }

    fn sanitize_at(&self, value: Value, depth: usize) -> Result<Value> {
        match value {
            Value::String(s) => Ok(Value::String(self.sanitize_str(&s))),
            Value::Array(items) => {
                self.check_depth(depth)?;
                items
                    .into_iter()
                    .map(|item| self.sanitize_at(item, depth + 1))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
            Value::Object(map) => {
                self.check_depth(depth)?;
                let mut out = Map::with_capacity(map.len());
                for (key, item) in map {
                    let key = self.sanitize_str(&key);
                    if out.contains_key(&key) {
                        return Err(GovernanceError::malformed("Duplicate object key"));
                    }
                    let item = self.sanitize_at(item, depth + 1)?;
                    out.insert(key, item);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other),
        }
    }

    fn check_depth(&self, depth: usize) -> Result<()> {
        if depth >= self.options.max_depth {
            return Err(GovernanceError::malformed("Request nesting too deep"));
        }
        Ok(())
    }
}
