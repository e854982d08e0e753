//! Tracing conventions for stored-procedure calls.
//!
//! Request and response records are emitted on a dedicated target,
//! [`REQUEST_LOG_TARGET`], so subscribers can route them away from general
//! application logs:
//!
//! ```rust,ignore
//! use tracing_subscriber::{filter::Targets, prelude::*};
//!
//! let requests = Targets::new().with_target(sproc_client::instrumentation::REQUEST_LOG_TARGET, Level::INFO);
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer().json().with_filter(requests))
//!     .init();
//! ```
//!
//! Both records of one call carry the same `correlation_id` field.

use serde_json::Value;

use crate::mapper::NamedParams;

/// Target for the paired request/response records.
pub const REQUEST_LOG_TARGET: &str = "sproc::requests";

/// Span names for procedure operations.
pub mod span_names {
    /// Span covering one facade `execute` call.
    pub const EXECUTE: &str = "sproc.execute";
    /// Span covering one invoker attempt.
    pub const CALL: &str = "sproc.call";
}

/// Field names used on request/response records and spans.
pub mod fields {
    /// Correlation id shared by a request and its response.
    pub const CORRELATION_ID: &str = "correlation_id";
    /// Procedure identifier.
    pub const PROCEDURE: &str = "procedure";
    /// `"request"` or `"response"`.
    pub const DIRECTION: &str = "direction";
    /// Pool the call ran on.
    pub const CONNECTION: &str = "connection";
    /// 1-based attempt number.
    pub const ATTEMPT: &str = "attempt";
    /// Error classification.
    pub const ERROR_KIND: &str = "error.kind";
}

/// Masking and truncation applied to parameter values before logging.
#[derive(Debug, Clone)]
pub struct LogRedaction {
    /// Parameter keys whose values are replaced.
    ///
    /// Keys are split into words at `camelCase` humps and at `_`, `-` or `.`;
    /// an entry matches when its words appear as a contiguous run in the
    /// parameter key, ignoring case. `"password"` masks `userPassword` and
    /// `password_hash` but `"pin"` leaves `opinion` alone.
    pub sensitive_keys: Vec<String>,
    /// Maximum length of a logged string value.
    pub max_value_length: usize,
    /// Replacement for masked values.
    pub placeholder: String,
}

impl Default for LogRedaction {
    fn default() -> Self {
        Self {
            sensitive_keys: ["password", "pwd", "secret", "token", "pin"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_value_length: 256,
            placeholder: "***".to_string(),
        }
    }
}

impl LogRedaction {
    /// A configuration that logs values unchanged.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sensitive_keys: Vec::new(),
            max_value_length: usize::MAX,
            placeholder: String::new(),
        }
    }

    /// Add keys to mask.
    #[must_use]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    fn is_sensitive(&self, key: &str) -> bool {
        let words = key_words(key);
        self.sensitive_keys.iter().any(|sensitive| {
            let needle = key_words(sensitive);
            !needle.is_empty() && words.windows(needle.len()).any(|run| run == needle.as_slice())
        })
    }

    /// Copy of `params` safe to write to the log channel.
    #[must_use]
    pub fn redact(&self, params: &NamedParams) -> Value {
        let redacted = params
            .iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive(key) {
                    Value::String(self.placeholder.clone())
                } else {
                    self.truncate_value(value)
                };
                (key.clone(), value)
            })
            .collect();
        Value::Object(redacted)
    }

    fn truncate_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(truncate_string(s, self.max_value_length)),
            other => other.clone(),
        }
    }
}

/// Lowercased words of a parameter key.
fn key_words(key: &str) -> Vec<String> {
    let chars: Vec<char> = key.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            // `userPin`, `v2Token`, and the `C` of `PINCode`.
            if prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_is_lower) {
                words.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Truncate a string to at most `max_len` bytes, respecting char boundaries.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut cut = max_len.saturating_sub(3);
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}
