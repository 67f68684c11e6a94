//! Code-to-message lookup for server-signaled errors.

use serde::Deserialize;
use serde_json::Value;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorCode {
    pub code: i64,
    pub message: String,
}

/// Read-only error catalog for one configured language.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorCatalog {
    pub language: String,

    #[serde(default)]
    pub codes: Vec<ErrorCode>,

    /// Codes for which the server did not consume a sequence number.
    #[serde(default)]
    pub uncounted: Vec<i64>,
}

impl Default for ErrorCatalog {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            codes: Vec::new(),
            uncounted: Vec::new(),
        }
    }
}

impl ErrorCatalog {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            ..Default::default()
        }
    }

    /// Add an entry.
    pub fn with_code(mut self, code: i64, message: impl Into<String>) -> Self {
        self.codes.push(ErrorCode {
            code,
            message: message.into(),
        });
        self
    }

    /// Mark a code as one the server does not count against the sequence.
    pub fn with_uncounted(mut self, code: i64) -> Self {
        self.uncounted.push(code);
        self
    }

    /// Catalog text for `code`, if any.
    pub fn message(&self, code: i64) -> Option<&str> {
        self.codes
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| entry.message.as_str())
    }

    /// Text for a code as carried on the wire, falling back to the raw value.
    pub fn describe(&self, code: &Value) -> String {
        if let Some(text) = code_number(code).and_then(|n| self.message(n)) {
            return text.to_string();
        }
        match code {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_uncounted(&self, code: &Value) -> bool {
        code_number(code).is_some_and(|n| self.uncounted.contains(&n))
    }
}

/// Numeric value of a wire code, accepting numbers and numeric strings.
pub(crate) fn code_number(code: &Value) -> Option<i64> {
    match code {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
