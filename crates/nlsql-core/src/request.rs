//! Inbound request

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Request text must not be empty")]
    EmptyText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior turn of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A natural-language request. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    history: Vec<Turn>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema_hint: Option<String>,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Result<Self, RequestError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(RequestError::EmptyText);
        }
        Ok(Self {
            text,
            history: Vec::new(),
            schema_hint: None,
        })
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_schema_hint(mut self, schema_hint: impl Into<String>) -> Self {
        let hint = schema_hint.into();
        self.schema_hint = (!hint.trim().is_empty()).then_some(hint);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn schema_hint(&self) -> Option<&str> {
        self.schema_hint.as_deref()
    }

    /// SHA-256 of the canonical JSON form, for correlating identical requests
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("request should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_text_rejected() {
        assert_eq!(Request::new("   ").unwrap_err(), RequestError::EmptyText);
    }

    #[test]
    fn test_blank_schema_hint_is_dropped() {
        let request = Request::new("count users").unwrap().with_schema_hint("  ");
        assert_eq!(request.schema_hint(), None);
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let a = Request::new("total sales per region").unwrap();
        let b = Request::new("total sales per region").unwrap();
        let c = a.clone().with_history(vec![Turn::user("hi"), Turn::assistant("hello")]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
