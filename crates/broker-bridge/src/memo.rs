//! Recent-message memo and diagnostic attachments.

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Diagnostic payload a test framework can attach to a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub label: String,
    pub content: String,
    pub extension: String,
}

impl Attachment {
    /// Create a plain-text attachment
    pub fn text(label: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            content: content.into(),
            extension: "txt".to_string(),
        }
    }

    /// Wrap any displayable value
    pub fn for_value(value: &dyn fmt::Display, title: impl Into<String>) -> Self {
        Self::text(title, value.to_string())
    }
}

/// The most recently processed payload.
///
/// Cleared at the start of every receive and overwritten by every send, so it
/// never describes an earlier operation than the current one.
#[derive(Debug, Default)]
pub struct RecentMessageMemo {
    value: Mutex<Option<String>>,
}

impl RecentMessageMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the remembered payload
    pub fn record(&self, value: impl Into<String>) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.into());
    }

    /// Forget the remembered payload
    pub fn clear(&self) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Get the remembered payload
    pub fn get(&self) -> Option<String> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Attachments describing the remembered payload; empty when nothing is remembered
    pub fn attachments(&self) -> Vec<Attachment> {
        self.get()
            .map(|content| vec![Attachment::text("message content", content)])
            .unwrap_or_default()
    }
}
