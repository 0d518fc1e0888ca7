//! User-facing outcome of a triggered action.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Warning,
    Danger,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Warning => f.write_str("warning"),
            Self::Danger => f.write_str("danger"),
        }
    }
}

/// Structured result returned to the calling surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    /// Keep the message until dismissed.
    pub sticky: bool,
}

impl Notification {
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message, Severity::Success, false)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message, Severity::Warning, false)
    }

    /// Errors stay on screen until dismissed.
    pub fn danger(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(title, message, Severity::Danger, true)
    }

    fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        sticky: bool,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            sticky,
        }
    }

    pub fn is_success(&self) -> bool {
        self.severity == Severity::Success
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.title, self.message)
    }
}
