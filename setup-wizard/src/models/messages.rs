use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Feedback attached to a step, optionally bound to one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMessage {
    /// `None` for form-level messages.
    pub field: Option<String>,
    pub severity: Severity,
    pub text: String,
}

impl StepMessage {
    pub fn info(field: Option<&str>, text: impl Into<String>) -> Self {
        Self::new(field, Severity::Info, text)
    }

    pub fn warning(field: Option<&str>, text: impl Into<String>) -> Self {
        Self::new(field, Severity::Warning, text)
    }

    pub fn error(field: Option<&str>, text: impl Into<String>) -> Self {
        Self::new(field, Severity::Error, text)
    }

    fn new(field: Option<&str>, severity: Severity, text: impl Into<String>) -> Self {
        Self {
            field: field.map(str::to_string),
            severity,
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for StepMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.field {
            Some(field) => write!(f, "[{}] {}: {}", level, field, self.text),
            None => write!(f, "[{}] {}", level, self.text),
        }
    }
}

pub fn has_errors(messages: &[StepMessage]) -> bool {
    messages.iter().any(StepMessage::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_field_when_present() {
        let m = StepMessage::error(Some("smtpPort"), "SMTP port is required");
        assert_eq!(m.to_string(), "[error] smtpPort: SMTP port is required");
        let m = StepMessage::info(None, "Connection succeeded");
        assert_eq!(m.to_string(), "[info] Connection succeeded");
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let msgs = vec![StepMessage::warning(Some("soxPath"), "sox not found")];
        assert!(!has_errors(&msgs));
        let msgs = vec![StepMessage::error(Some("soxPath"), "sox not found")];
        assert!(has_errors(&msgs));
    }
}
