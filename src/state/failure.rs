// Normalized error descriptor

use serde::{Deserialize, Serialize};

pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";
pub const ASSERTION_ERROR: &str = "ASSERTION_ERROR";
pub const ASSERT_ERROR: &str = "ASSERT_ERROR";
pub const GENERAL_ERROR: &str = "GENERAL_ERROR";
pub const INCOMPLETE_ERROR: &str = "INCOMPLETE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureResult {
    /// Coarse category, e.g. `TIMEOUT_ERROR` or a framework specific code
    #[serde(rename = "type")]
    pub kind: String,
    /// Native error class name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl FailureResult {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            subtype: None,
            message: None,
            stacktrace: None,
            snippet: None,
            location: None,
        }
    }

    pub fn with_message(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(kind)
        }
    }

    /// Failure attached to entities force-closed at run end
    pub fn incomplete(what: &str) -> Self {
        Self::with_message(
            INCOMPLETE_ERROR,
            format!("{} did not report completion before the run ended", what),
        )
    }
}
