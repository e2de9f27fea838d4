// Helpers shared by the framework normalizers

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::state::{FailureResult, TIMEOUT_ERROR};

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[\x1B\x{9B}][\[\]()#;?]*(?:(?:(?:[a-zA-Z\d]*(?:;[-a-zA-Z\d/#&.:=?%@~_]*)*)?\x07)|(?:(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PR-TZcf-ntqry=><~]))",
    )
    .expect("invalid ansi escape regex")
});

static ERROR_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?):").expect("invalid error prefix regex"));

/// Remove terminal color and cursor sequences
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Error class from a message such as `TimeoutError: waiting for locator`
pub fn error_subtype(message: Option<&str>) -> String {
    message
        .and_then(|m| ERROR_PREFIX.captures(m))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "Error".to_string())
}

/// Exception as reported by JavaScript runners
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeException {
    #[serde(rename = "type", alias = "name")]
    pub kind: Option<String>,
    pub message: Option<String>,
    #[serde(alias = "stack")]
    pub stack_trace: Option<String>,
}

/// Failure for an exception, `TIMEOUT_ERROR` for timeouts and `default_type` otherwise
pub fn failure_from_exception(exception: &NativeException, default_type: &str) -> FailureResult {
    let kind = if exception.kind.as_deref() == Some("TimeoutError") {
        TIMEOUT_ERROR
    } else {
        default_type
    };
    FailureResult {
        subtype: exception.kind.clone(),
        message: exception.message.clone(),
        stacktrace: exception.stack_trace.clone(),
        ..FailureResult::new(kind)
    }
}

/// Timestamps arrive either as unix milliseconds or as RFC 3339 strings
pub fn deserialize_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(millis_from_value))
}

pub fn millis_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.timestamp_millis()),
        _ => None,
    }
}

/// Value is present and not an empty string, null or false
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_ansi() {
        let colored = "\u{1b}[31mExpected\u{1b}[39m: \u{1b}[32m\"a\"\u{1b}[39m";
        assert_eq!(strip_ansi(colored), "Expected: \"a\"");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_error_subtype() {
        assert_eq!(
            error_subtype(Some("TimeoutError: locator.click: Timeout 500ms")),
            "TimeoutError"
        );
        assert_eq!(error_subtype(Some("no prefix here")), "Error");
        assert_eq!(error_subtype(None), "Error");
    }

    #[test]
    fn test_failure_from_timeout_exception() {
        let exception = NativeException {
            kind: Some("TimeoutError".into()),
            message: Some("function timed out".into()),
            stack_trace: None,
        };
        let failure = failure_from_exception(&exception, "CUCUMBER_ERROR");
        assert_eq!(failure.kind, TIMEOUT_ERROR);
        assert_eq!(failure.subtype.as_deref(), Some("TimeoutError"));

        let other = NativeException {
            kind: Some("Error".into()),
            ..exception
        };
        assert_eq!(failure_from_exception(&other, "CUCUMBER_ERROR").kind, "CUCUMBER_ERROR");
    }

    #[test]
    fn test_millis_from_value() {
        assert_eq!(millis_from_value(&json!(1500)), Some(1500));
        assert_eq!(
            millis_from_value(&json!("1970-01-01T00:00:01.250Z")),
            Some(1250)
        );
        assert_eq!(millis_from_value(&json!(true)), None);
    }

    #[test]
    fn test_is_truthy() {
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&Value::Null));
        assert!(is_truthy(&json!({"a": 1})));
        assert!(is_truthy(&json!(3)));
    }
}
