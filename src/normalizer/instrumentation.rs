// Browser instrumentation events carried as attachments
//
// Page and locator actions become GENERAL steps named `method "selector"`,
// assertions become ASSERTION steps with their actual and expected values.

use serde::Deserialize;
use serde_json::Value;

use super::common::{NativeException, failure_from_exception};
use crate::reducer::{AttachmentAdapter, PendingAttachment};
use crate::state::{
    ASSERTION_ERROR, AssertStepExtra, Attachment, AttachmentSubType, AttachmentType, ResultStatus,
    StepExtra, StepResult, StepType,
};
use crate::time::duration_between;
use crate::utils::generate_id;

/// Media type of structured instrumentation payloads
pub const INSTRUMENTATION_MEDIA_TYPE: &str = "application/json;x-origin=cloudbeat";
pub const PLAYWRIGHT_ERROR: &str = "PLAYWRIGHT_ERROR";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentationEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    actual: Value,
    #[serde(default)]
    expected: Value,
    #[serde(default)]
    error: Option<NativeException>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    start: i64,
    #[serde(default)]
    end: i64,
}

/// Default adapter for `application/json;x-origin=cloudbeat` payloads
#[derive(Debug, Default, Clone, Copy)]
pub struct InstrumentationAdapter;

impl AttachmentAdapter for InstrumentationAdapter {
    fn to_step(&self, payload: &Value) -> Option<StepResult> {
        let event: InstrumentationEvent = serde_json::from_value(payload.clone()).ok()?;
        let (name, step_type, extra) = match event.kind.as_str() {
            "page_action" | "locator_action" => (
                format!(
                    "{} \"{}\"",
                    event.method,
                    event.selector.as_deref().unwrap_or_default()
                ),
                StepType::General,
                None,
            ),
            "assertion" => (
                event.method.replace("expect.", ""),
                StepType::Assertion,
                Some(StepExtra {
                    assert: Some(AssertStepExtra {
                        actual: event.actual.clone(),
                        expected: event.expected.clone(),
                    }),
                    ..Default::default()
                }),
            ),
            _ => return None,
        };

        let failure = event.error.as_ref().map(|error| {
            let mut failure = failure_from_exception(error, PLAYWRIGHT_ERROR);
            if step_type == StepType::Assertion {
                failure.kind = ASSERTION_ERROR.to_string();
            }
            failure
        });
        let status = if event.success {
            ResultStatus::Passed
        } else {
            ResultStatus::Failed
        };

        Some(StepResult {
            id: generate_id(),
            name,
            step_type,
            fqn: None,
            location: None,
            start_time: event.start,
            end_time: Some(event.end.max(event.start)),
            duration: Some(duration_between(event.start, event.end)),
            status: Some(status),
            failure,
            screenshot: None,
            extra,
            steps: Vec::new(),
            attachments: Vec::new(),
        })
    }
}

/// Classify a raw attachment body by media type
pub fn classify(media_type: &str, body: &str) -> Option<PendingAttachment> {
    match media_type {
        INSTRUMENTATION_MEDIA_TYPE => serde_json::from_str(body)
            .ok()
            .map(PendingAttachment::Instrumentation),
        "image/png" => Some(PendingAttachment::Screenshot(body.to_string())),
        "application/json" => Some(PendingAttachment::File(Attachment::inline(
            AttachmentType::Other,
            Some(AttachmentSubType::Json),
            media_type,
            body,
        ))),
        _ => Some(PendingAttachment::File(Attachment::inline(
            AttachmentType::Other,
            None,
            media_type,
            body,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_locator_action_step() {
        let payload = json!({
            "type": "locator_action",
            "method": "click",
            "selector": "#submit",
            "success": true,
            "start": 100,
            "end": 140
        });

        let step = InstrumentationAdapter.to_step(&payload).unwrap();
        assert_eq!(step.name, "click \"#submit\"");
        assert_eq!(step.step_type, StepType::General);
        assert_eq!(step.duration, Some(40));
        assert_eq!(step.status, Some(ResultStatus::Passed));
    }

    #[test]
    fn test_failed_assertion_step() {
        let payload = json!({
            "type": "assertion",
            "method": "expect.toHaveText",
            "actual": "Hi",
            "expected": "Hello",
            "success": false,
            "error": {"type": "Error", "message": "mismatch"},
            "start": 10,
            "end": 12
        });

        let step = InstrumentationAdapter.to_step(&payload).unwrap();
        assert_eq!(step.name, "toHaveText");
        assert_eq!(step.status, Some(ResultStatus::Failed));
        let failure = step.failure.unwrap();
        assert_eq!(failure.kind, ASSERTION_ERROR);
        assert_eq!(failure.message.as_deref(), Some("mismatch"));
        let assert = step.extra.unwrap().assert.unwrap();
        assert_eq!(assert.expected, json!("Hello"));
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        assert!(InstrumentationAdapter.to_step(&json!({"type": "navigation"})).is_none());
        assert!(InstrumentationAdapter.to_step(&json!("not an object")).is_none());
    }

    #[test]
    fn test_classify_media_types() {
        assert!(matches!(
            classify("image/png", "aGVsbG8="),
            Some(PendingAttachment::Screenshot(_))
        ));
        assert!(matches!(
            classify(INSTRUMENTATION_MEDIA_TYPE, "{\"type\":\"assertion\"}"),
            Some(PendingAttachment::Instrumentation(_))
        ));
        assert!(classify(INSTRUMENTATION_MEDIA_TYPE, "not json").is_none());
        assert!(matches!(
            classify("text/plain", "log"),
            Some(PendingAttachment::File(_))
        ));
    }
}
