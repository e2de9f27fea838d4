// Out-of-band attachments and their targets

use serde_json::Value;

use crate::state::{Attachment, StepResult};

/// Where an attachment should end up
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttachmentTarget {
    /// A step, identified by its native key within a case attempt
    Step { case: String, step: String },
    /// A case attempt
    Case(String),
}

/// Attachment waiting for its owner
#[derive(Debug, Clone, PartialEq)]
pub enum PendingAttachment {
    /// Stored as-is on the owner
    File(Attachment),
    /// Screenshot content or path, becomes the owning step's screenshot
    Screenshot(String),
    /// Structured instrumentation payload, converted into a descriptive step
    Instrumentation(Value),
}

/// Converts instrumentation payloads into steps.
pub trait AttachmentAdapter: Send + Sync {
    /// `None` when the payload is not a recognised event shape
    fn to_step(&self, payload: &Value) -> Option<StepResult>;
}

/// Adapter that never produces steps
pub struct IgnoreInstrumentation;

impl AttachmentAdapter for IgnoreInstrumentation {
    fn to_step(&self, _payload: &Value) -> Option<StepResult> {
        None
    }
}
