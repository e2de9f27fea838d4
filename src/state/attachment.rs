// Attachments and log lines

use serde::{Deserialize, Serialize};

use crate::utils::{FileUtils, generate_id};

pub const UNKNOWN_LOG_LEVEL: &str = "-unknown-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentType {
    Screenshot,
    Video,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentSubType {
    Screenshot,
    Screencast,
    PlaywrightTrace,
    Json,
}

/// Opaque artifact reference, either a file on disk or inline content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub attachment_type: AttachmentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<AttachmentSubType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Attachment {
    pub fn from_path(
        attachment_type: AttachmentType,
        sub_type: AttachmentSubType,
        path: &str,
    ) -> Self {
        Self {
            id: generate_id(),
            attachment_type,
            sub_type: Some(sub_type),
            file_name: Some(FileUtils::file_name_from_path(path)),
            file_path: Some(path.to_string()),
            mime_type: None,
            content: None,
        }
    }

    pub fn inline(
        attachment_type: AttachmentType,
        sub_type: Option<AttachmentSubType>,
        mime_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            attachment_type,
            sub_type,
            file_name: None,
            file_path: None,
            mime_type: Some(mime_type.into()),
            content: Some(content.into()),
        }
    }
}

/// Console output captured for a case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: i64,
    pub level: String,
    pub msg: String,
    pub src: String,
}

impl LogEntry {
    pub fn new(time: i64, level: Option<&str>, msg: impl Into<String>, src: &str) -> Self {
        Self {
            time,
            level: level.unwrap_or(UNKNOWN_LOG_LEVEL).to_string(),
            msg: msg.into(),
            src: src.to_string(),
        }
    }
}
