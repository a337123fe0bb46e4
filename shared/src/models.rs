//! Shared data models.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::{Error, Result};

/// Largest attachment accepted after base64 decoding.
pub const MAX_ATTACHMENT_BYTES: usize = 20 * 1024 * 1024;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// File sent along with a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttachment {
    pub mime_type: String,
    /// Base64-encoded file contents
    pub data: String,
}

impl FileAttachment {
    /// Check the MIME type is present and the payload decodes within limits.
    pub fn validate_payload(&self) -> Result<()> {
        if self.mime_type.trim().is_empty() {
            return Err(Error::Validation("Attachment mimeType is required".to_string()));
        }

        let decoded = STANDARD
            .decode(self.data.trim())
            .map_err(|e| Error::Validation(format!("Attachment is not valid base64: {}", e)))?;

        if decoded.len() > MAX_ATTACHMENT_BYTES {
            return Err(Error::Validation(format!(
                "Attachment exceeds {} bytes",
                MAX_ATTACHMENT_BYTES
            )));
        }

        Ok(())
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<FileAttachment>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

/// A function call the model embedded in its output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// String argument, or `None` when missing or not a string.
    pub fn string_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }
}

/// One incremental unit of a streamed generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(invocation: ToolInvocation) -> Self {
        Self {
            text: None,
            tool_calls: vec![invocation],
        }
    }
}

/// Chat request payload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[validate(length(min = 1))]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub case_summary: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub research_summary: Option<String>,
}

impl ChatRequest {
    /// Field checks plus per-attachment payload checks.
    pub fn validate_all(&self) -> Result<()> {
        self.validate()?;

        if self
            .messages
            .iter()
            .all(|m| m.text.trim().is_empty() && m.attachments.is_empty())
        {
            return Err(Error::Validation("Conversation has no content".to_string()));
        }

        for attachment in self.messages.iter().flat_map(|m| &m.attachments) {
            attachment.validate_payload()?;
        }

        Ok(())
    }
}

/// Petition drafting request payload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PetitionRequest {
    #[validate(length(min = 1))]
    pub petition_type: String,
    #[validate(length(min = 1))]
    pub case_summary: String,
    #[serde(default)]
    pub court: Option<String>,
    #[serde(default)]
    pub parties: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub research: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Petition drafting response payload.
#[derive(Debug, Serialize)]
pub struct PetitionResponse {
    pub petition: String,
}

/// Case-law search request payload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CaseLawSearchRequest {
    #[validate(length(min = 1))]
    pub query: String,
    #[serde(default)]
    pub keywords: Option<String>,
}

/// Rewrite request payload.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RewriteRequest {
    #[validate(length(min = 1))]
    pub text: String,
    #[serde(default)]
    pub style: RewriteStyle,
}

/// Target register for a rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteStyle {
    #[default]
    Formal,
    Simplify,
    Expand,
    Summarize,
    Proofread,
}

/// Rewrite response payload.
#[derive(Debug, Serialize)]
pub struct RewriteResponse {
    pub text: String,
}
