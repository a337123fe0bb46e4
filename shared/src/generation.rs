//! Backend-neutral interface to a generative model.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;

use crate::models::{ChatMessage, StreamChunk, ToolInvocation};
use crate::Result;

/// Lazy, finite, non-restartable sequence of generated chunks.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

/// Declaration of a function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Everything needed for one generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub conversation: Vec<ChatMessage>,
    /// System instruction sent ahead of the conversation
    pub instruction: Option<String>,
    pub tools: Vec<ToolSchema>,
    /// Let the model ground its answer with web search
    pub grounded_search: bool,
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    /// Single-prompt request with a system instruction.
    pub fn prompt(instruction: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            conversation: vec![ChatMessage::user(prompt)],
            instruction: Some(instruction.into()),
            ..Self::default()
        }
    }
}

/// A completed, non-streamed generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generated {
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
}

/// A generative model reachable over the network.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Run the request to completion.
    async fn generate(&self, request: &GenerationRequest) -> Result<Generated>;

    /// Open a streamed generation.
    async fn stream(&self, request: &GenerationRequest) -> Result<ChunkStream>;
}
