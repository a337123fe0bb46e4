//! Gemini REST client implementing [`GenerationBackend`].

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::generation::{ChunkStream, Generated, GenerationBackend, GenerationRequest};
use crate::models::{ChatMessage, Role, StreamChunk, ToolInvocation};
use crate::{Error, Result};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Whole-call limit for `generateContent`; streams are bounded per chunk by the caller.
const GENERATE_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    #[serde(skip_serializing_if = "Option::is_none")]
    function_declarations: Option<Vec<GeminiFunctionDeclaration>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    google_search: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiResponse {
    /// Flatten the first candidate into text and function calls.
    fn into_chunk(self) -> Result<StreamChunk> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(Error::Upstream(format!("Prompt blocked: {}", reason)));
        }

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        if let Some(candidate) = self.candidates.into_iter().next() {
            if let Some(reason) = candidate.finish_reason.as_deref() {
                if reason != "STOP" {
                    debug!("Gemini finish reason: {}", reason);
                }
            }
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(t) = part.text {
                    text.push_str(&t);
                }
                if let Some(call) = part.function_call {
                    tool_calls.push(ToolInvocation::new(call.name, call.args.unwrap_or_default()));
                }
            }
        }

        Ok(StreamChunk {
            text: if text.is_empty() { None } else { Some(text) },
            tool_calls,
        })
    }
}

fn to_content(message: &ChatMessage) -> GeminiContent {
    let mut parts = Vec::with_capacity(message.attachments.len() + 1);
    for attachment in &message.attachments {
        parts.push(GeminiPart {
            text: None,
            inline_data: Some(GeminiInlineData {
                mime_type: attachment.mime_type.clone(),
                data: attachment.data.trim().to_string(),
            }),
        });
    }
    if !message.text.is_empty() || parts.is_empty() {
        parts.push(GeminiPart {
            text: Some(message.text.clone()),
            inline_data: None,
        });
    }

    let role = match message.role {
        Role::User => "user",
        Role::Model => "model",
    };

    GeminiContent {
        role: Some(role.to_string()),
        parts,
    }
}

fn build_request(request: &GenerationRequest) -> GeminiRequest {
    let mut tools = Vec::new();
    if !request.tools.is_empty() {
        tools.push(GeminiTool {
            function_declarations: Some(
                request
                    .tools
                    .iter()
                    .map(|t| GeminiFunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    })
                    .collect(),
            ),
            google_search: None,
        });
    }
    if request.grounded_search {
        tools.push(GeminiTool {
            function_declarations: None,
            google_search: Some(Map::new()),
        });
    }

    GeminiRequest {
        contents: request.conversation.iter().map(to_content).collect(),
        system_instruction: request.instruction.as_ref().map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: Some(text.clone()),
                inline_data: None,
            }],
        }),
        tools,
        generation_config: request
            .temperature
            .map(|temperature| GenerationConfig {
                temperature: Some(temperature),
            }),
    }
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes are buffered until a blank line completes an event; the joined
/// `data:` lines of each event are returned in order.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
    ready: std::collections::VecDeque<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the response body.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.handle_line(line.trim_end_matches(['\r', '\n']));
        }
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.handle_line(line.trim_end_matches('\r'));
        }
        self.dispatch();
    }

    /// Next complete event payload, if any.
    pub fn next_event(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    fn handle_line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // Comments, event names and ids carry nothing we use.
    }

    fn dispatch(&mut self) {
        if !self.data.is_empty() {
            let payload = self.data.join("\n");
            self.data.clear();
            self.ready.push_back(payload);
        }
    }
}

/// Decode one SSE payload from `streamGenerateContent`.
pub fn parse_stream_event(payload: &str) -> Result<StreamChunk> {
    let response: GeminiResponse = serde_json::from_str(payload)
        .map_err(|e| Error::Upstream(format!("Malformed stream event: {}", e)))?;
    response.into_chunk()
}

/// Google Gemini client using API-key authentication.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    /// Create a new client for the given model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    /// Same credentials and HTTP client, different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }

    fn request(&self, url: &str, body: &GeminiRequest, limit: Option<Duration>) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body);
        match limit {
            Some(limit) => builder.timeout(limit),
            None => builder,
        }
    }

    async fn post(&self, url: &str, body: &GeminiRequest, limit: Option<Duration>) -> Result<reqwest::Response> {
        let response = self
            .request(url, body, limit)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini HTTP request failed: {}", e);
                Error::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Gemini API error {}: {}", status, body);
            return Err(Error::Upstream(format!("Gemini API error {}", status)));
        }

        Ok(response)
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generated> {
        let body = build_request(request);
        info!(
            "Gemini generate: model={}, tools={}, grounded={}",
            self.model,
            request.tools.len(),
            request.grounded_search
        );

        let response = self
            .post(
                &self.url("generateContent"),
                &body,
                Some(Duration::from_secs(GENERATE_TIMEOUT_SECS)),
            )
            .await?;
        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("Failed to parse Gemini response: {}", e)))?;

        let chunk = parsed.into_chunk()?;
        Ok(Generated {
            text: chunk.text.unwrap_or_default(),
            tool_calls: chunk.tool_calls,
        })
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<ChunkStream> {
        let body = build_request(request);
        info!(
            "Gemini stream: model={}, messages={}, tools={}",
            self.model,
            request.conversation.len(),
            request.tools.len()
        );

        let url = format!("{}?alt=sse", self.url("streamGenerateContent"));
        let response = self.post(&url, &body, None).await?;

        let state = (response.bytes_stream().boxed(), SseDecoder::new(), false);
        let stream = futures::stream::unfold(state, |(mut body, mut decoder, mut done)| async move {
            loop {
                if let Some(payload) = decoder.next_event() {
                    let item = parse_stream_event(&payload);
                    return Some((item, (body, decoder, done)));
                }
                if done {
                    return None;
                }
                match body.next().await {
                    Some(Ok(bytes)) => decoder.push(&bytes),
                    Some(Err(e)) => {
                        warn!("Gemini stream interrupted: {}", e);
                        return Some((Err(Error::from(e)), (body, SseDecoder::new(), true)));
                    }
                    None => {
                        decoder.finish();
                        done = true;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
