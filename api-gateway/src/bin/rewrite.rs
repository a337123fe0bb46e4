//! Rewrite Lambda - Rewrites legal text in a requested style.
//!
//! Endpoints:
//! - POST /rewrite - Rewrite text (`formal`, `simplify`, `expand`, `summarize`, `proofread`)

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::drafting::rewrite_request;
use shared::http::{error_from, error_response, json_response};
use shared::models::{RewriteRequest, RewriteResponse};
use shared::{parse_body, resolve_gemini_api_key, ApiResponse, Config, GeminiClient, GenerationBackend};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use validator::Validate;

/// Application state
struct AppState {
    gemini: GeminiClient,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let api_key = resolve_gemini_api_key(&config).await?;
        let gemini = GeminiClient::new(api_key, &config.gemini_model)?;

        Ok(Self { gemini })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    if event.method().as_str() != "POST" {
        return error_response(405, "Method not allowed");
    }

    let request: RewriteRequest = parse_body!(event.body());

    if let Err(e) = request.validate() {
        return error_from(&e.into());
    }
    if request.text.trim().is_empty() {
        return error_response(400, "text is required");
    }

    info!("Rewriting {} chars, style={:?}", request.text.chars().count(), request.style);

    let generated = match state.gemini.generate(&rewrite_request(&request)).await {
        Ok(generated) => generated,
        Err(e) => {
            error!("Rewrite failed: {}", e);
            return error_from(&e);
        }
    };

    let text = generated.text.trim().to_string();
    if text.is_empty() {
        error!("Rewrite returned no text");
        return error_response(502, "The AI service returned an empty rewrite");
    }

    json_response(200, &ApiResponse::success(RewriteResponse { text }))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);
    let state_clone = state.clone();

    run(service_fn(move |event| {
        let state = state_clone.clone();
        async move { handler(state, event).await }
    }))
    .await
}
