//! Chat Lambda - Streams assistant replies with case-law research.
//!
//! Endpoints:
//! - POST /chat - Stream a reply as NDJSON records (`chunk`, `search_results`, `error`)

use lambda_http::{run_with_streaming_response, service_fn, Error, Request, Response};
use lambda_runtime::streaming::{channel, Body};
use shared::http::{public_message, ApiResponse, NDJSON_CONTENT_TYPE};
use shared::{
    resolve_gemini_api_key, ChatRequest, Config, GeminiClient, GroundedCaseLawSearch, Orchestrator,
    OrchestratorOptions,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state
struct AppState {
    orchestrator: Orchestrator,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let api_key = resolve_gemini_api_key(&config).await?;

        let chat_client = GeminiClient::new(api_key, &config.gemini_model)?;
        let search_client = chat_client.with_model(&config.search_model);
        let search = GroundedCaseLawSearch::new(Arc::new(search_client));

        info!(
            "Chat configured: model={}, search_model={}, chunk_timeout={:?}, search_timeout={:?}",
            config.gemini_model, config.search_model, config.chunk_timeout, config.search_timeout
        );

        let orchestrator = Orchestrator::new(
            Arc::new(chat_client),
            Arc::new(search),
            OrchestratorOptions::from(&config),
        );

        Ok(Self { orchestrator })
    }
}

/// Plain JSON error, sent before any stream output exists.
fn json_error(status: u16, message: impl Into<String>) -> Result<Response<Body>, Error> {
    let body = serde_json::to_string(&ApiResponse::<()>::error(message))?;
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))?)
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let method = event.method().as_str();
    if method == "OPTIONS" {
        return Ok(Response::builder().status(204).body(Body::from(String::new()))?);
    }
    if method != "POST" {
        return json_error(405, "Method not allowed");
    }

    let request: ChatRequest = match serde_json::from_slice(event.body().as_ref()) {
        Ok(parsed) => parsed,
        Err(e) => return json_error(400, format!("Invalid request body: {}", e)),
    };

    if let Err(e) = request.validate_all() {
        warn!("Rejected chat request: {}", e);
        return json_error(e.status_code(), public_message(&e));
    }

    info!("Chat request with {} messages", request.messages.len());

    let session = match state.orchestrator.open(&request).await {
        Ok(session) => session,
        Err(e) => {
            error!("Could not start chat stream: {}", e);
            return json_error(e.status_code(), public_message(&e));
        }
    };

    let (mut tx, rx) = channel();
    tokio::spawn(async move {
        let summary = session.run(&mut tx).await;
        info!(
            "Chat finished: outcome={:?}, chunks={}, searches={}",
            summary.outcome, summary.chunks_forwarded, summary.searches_executed
        );
    });

    Ok(Response::builder()
        .status(200)
        .header("content-type", NDJSON_CONTENT_TYPE)
        .header("cache-control", "no-cache")
        .body(rx)?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);
    let state_clone = state.clone();

    run_with_streaming_response(service_fn(move |event| {
        let state = state_clone.clone();
        async move { handler(state, event).await }
    }))
    .await
}
