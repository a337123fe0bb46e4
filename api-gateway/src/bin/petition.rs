//! Petition Lambda - Drafts court petitions.
//!
//! Endpoints:
//! - POST /petition - Draft a petition from the case details

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::drafting::petition_request;
use shared::http::{error_from, error_response, json_response};
use shared::models::{PetitionRequest, PetitionResponse};
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

    let request: PetitionRequest = parse_body!(event.body());

    if let Err(e) = request.validate() {
        return error_from(&e.into());
    }
    if request.petition_type.trim().is_empty() || request.case_summary.trim().is_empty() {
        return error_response(400, "petitionType and caseSummary are required");
    }

    info!("Drafting petition: type={}", request.petition_type);

    let generated = match state.gemini.generate(&petition_request(&request)).await {
        Ok(generated) => generated,
        Err(e) => {
            error!("Petition generation failed: {}", e);
            return error_from(&e);
        }
    };

    let petition = generated.text.trim().to_string();
    if petition.is_empty() {
        error!("Petition generation returned no text");
        return error_response(502, "The AI service returned an empty petition");
    }

    info!("Drafted petition ({} chars)", petition.chars().count());

    json_response(200, &ApiResponse::success(PetitionResponse { petition }))
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
