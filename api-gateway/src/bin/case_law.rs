//! Case Law Lambda - Searches for precedent decisions.
//!
//! Endpoints:
//! - POST /case-law/search - Search precedents for a query

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::Serialize;
use shared::http::{error_from, error_response, json_response};
use shared::models::CaseLawSearchRequest;
use shared::{
    parse_body, resolve_gemini_api_key, ApiResponse, CaseLawSearch, Config, GeminiClient,
    GroundedCaseLawSearch, SearchResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use validator::Validate;

/// Search response
#[derive(Debug, Serialize)]
struct SearchResponse {
    query: String,
    count: usize,
    results: Vec<SearchResult>,
}

/// Application state
struct AppState {
    search: GroundedCaseLawSearch,
    search_timeout: Duration,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let api_key = resolve_gemini_api_key(&config).await?;
        let client = GeminiClient::new(api_key, &config.search_model)?;

        Ok(Self {
            search: GroundedCaseLawSearch::new(Arc::new(client)),
            search_timeout: config.search_timeout,
        })
    }
}

/// Query sent to the search, with keywords appended when given.
fn effective_query(request: &CaseLawSearchRequest) -> String {
    let query = request.query.trim();
    match request.keywords.as_deref().map(str::trim) {
        Some(keywords) if !keywords.is_empty() => format!("{} {}", query, keywords),
        _ => query.to_string(),
    }
}

/// Search with a deadline. Timeouts map to 504, every other failure to 502.
async fn run_search(
    search: &dyn CaseLawSearch,
    limit: Duration,
    query: &str,
) -> shared::Result<Vec<SearchResult>> {
    match timeout(limit, search.search(query)).await {
        Ok(Ok(results)) => Ok(results),
        Ok(Err(e)) => {
            error!("Case-law search failed: {}", e);
            Err(shared::Error::Upstream(format!("case-law search failed: {}", e)))
        }
        Err(_) => {
            error!("Case-law search timed out after {:?}", limit);
            Err(shared::Error::Timeout("case-law search".to_string()))
        }
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    if event.method().as_str() != "POST" {
        return error_response(405, "Method not allowed");
    }

    let request: CaseLawSearchRequest = parse_body!(event.body());

    if let Err(e) = request.validate() {
        return error_from(&e.into());
    }
    if request.query.trim().is_empty() {
        return error_response(400, "query is required");
    }

    let query = effective_query(&request);
    info!("Case-law search: {}", query);

    let results = match run_search(&state.search, state.search_timeout, &query).await {
        Ok(results) => results,
        Err(e) => return error_from(&e),
    };

    json_response(
        200,
        &ApiResponse::success(SearchResponse {
            query: request.query.trim().to_string(),
            count: results.len(),
            results,
        }),
    )
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
