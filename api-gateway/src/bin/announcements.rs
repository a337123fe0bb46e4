//! Announcements Lambda - Manages dashboard announcements.
//!
//! Endpoints:
//! - GET /announcements - List announcements (`?active=true` for visible ones only)
//! - POST /announcements - Create an announcement
//! - PUT /announcements/{id} - Update an announcement
//! - DELETE /announcements/{id} - Delete an announcement

use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use shared::http::{error_from, error_response, json_response, route_path};
use shared::{
    db, parse_body, AnnouncementStore, ApiResponse, Config, CreateAnnouncement, UpdateAnnouncement,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// API Gateway stage prefix
const STAGE: &str = "/api";

/// Application state
struct AppState {
    store: AnnouncementStore,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let pool = db::connect_from_config(&config).await?;

        Ok(Self {
            store: AnnouncementStore::new(pool),
        })
    }
}

fn failure(err: shared::Error) -> Result<Response<Body>, Error> {
    if err.status_code() >= 500 {
        error!("Announcement request failed: {}", err);
    }
    error_from(&err)
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let raw_path = event.uri().path();
    let path = route_path(raw_path, STAGE);
    let method = event.method().as_str();

    info!("Received request: method={}, path={} (raw: {})", method, path, raw_path);

    match (method, path) {
        ("GET", "/announcements") => {
            let params = event.query_string_parameters();
            let active_only = params
                .first("active")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false);

            match state.store.list(active_only).await {
                Ok(announcements) => json_response(200, &ApiResponse::success(announcements)),
                Err(e) => failure(e),
            }
        }

        ("POST", "/announcements") => {
            let request: CreateAnnouncement = parse_body!(event.body());
            if let Err(e) = request.check() {
                return failure(e);
            }

            match state.store.create(&request).await {
                Ok(created) => json_response(201, &ApiResponse::success(created)),
                Err(e) => failure(e),
            }
        }

        ("PUT", p) if p.starts_with("/announcements/") => {
            let Ok(id) = Uuid::parse_str(&p["/announcements/".len()..]) else {
                return error_response(400, "Invalid announcement id");
            };

            let request: UpdateAnnouncement = parse_body!(event.body());
            if let Err(e) = request.check() {
                return failure(e);
            }

            match state.store.update(id, &request).await {
                Ok(updated) => json_response(200, &ApiResponse::success(updated)),
                Err(e) => failure(e),
            }
        }

        ("DELETE", p) if p.starts_with("/announcements/") => {
            let Ok(id) = Uuid::parse_str(&p["/announcements/".len()..]) else {
                return error_response(400, "Invalid announcement id");
            };

            match state.store.delete(id).await {
                Ok(()) => json_response(
                    200,
                    &ApiResponse::success(serde_json::json!({ "deleted": id.to_string() })),
                ),
                Err(e) => failure(e),
            }
        }

        _ => error_response(404, "Not found"),
    }
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
