//! Export Lambda - Converts edited documents to Word files.
//!
//! Endpoints:
//! - POST /export/docx - Render markup as a `.docx` download

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::Deserialize;
use shared::docx::{content_disposition, render_docx, sanitize_file_name};
use shared::http::{error_from, error_response, DOCX_CONTENT_TYPE};
use shared::parse_body;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Export request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportRequest {
    content: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
}

async fn handler(event: Request) -> Result<Response<Body>, Error> {
    if event.method().as_str() != "POST" {
        return error_response(405, "Method not allowed");
    }

    let request: ExportRequest = parse_body!(event.body());

    let bytes = match render_docx(request.title.as_deref(), &request.content) {
        Ok(bytes) => bytes,
        Err(e) => {
            if e.status_code() >= 500 {
                error!("Document export failed: {}", e);
            }
            return error_from(&e);
        }
    };

    let file_name = sanitize_file_name(request.file_name.as_deref().or(request.title.as_deref()));
    info!("Exported {} ({} bytes)", file_name, bytes.len());

    Ok(Response::builder()
        .status(200)
        .header("content-type", DOCX_CONTENT_TYPE)
        .header("content-disposition", content_disposition(&file_name))
        .body(Body::from(bytes))?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    run(service_fn(handler)).await
}
