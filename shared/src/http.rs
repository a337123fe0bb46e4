//! HTTP helpers for Lambda functions.

use lambda_http::{Body, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Error;

/// Content type of streamed chat output.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson; charset=utf-8";

/// Content type of exported Word documents.
pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Standard API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Create a JSON response with the given status code and data.
pub fn json_response<T: Serialize>(status: u16, data: &T) -> Result<Response<Body>, lambda_http::Error> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(data)?))?)
}

/// Create an error response with the given status code and message.
pub fn error_response(status: u16, message: impl Into<String>) -> Result<Response<Body>, lambda_http::Error> {
    json_response(status, &ApiResponse::<()>::error(message))
}

/// Message shown to callers; server-side details stay in the logs.
pub fn public_message(err: &Error) -> String {
    match err {
        Error::Validation(msg) | Error::NotFound(msg) => msg.clone(),
        Error::Upstream(_) => "The AI service is unavailable, please try again".to_string(),
        Error::Timeout(_) => "The AI service did not respond in time".to_string(),
        _ => "Internal server error".to_string(),
    }
}

/// Map a library error onto a JSON error response.
pub fn error_from(err: &Error) -> Result<Response<Body>, lambda_http::Error> {
    error_response(err.status_code(), public_message(err))
}

/// Parse request body as JSON, returning a 400 response on failure.
///
/// Returns `Ok(Ok(T))` on successful parse, `Ok(Err(Response))` on parse error (400),
/// or `Err(lambda_http::Error)` on serialization failure.
pub fn parse_json_body<T: DeserializeOwned>(body: &Body) -> Result<Result<T, Response<Body>>, lambda_http::Error> {
    match serde_json::from_slice(body.as_ref()) {
        Ok(parsed) => Ok(Ok(parsed)),
        Err(e) => {
            let response = error_response(400, format!("Invalid request body: {}", e))?;
            Ok(Err(response))
        }
    }
}

/// Macro to parse request body, returning early with 400 on parse error.
///
/// Usage:
/// ```ignore
/// let request: MyRequest = parse_body!(event.body());
/// ```
#[macro_export]
macro_rules! parse_body {
    ($body:expr) => {
        match shared::http::parse_json_body($body)? {
            Ok(parsed) => parsed,
            Err(response) => return Ok(response),
        }
    };
}

/// Strip the API Gateway stage prefix from a request path.
pub fn route_path<'a>(raw_path: &'a str, stage: &str) -> &'a str {
    let path = raw_path.strip_prefix(stage).unwrap_or(raw_path);
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_error_response_shape() {
        let response = error_response(400, "bad").unwrap();
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = serde_json::from_slice(response.body().as_ref()).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "bad");
        assert!(body.get("data").is_none());
    }

    #[test]
    fn test_error_from_hides_internal_details() {
        let response = error_from(&Error::Config("DATABASE_SECRET_ARN not set".into())).unwrap();
        assert_eq!(response.status(), 500);
        let body: serde_json::Value = serde_json::from_slice(response.body().as_ref()).unwrap();
        assert_eq!(body["error"], "Internal server error");

        let response = error_from(&Error::Validation("title is required".into())).unwrap();
        assert_eq!(response.status(), 400);
    }

    #[test]
    fn test_parse_json_body() {
        #[derive(Deserialize)]
        struct Payload {
            text: String,
        }

        let parsed: Result<Payload, _> = parse_json_body(&Body::from(r#"{"text":"dilekçe"}"#)).unwrap();
        assert_eq!(parsed.ok().map(|p| p.text).as_deref(), Some("dilekçe"));

        let parsed: Result<Payload, _> = parse_json_body(&Body::from("{")).unwrap();
        assert_eq!(parsed.err().map(|r| r.status().as_u16()), Some(400));
    }

    #[test]
    fn test_route_path() {
        assert_eq!(route_path("/api/announcements/", "/api"), "/announcements");
        assert_eq!(route_path("/announcements/42", "/api"), "/announcements/42");
        assert_eq!(route_path("/api", "/api"), "/");
    }
}
