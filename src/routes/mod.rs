//! HTTP routes for the gateway

pub mod alarm;
pub mod audit;
pub mod auth_routes;
pub mod camera;
pub mod health;
pub mod static_files;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::types::GatewayError;

pub use alarm::{alarm_response, handle_alarm, AlarmRequest};
pub use audit::handle_audit_log;
pub use auth_routes::{handle_login, handle_logout, LoginRequest};
pub use camera::handle_camera;
pub use health::{health_check, readiness_check, version_info};
pub use static_files::{content_type_for, serve_static};

/// Largest JSON body accepted from the console
const MAX_JSON_BODY: usize = 64 * 1024;

/// Collect and parse a JSON request body
pub async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, GatewayError> {
    let body = Limited::new(req.into_body(), MAX_JSON_BODY)
        .collect()
        .await
        .map_err(|e| GatewayError::BadRequest(format!("Failed to read body: {}", e)))?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

/// JSON response with the given status
pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Error response for a gateway error
pub fn error_response(err: GatewayError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    json_response(
        status,
        &serde_json::json!({
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": message
        }),
    )
}

/// Plain text response
pub fn text_response(status: StatusCode, text: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from_static(text.as_bytes())))
        .unwrap()
}
