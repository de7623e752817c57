//! Health check endpoints
//!
//! - /health - Liveness probe, always 200 while the process serves requests
//! - /ready - Readiness probe, 200 only while the controller link is `Ready`
//! - /version - Build information
//!
//! Both probes report the controller link so operators can see an outage
//! without opening the console.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::plc::{Endpoint, LinkState};
use crate::server::AppState;

/// Health response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall health status (true if service is running)
    pub healthy: bool,
    /// 'online' with a ready controller link, 'degraded' otherwise
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since the gateway started
    pub uptime: u64,
    pub timestamp: String,
    /// Operating mode
    pub mode: &'static str,
    pub plc: PlcHealth,
}

/// Controller link details
#[derive(Serialize)]
pub struct PlcHealth {
    pub state: LinkState,
    pub connected: bool,
    pub endpoint: Endpoint,
    /// Connection attempts since startup
    pub attempts: u64,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let link_state = state.gate.link_state();
    let connected = link_state == LinkState::Ready;

    HealthResponse {
        healthy: true,
        status: if connected { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        plc: PlcHealth {
            state: link_state,
            connected,
            endpoint: state.gate.endpoint().clone(),
            attempts: state.gate.connection_attempts(),
        },
    }
}

fn health_json(status: StatusCode, response: &HealthResponse) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(response)
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Handle liveness probe (/health)
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    health_json(StatusCode::OK, &build_health_response(state))
}

/// Handle readiness probe (/ready)
pub fn readiness_check(state: &AppState) -> Response<Full<Bytes>> {
    let response = build_health_response(state);
    let status = if response.plc.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    health_json(status, &response)
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "vision-gateway",
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"version":"unknown","commit":"unknown"}"#.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
