//! Alarm endpoint: the console raising or releasing the machine stop

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use tracing::warn;

use super::{error_response, json_response, read_json};
use crate::plc::{GateError, StopCommand};
use crate::server::AppState;

/// `POST /api/alarm` body
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AlarmRequest {
    pub alarm: bool,
}

impl From<AlarmRequest> for StopCommand {
    fn from(request: AlarmRequest) -> Self {
        StopCommand::new(request.alarm)
    }
}

/// Handle `POST /api/alarm`
pub async fn handle_alarm(req: Request<Incoming>, state: &AppState) -> Response<Full<Bytes>> {
    let request: AlarmRequest = match read_json(req).await {
        Ok(request) => request,
        Err(e) => return error_response(e),
    };

    let result = state.gate.execute(request.into()).await;
    if request.alarm {
        warn!(written = result.is_ok(), "Machine stop requested by console");
    }

    alarm_response(result, state.args.ack_write_failures)
}

/// Map a write outcome to the console response.
///
/// With `ack_failures` every request is acknowledged with `OK`, the console's
/// historical contract.
pub fn alarm_response(result: Result<(), GateError>, ack_failures: bool) -> Response<Full<Bytes>> {
    match result {
        Ok(()) => json_response(StatusCode::OK, &serde_json::json!({ "status": "OK" })),
        Err(_) if ack_failures => {
            json_response(StatusCode::OK, &serde_json::json!({ "status": "OK" }))
        }
        Err(e) => {
            let status = match e {
                GateError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
                GateError::Link(_) => StatusCode::BAD_GATEWAY,
            };
            json_response(
                status,
                &serde_json::json!({ "status": "ERROR", "error": e.to_string() }),
            )
        }
    }
}
