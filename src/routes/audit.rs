//! Audit endpoint: the console posting inspection events

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};

use super::{error_response, read_json, text_response};
use crate::logging::AuditRecord;
use crate::server::AppState;

/// Handle `POST /api/log`. The write happens in the background.
pub async fn handle_audit_log(req: Request<Incoming>, state: &AppState) -> Response<Full<Bytes>> {
    let record: AuditRecord = match read_json(req).await {
        Ok(record) => record,
        Err(e) => return error_response(e),
    };

    state.audit.spawn_append(record);
    text_response(StatusCode::OK, "Logged")
}
