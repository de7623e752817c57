//! Console login and logout

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{LOCATION, SET_COOKIE};
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use tracing::{info, warn};

use super::{error_response, read_json, text_response};
use crate::auth::{clear_session_cookie, session_cookie};
use crate::server::AppState;

/// `POST /api/login` body
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Handle `POST /api/login`
pub async fn handle_login(req: Request<Incoming>, state: &AppState) -> Response<Full<Bytes>> {
    let login: LoginRequest = match read_json(req).await {
        Ok(login) => login,
        Err(e) => return error_response(e),
    };

    if !state.credentials.verify(&login.username, &login.password) {
        warn!(username = %login.username, "Console login rejected");
        return text_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    info!(username = %login.username, "Console login");
    Response::builder()
        .status(StatusCode::OK)
        .header(SET_COOKIE, session_cookie(state.args.session_max_age_secs))
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from_static(b"OK")))
        .unwrap()
}

/// Handle `/api/logout`: expire the cookie and go back to the login page
pub fn handle_logout() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(SET_COOKIE, clear_session_cookie())
        .header(LOCATION, "/login.html")
        .body(Full::new(Bytes::from_static(b"Redirect")))
        .unwrap()
}
