//! Cookie session gate
//!
//! A successful login sets `session=logged_in`. Every path outside
//! [`PUBLIC_PATHS`] requires that cookie; anything else is sent to the login
//! page.

use hyper::header::{HeaderMap, COOKIE};

const SESSION_COOKIE: &str = "session";
const SESSION_VALUE: &str = "logged_in";

/// Paths served without a session
pub const PUBLIC_PATHS: &[&str] = &[
    "/login.html",
    "/image_4.jpg",
    "/api/login",
    "/api/logout",
    "/health",
    "/ready",
    "/version",
];

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

/// Whether the request carries a logged-in session cookie
pub fn has_session(headers: &HeaderMap) -> bool {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .any(|(name, value)| name == SESSION_COOKIE && value == SESSION_VALUE)
}

/// `Set-Cookie` value opening a session
pub fn session_cookie(max_age_secs: u64) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, SESSION_VALUE, max_age_secs
    )
}

/// `Set-Cookie` value expiring the session immediately
pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; Max-Age=0", SESSION_COOKIE)
}
