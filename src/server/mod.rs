//! HTTP server for the operator console

pub mod http;

pub use http::{run, serve, AppState, BoxBody, BoxError};
