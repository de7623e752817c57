//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling, one task per connection.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::LOCATION;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::{has_session, is_public_path, ConsoleCredentials};
use crate::config::Args;
use crate::logging::AuditLogger;
use crate::plc::StopControl;
use crate::routes;
use crate::types::{GatewayError, Result};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type BoxBody = http_body_util::combinators::UnsyncBoxBody<Bytes, BoxError>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Stop-bit write path to the controller
    pub gate: Arc<dyn StopControl>,
    /// Console account, password held only as a hash
    pub credentials: ConsoleCredentials,
    /// Daily CSV audit trail
    pub audit: AuditLogger,
    pub started_at: Instant,
}

impl AppState {
    /// Build state from configuration around an already started gate
    pub fn new(args: Args, gate: Arc<dyn StopControl>) -> Result<Self> {
        let credentials = ConsoleCredentials::new(args.console_user.clone(), &args.console_password())?;
        let audit = AuditLogger::new(args.log_dir.clone());
        Ok(Self {
            args,
            gate,
            credentials,
            audit,
            started_at: Instant::now(),
        })
    }
}

/// Bind the configured address and serve forever
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("Vision gateway listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled - PLC is simulated");
    }
    if state.args.ack_write_failures {
        warn!("ACK_WRITE_FAILURES set - failed stop writes are acknowledged as OK");
    }

    serve(listener, state).await
}

/// Accept loop on an existing listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    if !is_public_path(&path) && !has_session(req.headers()) {
        return Ok(to_boxed(redirect_response("/login.html")));
    }

    let response = match (method, path.as_str()) {
        (Method::POST, "/api/login") => to_boxed(routes::handle_login(req, &state).await),

        (Method::GET, "/api/logout") | (Method::POST, "/api/logout") => {
            to_boxed(routes::handle_logout())
        }

        (Method::POST, "/api/alarm") => to_boxed(routes::handle_alarm(req, &state).await),

        (Method::POST, "/api/log") => to_boxed(routes::handle_audit_log(req, &state).await),

        (Method::GET, "/api/camera") => match routes::handle_camera(&state).await {
            Ok(response) => response,
            Err(e) => error_to_boxed(e),
        },

        // Liveness probe - returns 200 while the gateway is running
        (Method::GET, "/health") => to_boxed(routes::health_check(&state)),

        // Readiness probe - returns 200 only with a ready controller link
        (Method::GET, "/ready") => to_boxed(routes::readiness_check(&state)),

        (Method::GET, "/version") => to_boxed(routes::version_info()),

        (Method::GET, p) => to_boxed(routes::serve_static(&state.args.frontend_dir, p).await),

        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed_unsync())
}

fn error_to_boxed(err: GatewayError) -> Response<BoxBody> {
    to_boxed(routes::error_response(err))
}

/// Redirect to the login page
fn redirect_response(location: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, location)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
