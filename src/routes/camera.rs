//! Live camera feed
//!
//! The capture itself is an external process (typically ffmpeg writing
//! `mpjpeg`). Its stdout is relayed untouched as a
//! `multipart/x-mixed-replace` body. Each viewer gets its own process, which
//! is killed when the viewer disconnects and the body is dropped.

use bytes::{Bytes, BytesMut};
use futures::stream;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::server::{AppState, BoxBody, BoxError};
use crate::types::{GatewayError, Result};

const CHUNK_SIZE: usize = 16 * 1024;

/// Handle `GET /api/camera`
pub async fn handle_camera(state: &AppState) -> Result<Response<BoxBody>> {
    let command = state
        .args
        .camera_command
        .as_deref()
        .ok_or_else(|| GatewayError::NotFound("Camera feed not configured".into()))?;

    let content_type = HeaderValue::from_str(&format!(
        "multipart/x-mixed-replace; boundary={}",
        state.args.camera_boundary
    ))
    .map_err(|_| GatewayError::Camera("Invalid multipart boundary".into()))?;

    let (child, stdout) = spawn_capture(command)?;
    info!(pid = ?child.id(), "Camera capture started");

    let body = StreamBody::new(relay(child, stdout)).boxed_unsync();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .header("Cache-Control", "no-cache, no-store")
        .body(body)
        .unwrap())
}

fn spawn_capture(command: &str) -> Result<(Child, ChildStdout)> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| GatewayError::Camera(format!("Failed to start capture: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| GatewayError::Camera("Capture process has no stdout".into()))?;
    Ok((child, stdout))
}

/// Stream the capture's stdout in chunks; the child lives as long as the stream
fn relay(
    child: Child,
    stdout: ChildStdout,
) -> impl futures::Stream<Item = std::result::Result<Frame<Bytes>, BoxError>> + Send {
    stream::unfold(Some((child, stdout)), |state| async move {
        let (child, mut stdout) = state?;
        let mut buf = BytesMut::zeroed(CHUNK_SIZE);
        match stdout.read(&mut buf).await {
            Ok(0) => {
                debug!(pid = ?child.id(), "Camera capture ended");
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Frame::data(buf.freeze())), Some((child, stdout))))
            }
            Err(e) => {
                warn!(error = %e, "Camera capture read failed");
                Some((Err(Box::new(e) as BoxError), None))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_relays_process_output() {
        let (child, stdout) = spawn_capture("printf 'frame-1'; printf 'frame-2'").unwrap();

        let chunks: Vec<Bytes> = relay(child, stdout)
            .map(|item| item.unwrap().into_data().unwrap())
            .collect()
            .await;

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, b"frame-1frame-2");
    }
}
