//! Control-channel client.
//!
//! Tries the user-scoped endpoint first, then the machine-scoped one, and
//! returns the first successful exchange. "Nothing is listening" is
//! classified separately from other transport failures so callers can tell
//! "not running" from "broken".

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::{ControlRequest, ControlResponse};
use super::server::{machine_socket_path, user_socket_path};

/// Connect timeout per endpoint attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Overall deadline for one exchange.
const EXCHANGE_DEADLINE: Duration = Duration::from_secs(4);

/// Errors a control client can hit.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No endpoint had a listener: the engine is not running.
    #[error("no control endpoint is listening")]
    NotRunning,

    /// An endpoint existed but the exchange failed.
    #[error("control transport error: {0}")]
    Transport(#[from] io::Error),

    /// The server's reply did not parse.
    #[error("malformed control response: {0}")]
    MalformedResponse(String),
}

impl ClientError {
    fn is_not_running(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
        )
    }
}

/// Send one command, trying the user endpoint then the machine endpoint.
pub async fn send_command(cmd: &str) -> Result<ControlResponse, ClientError> {
    send_request(ControlRequest::new(cmd)).await
}

/// Send one request, trying the user endpoint then the machine endpoint.
pub async fn send_request(req: ControlRequest) -> Result<ControlResponse, ClientError> {
    let paths: [PathBuf; 2] = [user_socket_path(), machine_socket_path()];

    let mut last_err = ClientError::NotRunning;
    for path in &paths {
        match send_to(path, req.clone()).await {
            Ok(resp) => return Ok(resp),
            Err(e) => last_err = e,
        }
    }
    match last_err {
        ClientError::Transport(ref e) if ClientError::is_not_running(e) => {
            Err(ClientError::NotRunning)
        }
        other => Err(other),
    }
}

/// Perform one request/response exchange against a specific endpoint.
pub async fn send_to(
    path: impl AsRef<Path>,
    req: ControlRequest,
) -> Result<ControlResponse, ClientError> {
    let path = path.as_ref();

    let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(path))
        .await
        .map_err(|_| {
            ClientError::Transport(io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))
        })??;

    tokio::time::timeout(EXCHANGE_DEADLINE, exchange(stream, req))
        .await
        .map_err(|_| {
            ClientError::Transport(io::Error::new(io::ErrorKind::TimedOut, "exchange timeout"))
        })?
}

async fn exchange(
    stream: UnixStream,
    req: ControlRequest,
) -> Result<ControlResponse, ClientError> {
    let (read_half, mut write_half) = stream.into_split();

    let mut body = serde_json::to_vec(&req)
        .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
    body.push(b'\n');
    write_half.write_all(&body).await?;
    write_half.flush().await?;

    let mut line = String::new();
    BufReader::new(read_half).read_line(&mut line).await?;

    serde_json::from_str(line.trim()).map_err(|e| ClientError::MalformedResponse(e.to_string()))
}
