//! Control-channel server: Unix-domain-socket listeners and command
//! dispatch.
//!
//! Two independent endpoints may exist at once (one scoped to the invoking
//! user, one to the whole machine), sharing one dispatch function and
//! differing only in path and socket permissions. Each accepted connection
//! handles exactly one exchange under a bounded deadline: read one request
//! line, dispatch, write one response line, close.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{Command, ControlRequest, ControlResponse};
use crate::scheduler::CronEngine;

/// Per-connection read/overall deadline.
const CONNECTION_DEADLINE: Duration = Duration::from_secs(5);

/// Longest request line the server will read.
const MAX_REQUEST_BYTES: u64 = 4096;

/// Who may connect to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointScope {
    /// Only the identity that created the socket (mode 0600).
    User,
    /// All authenticated local users (mode 0666); used when the engine runs
    /// as a background service rather than an interactive session.
    Machine,
}

/// Default path for the user-scoped endpoint: the user's runtime directory
/// when available, else a uid-suffixed socket in the temp directory.
pub fn user_socket_path() -> PathBuf {
    if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime.is_empty() {
            return Path::new(&runtime).join("minicron-control.sock");
        }
    }
    std::env::temp_dir().join(format!("minicron-control-{}.sock", current_uid()))
}

/// Default path for the machine-scoped endpoint.
pub fn machine_socket_path() -> PathBuf {
    let system = Path::new("/run");
    if system.is_dir() {
        return system.join("minicron-control.sock");
    }
    std::env::temp_dir().join("minicron-control.sock")
}

fn current_uid() -> u32 {
    extern "C" {
        fn getuid() -> u32;
    }
    // SAFETY: getuid cannot fail and has no preconditions.
    unsafe { getuid() }
}

/// Shared command dispatcher: both endpoints close over the same engine
/// handle and shutdown signal.
pub struct ControlHandler {
    engine: Arc<CronEngine>,
    shutdown: CancellationToken,
    open_window: Option<Box<dyn Fn() + Send + Sync>>,
}

impl ControlHandler {
    /// Create a headless dispatcher; `open` will answer unsupported.
    pub fn new(engine: Arc<CronEngine>, shutdown: CancellationToken) -> Self {
        Self {
            engine,
            shutdown,
            open_window: None,
        }
    }

    /// Install a callback that surfaces the GUI shell's main window.
    pub fn with_open_window(mut self, open: impl Fn() + Send + Sync + 'static) -> Self {
        self.open_window = Some(Box::new(open));
        self
    }

    /// Dispatch one request.
    pub async fn dispatch(&self, req: ControlRequest) -> ControlResponse {
        match Command::parse(&req.cmd) {
            Some(Command::Enable) => {
                self.engine.set_global_enabled(true).await;
                ControlResponse::with_message("scheduling enabled").global_enabled(true)
            }
            Some(Command::Disable) => {
                self.engine.set_global_enabled(false).await;
                ControlResponse::with_message("scheduling disabled").global_enabled(false)
            }
            Some(Command::Status) => {
                ControlResponse::success().global_enabled(self.engine.global_enabled().await)
            }
            Some(Command::Quit) => {
                self.shutdown.cancel();
                ControlResponse::with_message("ok")
            }
            Some(Command::Open) => match &self.open_window {
                Some(open) => {
                    open();
                    ControlResponse::with_message("ok")
                }
                None => ControlResponse::failure("open is not supported in headless mode"),
            },
            None => ControlResponse::failure("unknown command"),
        }
    }
}

/// One bound control endpoint with its accept loop.
pub struct ControlServer {
    path: PathBuf,
    accept_task: JoinHandle<()>,
    stop: CancellationToken,
}

impl ControlServer {
    /// Bind an endpoint at the given path and start serving connections.
    ///
    /// A stale socket file at the path is replaced. Socket permissions are
    /// restricted per the scope at creation time.
    pub fn bind(
        path: impl Into<PathBuf>,
        scope: EndpointScope,
        handler: Arc<ControlHandler>,
    ) -> io::Result<Self> {
        let path = path.into();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let listener = UnixListener::bind(&path)?;
        let mode = match scope {
            EndpointScope::User => 0o600,
            EndpointScope::Machine => 0o666,
        };
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))?;

        let stop = CancellationToken::new();
        let accept_stop = stop.clone();
        let accept_path = path.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                let handler = Arc::clone(&handler);
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, handler).await {
                                        tracing::debug!(error = %e, "control connection ended early");
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::warn!(path = %accept_path.display(), error = %e, "control accept failed");
                            }
                        }
                    }
                    _ = accept_stop.cancelled() => break,
                }
            }
        });

        tracing::info!(path = %path.display(), ?scope, "control endpoint listening");
        Ok(Self {
            path,
            accept_task,
            stop,
        })
    }

    /// Path of the bound socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting and remove the socket file.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        let _ = (&mut self.accept_task).await;
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.stop.cancel();
        self.accept_task.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Serve exactly one request/response exchange on an accepted connection.
async fn handle_connection(stream: UnixStream, handler: Arc<ControlHandler>) -> io::Result<()> {
    tokio::time::timeout(CONNECTION_DEADLINE, async move {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half).take(MAX_REQUEST_BYTES);

        let mut line = String::new();
        reader.read_line(&mut line).await?;

        let response = match serde_json::from_str::<ControlRequest>(line.trim()) {
            Ok(req) => handler.dispatch(req).await,
            Err(_) => ControlResponse::failure("invalid request"),
        };

        let mut body = serde_json::to_vec(&response).unwrap_or_else(|_| b"{\"ok\":false}".to_vec());
        body.push(b'\n');
        write_half.write_all(&body).await?;
        write_half.flush().await?;
        Ok(())
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "control connection deadline"))?
}
