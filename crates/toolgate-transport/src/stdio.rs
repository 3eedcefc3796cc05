//! Subprocess stdio transport: newline-delimited JSON-RPC over the child's
//! stdin/stdout (SPEC_FULL.md §4.D, §4.E supplement).
//!
//! Grounded on `mcpmux-gateway::pool::transport::stdio::StdioTransport`,
//! rebuilt to speak JSON-RPC directly over the child's pipes instead of
//! handing them to `rmcp::transport::TokioChildProcess`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use toolgate_core::jsonrpc::{JsonRpcId, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};

use crate::error::TransportError;
use crate::pending::PendingRequests;
use crate::session::{ClientTransport, NotificationSink, TransportEvent, WireSessionId};

/// Resolves a configured command into an executable path plus argument
/// vector. If `args` is empty and `command` contains whitespace, the
/// command string is tokenized with `shell-words` and the first token is
/// treated as the executable.
fn resolve_command(command: &str, args: &[String]) -> Result<(std::path::PathBuf, Vec<String>), TransportError> {
    let (exe, mut resolved_args) = if args.is_empty() && command.contains(char::is_whitespace) {
        let tokens = shell_words::split(command)
            .map_err(|e| TransportError::ConnectFailed(format!("failed to tokenize command: {e}")))?;
        let mut tokens = tokens.into_iter();
        let exe = tokens
            .next()
            .ok_or_else(|| TransportError::ConnectFailed("empty command".to_string()))?;
        (exe, tokens.collect::<Vec<_>>())
    } else {
        (command.to_string(), Vec::new())
    };
    resolved_args.extend(args.iter().cloned());

    let path = which::which(&exe)
        .or_else(|_| which::which(format!("{exe}.exe")))
        .map_err(|_| {
            TransportError::ConnectFailed(format!("command not found on PATH: {exe}"))
        })?;

    Ok((path, resolved_args))
}

pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<tokio::process::ChildStdin>>,
    pending: Arc<PendingRequests>,
    sink: NotificationSink,
    connected: AtomicBool,
    session_id: WireSessionId,
}

impl StdioTransport {
    pub fn new(command: String, args: Vec<String>, env: HashMap<String, String>, sink: NotificationSink) -> Self {
        Self {
            command,
            args,
            env,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            pending: Arc::new(PendingRequests::new()),
            sink,
            connected: AtomicBool::new(false),
            session_id: WireSessionId::default(),
        }
    }

    async fn write_line(&self, raw: &str) -> Result<(), TransportError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(raw.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ClientTransport for StdioTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (path, args) = resolve_command(&self.command, &self.args)?;
        info!(command = %self.command, "spawning stdio upstream");

        let mut cmd = Command::new(&path);
        cmd.args(&args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            use tokio::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::ConnectFailed(format!("failed to spawn {}: {e}", self.command)))?;

        let stdout = child.stdout.take().ok_or(TransportError::Closed)?;
        let stderr = child.stderr.take();
        let stdin = child.stdin.take().ok_or(TransportError::Closed)?;

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        self.connected.store(true, Ordering::SeqCst);
        self.session_id.regenerate();

        let pending = self.pending.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match JsonRpcMessage::from_json(&line) {
                            Ok(JsonRpcMessage::Response(resp)) => {
                                pending.complete(resp);
                            }
                            Ok(JsonRpcMessage::Notification(req)) => {
                                let _ = sink.send(TransportEvent::Notification(req));
                            }
                            Err(e) => warn!(error = %e, "malformed stdio message, dropping"),
                        }
                    }
                    Ok(None) => {
                        let _ = sink.send(TransportEvent::Closed(Some("stdout closed".to_string())));
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "stdio read error");
                        let _ = sink.send(TransportEvent::Closed(Some(e.to_string())));
                        break;
                    }
                }
            }
        });

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "upstream_stderr", "{line}");
                }
            });
        }

        Ok(())
    }

    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let id = request
            .id
            .clone()
            .ok_or_else(|| TransportError::Protocol("request without id".to_string()))?;
        let rx = self.pending.register(&id);
        let raw = serde_json::to_string(&request).map_err(|e| TransportError::Protocol(e.to_string()))?;
        if let Err(e) = self.write_line(&raw).await {
            self.pending.cancel(&id);
            return Err(e);
        }

        match tokio::time::timeout(std::time::Duration::from_secs(30), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.cancel(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<(), TransportError> {
        let raw = serde_json::to_string(&notification).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.write_line(&raw).await
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
        }
        *self.stdin.lock().await = None;
        self.pending.reject_all();
        self.session_id.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn description(&self) -> String {
        format!("stdio:{}", self.command)
    }

    fn wire_session_id(&self) -> Option<String> {
        self.session_id.get()
    }
}
