//! Stdio transport for MCP connectors.
//!
//! Each connector is a child process speaking newline-delimited JSON-RPC
//! over its pipes. Instead of handing callers the pipes behind locks, a
//! dedicated I/O task owns the process: it writes outgoing frames,
//! routes replies back to waiting callers by request id, and performs
//! the graceful close. Callers hold a cheap [`StdioConnection`] handle
//! and park on a oneshot until their reply (or a timeout) arrives.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{self, Inbound, InboundKind, RpcError};
use cairn_domain::config::McpConnectorConfig;

/// How long a caller waits for a connector reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace period for the child to exit once stdin closes.
const EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to launch connector: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("connector closed the connection")]
    Closed,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("connector error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl From<RpcError> for TransportError {
    fn from(e: RpcError) -> Self {
        TransportError::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

type ReplySender = oneshot::Sender<Result<Value, RpcError>>;

enum Command {
    Send {
        line: String,
        /// Present for requests: the id to route the reply to.
        reply: Option<(u64, ReplySender)>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StdioConnection — the caller-side handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StdioConnection {
    commands: mpsc::Sender<Command>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
}

impl StdioConnection {
    /// Launch the connector process and start its I/O task.
    pub fn open(config: &McpConnectorConfig) -> Result<Self, TransportError> {
        let mut command = tokio::process::Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // Nothing reads connector stderr; a full pipe would wedge it.
            .stderr(Stdio::null());

        let mut child = command.spawn().map_err(TransportError::Spawn)?;
        let stdin = child.stdin.take().ok_or_else(|| pipe_missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| pipe_missing("stdout"))?;

        let alive = Arc::new(AtomicBool::new(true));
        let (frames_tx, frames_rx) = mpsc::channel::<Inbound>(32);
        let (commands, commands_rx) = mpsc::channel::<Command>(32);

        tokio::spawn(read_frames(
            BufReader::new(stdout),
            frames_tx,
            config.id.clone(),
        ));
        tokio::spawn(io_task(
            child,
            stdin,
            commands_rx,
            frames_rx,
            alive.clone(),
            config.id.clone(),
        ));

        Ok(Self {
            commands,
            next_id: AtomicU64::new(1),
            alive,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Send a request and wait for its reply.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = protocol::request_frame(id, method, params);
        let (reply_tx, reply_rx) = oneshot::channel();

        self.commands
            .send(Command::Send {
                line,
                reply: Some((id, reply_tx)),
            })
            .await
            .map_err(|_| TransportError::Closed)?;

        match tokio::time::timeout(REPLY_TIMEOUT, reply_rx).await {
            Err(_) => Err(TransportError::Timeout(REPLY_TIMEOUT)),
            // The I/O task dropped our reply slot: the process is gone.
            Ok(Err(_)) => Err(TransportError::Closed),
            Ok(Ok(outcome)) => outcome.map_err(TransportError::from),
        }
    }

    /// Send a notification; nothing comes back.
    pub async fn notify(&self, method: &str) -> Result<(), TransportError> {
        self.commands
            .send(Command::Send {
                line: protocol::notification_frame(method),
                reply: None,
            })
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Ask the I/O task for a graceful close and wait for it to finish.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Shutdown { done: done_tx })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }
}

fn pipe_missing(which: &str) -> TransportError {
    TransportError::Spawn(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("connector {which} was not piped"),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read stdout line by line, forwarding every parseable frame. Servers
/// that log to stdout just produce skipped lines; requests never block
/// on the noise because they wait on their oneshot, not the pipe.
async fn read_frames(
    reader: BufReader<ChildStdout>,
    frames: mpsc::Sender<Inbound>,
    connector_id: String,
) {
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Inbound>(line) {
                    Ok(frame) => {
                        if frames.send(frame).await.is_err() {
                            return;
                        }
                    }
                    Err(_) => {
                        tracing::debug!(
                            connector_id = %connector_id,
                            line,
                            "skipping non-frame connector output"
                        );
                    }
                }
            }
            // EOF or a broken pipe; dropping `frames` tells the I/O task.
            Ok(None) | Err(_) => return,
        }
    }
}

/// Own the child process: write outgoing frames, route replies to the
/// callers waiting on them, and close the process down at the end.
async fn io_task(
    child: Child,
    mut stdin: ChildStdin,
    mut commands: mpsc::Receiver<Command>,
    mut frames: mpsc::Receiver<Inbound>,
    alive: Arc<AtomicBool>,
    connector_id: String,
) {
    let mut waiting: HashMap<u64, ReplySender> = HashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send { line, reply }) => {
                    if let Some((id, reply_tx)) = reply {
                        waiting.insert(id, reply_tx);
                    }
                    if let Err(e) = write_frame(&mut stdin, &line).await {
                        tracing::warn!(
                            connector_id = %connector_id,
                            error = %e,
                            "connector stdin write failed"
                        );
                        break;
                    }
                }
                Some(Command::Shutdown { done }) => {
                    alive.store(false, Ordering::Release);
                    graceful_exit(child, stdin, &connector_id).await;
                    let _ = done.send(());
                    // `waiting` drops here; parked callers see Closed.
                    return;
                }
                // Every connection handle is gone.
                None => break,
            },
            frame = frames.recv() => match frame {
                Some(frame) => match frame.classify() {
                    InboundKind::Reply { id, outcome } => match waiting.remove(&id) {
                        Some(reply_tx) => {
                            let _ = reply_tx.send(outcome);
                        }
                        None => {
                            tracing::debug!(
                                connector_id = %connector_id,
                                id,
                                "reply for unknown or abandoned request"
                            );
                        }
                    },
                    InboundKind::Notification { method } => {
                        tracing::debug!(
                            connector_id = %connector_id,
                            method = %method,
                            "connector notification ignored"
                        );
                    }
                    InboundKind::Unsupported => {
                        tracing::debug!(
                            connector_id = %connector_id,
                            "unsupported connector frame ignored"
                        );
                    }
                },
                // stdout closed underneath us; the process is gone.
                None => break,
            },
        }
    }

    alive.store(false, Ordering::Release);
    graceful_exit(child, stdin, &connector_id).await;
}

async fn write_frame(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Closing stdin asks the server to exit; unresponsive ones are killed
/// once the grace period lapses.
async fn graceful_exit(mut child: Child, stdin: ChildStdin, connector_id: &str) {
    drop(stdin);
    match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(connector_id, ?status, "connector exited");
        }
        Ok(Err(e)) => {
            tracing::warn!(connector_id, error = %e, "wait on connector failed");
        }
        Err(_) => {
            tracing::warn!(connector_id, "connector ignored shutdown, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(connector_id, error = %e, "failed to kill connector");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_maps_to_transport_error() {
        let err: TransportError = RpcError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        }
        .into();
        match err {
            TransportError::Rpc { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_for_missing_binary() {
        let config = McpConnectorConfig {
            id: "ghost".into(),
            name: "Ghost".into(),
            command: "definitely-not-a-real-binary-cairn".into(),
            args: vec![],
            env: Default::default(),
            enabled: true,
        };
        // Spawning needs a reactor even though the process never starts.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = rt.block_on(async { StdioConnection::open(&config) });
        assert!(matches!(result, Err(TransportError::Spawn(_))));
    }
}
