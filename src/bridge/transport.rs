//! Transport client for the analysis-engine bridge.
//!
//! A [`BridgeClient`] owns exactly one physical channel: either a pipe (a
//! Unix-domain stream socket at a well-known path) speaking length-prefixed
//! JSON-RPC, or a spawned engine subprocess speaking newline-delimited
//! JSON-RPC over stdio. The client is not safe for concurrent use by two
//! callers; the connection pool loans whole clients for one request/response
//! cycle at a time.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bridge::wire::{self, Request};
use crate::error::AgentError;

/// Delay between reconnect attempts after an I/O failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Deadline applied to health-check pings.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// How to reach the analysis engine.
#[derive(Debug, Clone)]
pub enum BridgeTransport {
    /// Connect to a pipe the engine listens on (length-prefixed framing).
    Pipe { path: PathBuf },
    /// Spawn the engine as a subprocess and talk over its stdio
    /// (newline-delimited framing).
    Stdio {
        command: String,
        args: Vec<String>,
        env: Option<HashMap<String, String>>,
    },
}

enum Channel {
    Pipe(UnixStream),
    Stdio {
        _child: Child,
        stdin: ChildStdin,
        stdout: BufReader<ChildStdout>,
    },
}

/// One exclusive channel to the analysis engine.
pub struct BridgeClient {
    transport: BridgeTransport,
    channel: Option<Channel>,
    request_id: u64,
    max_retries: u32,
}

impl BridgeClient {
    pub fn new(transport: BridgeTransport, max_retries: u32) -> Self {
        Self {
            transport,
            channel: None,
            request_id: 0,
            max_retries: max_retries.max(1),
        }
    }

    /// Establishes the channel. Pipe mode opens the socket; stdio mode spawns
    /// the engine subprocess with piped stdin/stdout.
    pub async fn connect(&mut self) -> Result<(), AgentError> {
        let channel = match &self.transport {
            BridgeTransport::Pipe { path } => {
                let stream = UnixStream::connect(path).await.map_err(|e| {
                    AgentError::Connection(format!(
                        "bridge not running (pipe {} not found): {e}",
                        path.display()
                    ))
                })?;
                debug!(path = %path.display(), "connected to bridge pipe");
                Channel::Pipe(stream)
            }
            BridgeTransport::Stdio { command, args, env } => {
                let mut cmd = Command::new(command);
                cmd.args(args)
                    .stdin(std::process::Stdio::piped())
                    .stdout(std::process::Stdio::piped())
                    .kill_on_drop(true);
                if let Some(env) = env {
                    cmd.envs(env);
                }
                let mut child = cmd.spawn().map_err(|e| {
                    AgentError::Connection(format!("failed to start engine process: {e}"))
                })?;
                let stdin = child.stdin.take().ok_or_else(|| {
                    AgentError::Connection("failed to capture engine stdin".to_string())
                })?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    AgentError::Connection("failed to capture engine stdout".to_string())
                })?;
                debug!(command, "spawned engine subprocess");
                Channel::Stdio {
                    _child: child,
                    stdin,
                    stdout: BufReader::new(stdout),
                }
            }
        };
        self.channel = Some(channel);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Releases the channel. Idempotent. A spawned engine subprocess is
    /// killed when its handle drops.
    pub fn close(&mut self) {
        self.channel = None;
    }

    /// Performs one full request/response round trip, reconnecting and
    /// resending on I/O failure up to `max_retries` times with a short fixed
    /// backoff. Each attempt uses a fresh monotonically increasing request id.
    /// Non-I/O failures (timeout, command error, malformed response) close
    /// the channel and propagate without retry.
    pub async fn send_command(
        &mut self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, AgentError> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            if self.channel.is_none() {
                self.connect().await?;
            }

            self.request_id += 1;
            let request = Request::new(method, params.clone(), self.request_id);

            match self.round_trip(&request, timeout).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_io() => {
                    self.close();
                    warn!(
                        method,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "bridge I/O failure, reconnecting"
                    );
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                }
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AgentError::Connection("unknown bridge failure".to_string())))
    }

    /// Connectivity check against the engine.
    pub async fn ping(&mut self) -> Result<Value, AgentError> {
        self.send_command("ping", Value::Object(Default::default()), Some(PING_TIMEOUT))
            .await
    }

    async fn round_trip(
        &mut self,
        request: &Request,
        timeout: Option<Duration>,
    ) -> Result<Value, AgentError> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| AgentError::Connection("not connected".to_string()))?;

        match channel {
            Channel::Pipe(stream) => {
                let deadline = timeout.map(|t| Instant::now() + t);
                let frame = wire::encode_frame(request)?;
                stream
                    .write_all(&frame)
                    .await
                    .map_err(|e| AgentError::Connection(format!("bridge write failed: {e}")))?;
                let response = wire::read_frame(stream, deadline).await?;
                wire::unwrap_response(response)
            }
            Channel::Stdio { stdin, stdout, .. } => {
                let mut line = serde_json::to_string(request)?;
                line.push('\n');
                stdin
                    .write_all(line.as_bytes())
                    .await
                    .map_err(|e| AgentError::Connection(format!("engine write failed: {e}")))?;
                stdin
                    .flush()
                    .await
                    .map_err(|e| AgentError::Connection(format!("engine write failed: {e}")))?;

                let response = read_json_line(stdout, timeout).await?;
                wire::unwrap_response(response)
            }
        }
    }
}

/// Reads the next JSON object line from the engine's stdout, skipping blank
/// and non-JSON lines (the engine may interleave log output). The read is
/// bounded by a hard wall-clock timeout rather than blocking forever.
async fn read_json_line(
    stdout: &mut BufReader<ChildStdout>,
    timeout: Option<Duration>,
) -> Result<Value, AgentError> {
    let read_loop = async {
        loop {
            let mut line = String::new();
            let n = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| AgentError::Connection(format!("engine read failed: {e}")))?;
            if n == 0 {
                return Err(AgentError::Connection(
                    "engine closed its stdout".to_string(),
                ));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => return Ok(value),
                Err(_) => {
                    debug!(line = trimmed, "skipping non-JSON line from engine");
                }
            }
        }
    };

    match timeout {
        Some(t) => tokio::time::timeout(t, read_loop).await.map_err(|_| {
            AgentError::Timeout(format!("no engine response within {:.1}s", t.as_secs_f64()))
        })?,
        None => read_loop.await,
    }
}

/// One loanable connection, as seen by the pool.
#[async_trait]
pub trait Connection: Send + 'static {
    async fn send_command(
        &mut self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, AgentError>;

    async fn ping(&mut self) -> Result<(), AgentError>;

    async fn close(&mut self);
}

/// Factory the pool uses to manufacture fresh connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    async fn connect(&self) -> Result<Self::Conn, AgentError>;
}

#[async_trait]
impl Connection for BridgeClient {
    async fn send_command(
        &mut self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, AgentError> {
        BridgeClient::send_command(self, method, params, timeout).await
    }

    async fn ping(&mut self) -> Result<(), AgentError> {
        BridgeClient::ping(self).await.map(|_| ())
    }

    async fn close(&mut self) {
        BridgeClient::close(self);
    }
}

/// Connects [`BridgeClient`]s for the pool.
pub struct BridgeConnector {
    transport: BridgeTransport,
    max_retries: u32,
}

impl BridgeConnector {
    pub fn new(transport: BridgeTransport, max_retries: u32) -> Self {
        Self {
            transport,
            max_retries,
        }
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    type Conn = BridgeClient;

    async fn connect(&self) -> Result<BridgeClient, AgentError> {
        let mut client = BridgeClient::new(self.transport.clone(), self.max_retries);
        client.connect().await?;
        Ok(client)
    }
}
