//! JSON-RPC 2.0 wire codec for the bridge.
//!
//! Pipe mode frames every message as a 4-byte little-endian length prefix
//! followed by a UTF-8 JSON payload. Stdio mode sends one newline-terminated
//! JSON object per message with no framing header.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::error::AgentError;

/// Largest response body the client will accept. A larger declared length is
/// treated as a command error and tears down the channel.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Upper bound on a single read while draining a frame body.
const READ_CHUNK_SIZE: usize = 4096;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: u64,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// Encodes a request into a pipe frame: `uint32_le(len) ++ payload`.
pub fn encode_frame(request: &Request) -> Result<Vec<u8>, AgentError> {
    let payload = serde_json::to_vec(request)?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Reads one length-prefixed frame from `reader`, honoring `deadline`.
///
/// The deadline is re-checked before each blocking read: first for the 4-byte
/// header, then for every body chunk (at most 4096 bytes per read).
pub async fn read_frame<R>(reader: &mut R, deadline: Option<Instant>) -> Result<Value, AgentError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    read_bounded(reader, &mut header, deadline).await?;
    let declared = u32::from_le_bytes(header) as usize;

    if declared > MAX_FRAME_SIZE {
        return Err(AgentError::Command(format!(
            "response too large: {declared} bytes"
        )));
    }

    let mut body = vec![0u8; declared];
    let mut filled = 0;
    while filled < declared {
        let end = (filled + READ_CHUNK_SIZE).min(declared);
        read_bounded(reader, &mut body[filled..end], deadline).await?;
        filled = end;
    }

    serde_json::from_slice(&body)
        .map_err(|e| AgentError::Command(format!("invalid JSON from bridge: {e}")))
}

/// Fills `buf` completely, failing with a timeout once `deadline` passes.
async fn read_bounded<R>(
    reader: &mut R,
    buf: &mut [u8],
    deadline: Option<Instant>,
) -> Result<(), AgentError>
where
    R: AsyncRead + Unpin,
{
    let read = async {
        reader
            .read_exact(buf)
            .await
            .map_err(|e| AgentError::Connection(format!("bridge read failed: {e}")))
    };

    match deadline {
        Some(deadline) => {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                return Err(AgentError::Timeout("command deadline exceeded".to_string()));
            }
            tokio::time::timeout(remaining, read)
                .await
                .map_err(|_| AgentError::Timeout("command deadline exceeded".to_string()))?
        }
        None => read.await,
    }?;
    Ok(())
}

/// Unwraps a JSON-RPC response object.
///
/// An `error` field raises a command error carrying its message, a `result`
/// field unwraps to the value, anything else is returned as-is.
pub fn unwrap_response(response: Value) -> Result<Value, AgentError> {
    if let Some(error) = response.get("error") {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(AgentError::Command(message));
    }
    match response {
        Value::Object(mut map) if map.contains_key("result") => {
            Ok(map.remove("result").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}
