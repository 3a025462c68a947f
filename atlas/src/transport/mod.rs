//! Persistent stdio transport to tool-server subprocesses.
//!
//! A tool server is an out-of-process provider of one or more tools, reached
//! over length-prefixed JSON-RPC frames on its stdin/stdout. The handshake is
//! `initialize` → `notifications/initialized` → `tools/list`; subsequent
//! `tools/call` requests invoke tools.
//!
//! [`ToolServerSession`] owns exactly one subprocess-backed session: connect,
//! health-check, timed calls, bounded reconnection, idempotent shutdown.
//! [`RemoteTool`] adapts one served tool into the function registry.

mod frames;
mod jsonrpc;
mod remote;
mod session;

pub use frames::FramePipe;
pub use jsonrpc::{ErrorObject, JsonRpcMessage, MessageId, NotificationMessage, RequestMessage, ResultMessage};
pub use remote::RemoteTool;
pub use session::{ServerSpec, ToolServerSession};

use std::time::Duration;
use thiserror::Error;

/// Errors from tool-server transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn tool server: {0}")]
    Spawn(std::io::Error),
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("initialize failed: {0}")]
    Initialize(String),
    #[error("tool call '{0}' timed out after {1:?}")]
    Timeout(String, Duration),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("connection failed after {attempts} reconnect attempts: {reason}")]
    ConnectionFailed { attempts: u32, reason: String },
    #[error("JSON-RPC error: {0}")]
    JsonRpc(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether this error means the underlying connection is gone and a
    /// reconnect may help. Timeouts are not connection errors: the session
    /// stays usable after one.
    pub fn is_connection_error(&self) -> bool {
        match self {
            TransportError::Closed(_) => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: closed-resource and broken-pipe errors classify as
    /// connection errors; timeouts and JSON-RPC errors do not.
    #[test]
    fn connection_error_classification() {
        assert!(TransportError::Closed("stream closed".into()).is_connection_error());
        assert!(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe"
        ))
        .is_connection_error());
        assert!(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof"
        ))
        .is_connection_error());
        assert!(!TransportError::Timeout("t".into(), Duration::from_secs(30))
            .is_connection_error());
        assert!(!TransportError::JsonRpc("rpc failed".into()).is_connection_error());
        assert!(
            !TransportError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))
                .is_connection_error()
        );
    }
}
