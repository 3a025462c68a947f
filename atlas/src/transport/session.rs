//! Tool-server session supervisor.
//!
//! Owns one subprocess-backed stdio session: spawn, handshake, timed calls,
//! bounded reconnection, idempotent shutdown. All lifecycle transitions are
//! serialized by the supervisor lock (`state`); the frame pipe sits behind
//! its own lock so `call_tool` releases the supervisor lock before awaiting
//! the RPC.
//!
//! Reconnect contract: a classified connection-closed error marks the session
//! disconnected and retries after a short delay, up to
//! `max_reconnect_attempts`; past the cap the caller gets a connection-failed
//! error. A call timeout does not poison the session. The tools list is
//! fetched on first connect only; reconnects reuse the cached descriptors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::tools::ToolSpec;
use crate::transport::{
    FramePipe, JsonRpcMessage, NotificationMessage, RequestMessage, ResultMessage, TransportError,
};

/// Protocol version sent in `initialize`.
const PROTOCOL_VERSION: &str = "2025-11-25";
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_millis(500);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;
/// One initial attempt plus one retry after a successful reconnect.
const CALL_ATTEMPTS: u32 = 2;

/// Launch spec for one tool server (from the `tool_servers` config section).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSpec {
    /// Server id used for logging and registry bookkeeping.
    pub id: String,
    /// Command to start the server (e.g. `python`, `npx`).
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment passed to the child on top of the inherited env.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory; when set it is also prepended to the child's
    /// module search path (`PYTHONPATH`) so module servers resolve imports.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// When false, child stderr is discarded (quiet default).
    #[serde(default)]
    pub stderr_verbose: bool,
}

struct Connection {
    child: Child,
    pipe: FramePipe<ChildStdout, ChildStdin>,
    next_id: u64,
}

struct SessionState {
    connection: Option<Arc<Mutex<Connection>>>,
    tools: Option<Vec<ToolSpec>>,
    connected: bool,
    reconnect_attempts: u32,
}

/// Persistent session to one tool server.
pub struct ToolServerSession {
    spec: ServerSpec,
    state: Mutex<SessionState>,
    call_timeout: Duration,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
}

impl ToolServerSession {
    pub fn new(spec: ServerSpec) -> Self {
        Self {
            spec,
            state: Mutex::new(SessionState {
                connection: None,
                tools: None,
                connected: false,
                reconnect_attempts: 0,
            }),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            reconnect_delay: RECONNECT_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// Overrides the per-call timeout (tests use short values).
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Server id from the launch spec.
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Establishes the connection if necessary (spawn + handshake + first
    /// tools/list). Safe to call repeatedly.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.ensure_connected().await.map(|_| ())
    }

    /// Whether the session currently believes it is connected.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Cached tool descriptors, connecting first if needed.
    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>, TransportError> {
        self.ensure_connected().await?;
        let state = self.state.lock().await;
        Ok(state.tools.clone().unwrap_or_default())
    }

    /// Calls a tool with the session's wall-clock timeout.
    ///
    /// The result `content[].text` is parsed as JSON when it is an object,
    /// otherwise returned as a plain string value.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, TransportError> {
        let params = json!({ "name": name, "arguments": arguments });
        let mut attempt = 1;
        loop {
            let connection = self.ensure_connected().await?;

            let call = Self::rpc(&connection, "tools/call", params.clone());
            match timeout(self.call_timeout, call).await {
                Err(_) => {
                    warn!(tool = %name, timeout = ?self.call_timeout, "tool call timed out");
                    return Err(TransportError::Timeout(name.to_string(), self.call_timeout));
                }
                Ok(Ok(result)) => return parse_call_tool_result(result),
                Ok(Err(e)) if e.is_connection_error() => {
                    warn!(
                        tool = %name,
                        attempt,
                        error = %e,
                        "connection error during tool call"
                    );
                    self.mark_disconnected().await;
                    if attempt >= CALL_ATTEMPTS {
                        let attempts = self.state.lock().await.reconnect_attempts;
                        return Err(TransportError::ConnectionFailed {
                            attempts,
                            reason: e.to_string(),
                        });
                    }
                    // Bounded reconnect; past the cap this surfaces
                    // ConnectionFailed which propagates unchanged.
                    self.reconnect().await?;
                    attempt += 1;
                }
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    /// Lightweight liveness probe: a `tools/list` round-trip.
    pub async fn health_check(&self) -> bool {
        let connection = {
            let state = self.state.lock().await;
            match (&state.connection, state.connected) {
                (Some(c), true) => Arc::clone(c),
                _ => return false,
            }
        };
        let probe = Self::rpc(&connection, "tools/list", json!({}));
        match timeout(HEALTH_CHECK_TIMEOUT, probe).await {
            Ok(Ok(_)) => true,
            _ => {
                warn!(server = %self.spec.id, "health check failed");
                self.mark_disconnected().await;
                false
            }
        }
    }

    /// Closes the session: half-closes the pipe, then kills the child.
    /// Idempotent; errors during teardown are swallowed.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.connected = false;
        let Some(connection) = state.connection.take() else {
            return;
        };
        drop(state);

        let mut conn = connection.lock().await;
        // Teardown in reverse order of establishment: streams, then process.
        let _ = conn.pipe.shutdown().await;
        let _ = conn.child.start_kill();
        let _ = conn.child.wait().await;
        info!(server = %self.spec.id, "tool server session closed");
    }

    async fn mark_disconnected(&self) {
        self.state.lock().await.connected = false;
    }

    async fn ensure_connected(&self) -> Result<Arc<Mutex<Connection>>, TransportError> {
        let mut state = self.state.lock().await;
        if state.connected {
            if let Some(conn) = &state.connection {
                return Ok(Arc::clone(conn));
            }
        }
        self.establish_locked(&mut state).await?;
        state
            .connection
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| TransportError::Closed("connection missing after connect".into()))
    }

    /// Tears down, waits, and re-establishes; bounded by the attempt cap.
    async fn reconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.reconnect_attempts >= self.max_reconnect_attempts {
            return Err(TransportError::ConnectionFailed {
                attempts: state.reconnect_attempts,
                reason: "max reconnect attempts exceeded".into(),
            });
        }
        state.reconnect_attempts += 1;
        warn!(
            server = %self.spec.id,
            attempt = state.reconnect_attempts,
            max = self.max_reconnect_attempts,
            "reconnecting tool server"
        );

        if let Some(connection) = state.connection.take() {
            let mut conn = connection.lock().await;
            let _ = conn.pipe.shutdown().await;
            let _ = conn.child.start_kill();
            let _ = conn.child.wait().await;
        }
        state.connected = false;

        tokio::time::sleep(self.reconnect_delay).await;
        self.establish_locked(&mut state).await
    }

    /// Spawns the child and runs the handshake. Caller holds the supervisor lock.
    async fn establish_locked(&self, state: &mut SessionState) -> Result<(), TransportError> {
        debug!(
            server = %self.spec.id,
            command = %self.spec.command,
            args = ?self.spec.args,
            cwd = ?self.spec.cwd,
            "spawning tool server"
        );

        let mut command = Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.spec.stderr_verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
            // Module servers resolve imports relative to their working
            // directory; prepend it to the child's module search path.
            command.env("PYTHONPATH", prepend_search_path(cwd));
        }

        let mut child = command.spawn().map_err(TransportError::Spawn)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Initialize("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Initialize("child stdout unavailable".into()))?;

        let connection = Arc::new(Mutex::new(Connection {
            child,
            pipe: FramePipe::new(stdout, stdin),
            next_id: 1,
        }));

        let handshake = Self::handshake(&connection, state.tools.is_none());
        match timeout(HANDSHAKE_TIMEOUT, handshake).await {
            Ok(Ok(tools)) => {
                if let Some(tools) = tools {
                    info!(
                        server = %self.spec.id,
                        tool_count = tools.len(),
                        "tool server connected, descriptors cached"
                    );
                    state.tools = Some(tools);
                }
                state.connection = Some(connection);
                state.connected = true;
                state.reconnect_attempts = 0;
                Ok(())
            }
            Ok(Err(e)) => {
                let mut conn = connection.lock().await;
                let _ = conn.child.start_kill();
                Err(e)
            }
            Err(_) => {
                let mut conn = connection.lock().await;
                let _ = conn.child.start_kill();
                Err(TransportError::Initialize(
                    "timeout waiting for initialize".into(),
                ))
            }
        }
    }

    /// initialize → notifications/initialized → (first connect only) tools/list.
    async fn handshake(
        connection: &Arc<Mutex<Connection>>,
        fetch_tools: bool,
    ) -> Result<Option<Vec<ToolSpec>>, TransportError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": {
                "name": "atlas",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = Self::rpc(connection, "initialize", params).await?;
        if let Some(err) = result.error {
            return Err(TransportError::Initialize(err.message));
        }

        {
            let mut conn = connection.lock().await;
            let note = JsonRpcMessage::Notification(NotificationMessage::new(
                "notifications/initialized",
                Some(json!({})),
            ));
            conn.pipe.send(&note).await?;
        }

        if !fetch_tools {
            return Ok(None);
        }
        let result = Self::rpc(connection, "tools/list", json!({})).await?;
        parse_list_tools_result(result).map(Some)
    }

    /// One request/response round-trip. Handles `roots/list` requests from
    /// the server (empty roots) and skips unrelated traffic.
    async fn rpc(
        connection: &Arc<Mutex<Connection>>,
        method: &str,
        params: Value,
    ) -> Result<ResultMessage, TransportError> {
        let mut conn = connection.lock().await;
        let id = format!("atlas-{}", conn.next_id);
        conn.next_id += 1;
        conn.pipe
            .send(&JsonRpcMessage::Request(RequestMessage::new(
                id.as_str(),
                method,
                params,
            )))
            .await?;

        loop {
            match conn.pipe.recv().await? {
                None => {
                    return Err(TransportError::Closed(
                        "stream closed by tool server".into(),
                    ))
                }
                Some(JsonRpcMessage::Result(msg)) if msg.id.as_str() == Some(id.as_str()) => {
                    return Ok(msg)
                }
                Some(JsonRpcMessage::Request(req)) if req.method == "roots/list" => {
                    let reply = ResultMessage::success(req.id.clone(), json!({ "roots": [] }));
                    conn.pipe.send(&JsonRpcMessage::Result(reply)).await?;
                }
                Some(_) => {}
            }
        }
    }
}

/// Prepends `cwd` to the inherited module search path.
fn prepend_search_path(cwd: &std::path::Path) -> String {
    let sep = if cfg!(windows) { ';' } else { ':' };
    match std::env::var("PYTHONPATH") {
        Ok(existing) if !existing.is_empty() => {
            format!("{}{}{}", cwd.display(), sep, existing)
        }
        _ => cwd.display().to_string(),
    }
}

/// Parses a `tools/list` result into tool specs.
fn parse_list_tools_result(result: ResultMessage) -> Result<Vec<ToolSpec>, TransportError> {
    if let Some(err) = result.error {
        return Err(TransportError::JsonRpc(err.message));
    }
    let tools_value = result
        .result
        .and_then(|r| r.get("tools").cloned())
        .ok_or_else(|| TransportError::Protocol("no tools in response".into()))?;
    let tools_array = tools_value
        .as_array()
        .ok_or_else(|| TransportError::Protocol("tools not an array".into()))?;
    let mut specs = Vec::with_capacity(tools_array.len());
    for t in tools_array {
        let obj = t
            .as_object()
            .ok_or_else(|| TransportError::Protocol("tool item not an object".into()))?;
        let name = obj
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let description = obj
            .get("description")
            .and_then(|v| v.as_str())
            .map(String::from);
        let input_schema = obj
            .get("inputSchema")
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new()));
        specs.push(ToolSpec {
            name,
            description,
            input_schema,
        });
    }
    Ok(specs)
}

/// Parses a `tools/call` result: joins `content[].text`, falls back to
/// `structuredContent`, then parses the text as JSON when it is an object.
fn parse_call_tool_result(result: ResultMessage) -> Result<Value, TransportError> {
    if let Some(err) = result.error {
        return Err(TransportError::JsonRpc(err.message));
    }
    let result_value = result
        .result
        .ok_or_else(|| TransportError::Protocol("no result in tools/call response".into()))?;
    if result_value
        .get("isError")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        let msg = result_value
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|b| b.get("text").and_then(|t| t.as_str()))
            .unwrap_or("tool returned error")
            .to_string();
        return Err(TransportError::JsonRpc(msg));
    }

    let mut text_parts = Vec::new();
    if let Some(content_array) = result_value.get("content").and_then(|c| c.as_array()) {
        for block in content_array {
            if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text_parts.push(t);
                }
            }
        }
    }
    let text = text_parts.join("\n").trim().to_string();
    if text.is_empty() {
        if let Some(structured) = result_value.get("structuredContent") {
            return Ok(structured.clone());
        }
        return Err(TransportError::Protocol(
            "no text or structuredContent in tools/call response".into(),
        ));
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(parsed) if parsed.is_object() => Ok(parsed),
        _ => Ok(Value::String(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ErrorObject;

    fn spec(command: &str) -> ServerSpec {
        ServerSpec {
            id: "test".into(),
            command: command.into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            stderr_verbose: false,
        }
    }

    /// **Scenario**: a nonexistent command fails to connect with a spawn error.
    #[tokio::test]
    async fn connect_with_invalid_command_errors() {
        let session = ToolServerSession::new(spec("_nonexistent_command_xyz_"));
        let err = session.connect().await;
        assert!(matches!(err, Err(TransportError::Spawn(_))));
        assert!(!session.is_connected().await);
    }

    /// **Scenario**: health check on a never-connected session is false.
    #[tokio::test]
    async fn health_check_without_connection_is_false() {
        let session = ToolServerSession::new(spec("_nonexistent_command_xyz_"));
        assert!(!session.health_check().await);
    }

    /// **Scenario**: close is idempotent on a disconnected session.
    #[tokio::test]
    async fn close_is_idempotent() {
        let session = ToolServerSession::new(spec("_nonexistent_command_xyz_"));
        session.close().await;
        session.close().await;
        assert!(!session.is_connected().await);
    }

    /// **Scenario**: tools/list result parsing maps fields and schema key.
    #[test]
    fn parse_list_tools_result_maps_fields() {
        let result = ResultMessage::success(
            "atlas-1",
            json!({
                "tools": [
                    {
                        "name": "read_file",
                        "description": "Read file content",
                        "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}}
                    }
                ]
            }),
        );
        let tools = parse_list_tools_result(result).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "read_file");
        assert_eq!(tools[0].description.as_deref(), Some("Read file content"));
        assert_eq!(tools[0].input_schema["type"], "object");
    }

    /// **Scenario**: missing or malformed tools payloads are protocol errors;
    /// JSON-RPC errors propagate with their message.
    #[test]
    fn parse_list_tools_result_errors() {
        let missing = ResultMessage::success("1", json!({}));
        assert!(matches!(
            parse_list_tools_result(missing),
            Err(TransportError::Protocol(_))
        ));

        let non_array = ResultMessage::success("1", json!({"tools": {}}));
        assert!(matches!(
            parse_list_tools_result(non_array),
            Err(TransportError::Protocol(_))
        ));

        let err = ResultMessage::failure("1", ErrorObject::new(-32000, "rpc failed", None));
        assert!(matches!(
            parse_list_tools_result(err),
            Err(TransportError::JsonRpc(msg)) if msg == "rpc failed"
        ));
    }

    /// **Scenario**: call results join text blocks; JSON object text parses
    /// into a structured value, other text stays a string.
    #[test]
    fn parse_call_tool_result_text_and_json() {
        let plain = ResultMessage::success(
            "1",
            json!({
                "content": [
                    {"type": "text", "text": "line1"},
                    {"type": "image", "text": "ignored"},
                    {"type": "text", "text": "line2"}
                ]
            }),
        );
        assert_eq!(
            parse_call_tool_result(plain).unwrap(),
            Value::String("line1\nline2".into())
        );

        let structured = ResultMessage::success(
            "1",
            json!({
                "content": [{"type": "text", "text": "{\"answer\": \"yes\", \"found\": true}"}]
            }),
        );
        let value = parse_call_tool_result(structured).unwrap();
        assert_eq!(value["answer"], "yes");
        assert_eq!(value["found"], true);
    }

    /// **Scenario**: structuredContent is the fallback when no text blocks.
    #[test]
    fn parse_call_tool_result_structured_fallback() {
        let result = ResultMessage::success(
            "1",
            json!({"structuredContent": {"ok": true, "count": 2}}),
        );
        let value = parse_call_tool_result(result).unwrap();
        assert_eq!(value["ok"], true);
    }

    /// **Scenario**: isError results and JSON-RPC errors surface as errors.
    #[test]
    fn parse_call_tool_result_errors() {
        let is_error = ResultMessage::success(
            "1",
            json!({
                "isError": true,
                "content": [{"type": "text", "text": "boom"}]
            }),
        );
        assert!(matches!(
            parse_call_tool_result(is_error),
            Err(TransportError::JsonRpc(msg)) if msg == "boom"
        ));

        let missing = ResultMessage::success("1", json!({}));
        assert!(matches!(
            parse_call_tool_result(missing),
            Err(TransportError::Protocol(_))
        ));

        let rpc_err = ResultMessage::failure("1", ErrorObject::new(-32000, "call failed", None));
        assert!(matches!(
            parse_call_tool_result(rpc_err),
            Err(TransportError::JsonRpc(msg)) if msg == "call failed"
        ));
    }

    /// **Scenario**: search path prepends cwd ahead of any existing value.
    #[test]
    fn prepend_search_path_includes_cwd_first() {
        let path = prepend_search_path(std::path::Path::new("/srv/tools"));
        assert!(path.starts_with("/srv/tools"));
    }
}
