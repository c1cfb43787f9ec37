//! Model Context Protocol tools over stdio.
//!
//! Each configured server is a command that speaks newline-delimited
//! JSON-RPC 2.0 on its stdin/stdout.  [`McpToolbox::load`] starts every
//! server once to collect its tool list; [`McpToolbox::call_tool`] starts the
//! owning server again for each call (`initialize` → `tools/call`) and shuts
//! it down afterwards, so a crashed or wedged server only costs one call.
//!
//! Server list format:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "anki": { "command": "uv", "args": ["run", "servers/anki.py"] }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::tools::{render_value, ToolError, ToolInvoker, ToolSpec};

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Upper bound for one server start-up plus request.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Server list
// ---------------------------------------------------------------------------

/// How to launch one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Contents of the server list file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServersFile {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, ServerParams>,
}

impl ServersFile {
    pub fn parse(json: &str) -> Result<Self, ToolError> {
        serde_json::from_str(json).map_err(|e| ToolError::Config(e.to_string()))
    }

    pub fn read(path: &Path) -> Result<Self, ToolError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ToolError::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&json)
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

// ---------------------------------------------------------------------------
// McpSession
// ---------------------------------------------------------------------------

/// One JSON-RPC conversation over a line-oriented byte stream.
pub struct McpSession<R, W> {
    reader: R,
    writer: W,
    next_id: u64,
    line: String,
}

impl<R, W> McpSession<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            next_id: 1,
            line: String::new(),
        }
    }

    async fn send(&mut self, request: &JsonRpcRequest<'_>) -> Result<(), ToolError> {
        let mut bytes =
            serde_json::to_vec(request).map_err(|e| ToolError::Protocol(e.to_string()))?;
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a request and wait for the response with the same id.
    ///
    /// Server-initiated notifications and unparseable lines (log output on
    /// stdout) are skipped.
    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params: Some(params),
        })
        .await?;

        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Err(ToolError::Protocol(format!(
                    "server closed the connection during {method}"
                )));
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response: JsonRpcResponse = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(_) => {
                    log::debug!("mcp: ignoring non-JSON line: {trimmed}");
                    continue;
                }
            };
            if response.method.is_some() || response.id != Some(Value::from(id)) {
                continue;
            }
            if let Some(error) = response.error {
                return Err(ToolError::Protocol(format!(
                    "{method} failed ({}): {}",
                    error.code, error.message
                )));
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&mut self, method: &str) -> Result<(), ToolError> {
        self.send(&JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        })
        .await
    }

    /// `initialize` handshake followed by `notifications/initialized`.
    pub async fn initialize(&mut self) -> Result<(), ToolError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        self.request("initialize", params).await?;
        self.notify("notifications/initialized").await
    }

    pub async fn list_tools(&mut self) -> Result<Vec<ToolSpec>, ToolError> {
        let result = self.request("tools/list", serde_json::json!({})).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(tools).map_err(|e| ToolError::Protocol(e.to_string()))
    }

    /// `tools/call`, with the result rendered as text.
    pub async fn call_tool(&mut self, name: &str, args: &Value) -> Result<String, ToolError> {
        let params = serde_json::json!({ "name": name, "arguments": args });
        let result = self.request("tools/call", params).await?;
        tool_result_text(&result)
    }
}

/// Extract the text of a `tools/call` result.
///
/// * `isError: true` → [`ToolError::Failed`] with the first text block.
/// * `structuredContent.result` when present, else the whole
///   `structuredContent`, else the text blocks joined by newlines.
fn tool_result_text(result: &Value) -> Result<String, ToolError> {
    let texts = || -> Vec<String> {
        result
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        let message = texts()
            .into_iter()
            .next()
            .unwrap_or_else(|| "tool reported an error".to_string());
        return Err(ToolError::Failed(message));
    }

    if let Some(structured) = result.get("structuredContent").filter(|v| !v.is_null()) {
        return Ok(render_value(structured.get("result").unwrap_or(structured)));
    }

    Ok(texts().join("\n"))
}

// ---------------------------------------------------------------------------
// Server process
// ---------------------------------------------------------------------------

type StdioSession = McpSession<BufReader<ChildStdout>, ChildStdin>;

/// A spawned server with an initialized session.  Killed on drop.
struct ServerProcess {
    _child: Child,
    session: StdioSession,
}

impl ServerProcess {
    async fn start(name: &str, params: &ServerParams) -> Result<Self, ToolError> {
        let spawn_err = |source| ToolError::Spawn {
            server: name.to_string(),
            source,
        };

        let mut child = Command::new(&params.command)
            .args(&params.args)
            .envs(&params.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Protocol(format!("{name}: stdin unavailable")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Protocol(format!("{name}: stdout unavailable")))?;

        let mut session = McpSession::new(BufReader::new(stdout), stdin);
        session.initialize().await?;

        Ok(Self {
            _child: child,
            session,
        })
    }
}

// ---------------------------------------------------------------------------
// McpToolbox
// ---------------------------------------------------------------------------

/// Tools gathered from every configured MCP server.
pub struct McpToolbox {
    servers: BTreeMap<String, ServerParams>,
    tools: Vec<ToolSpec>,
    /// Tool name → server name.
    owners: HashMap<String, String>,
    timeout: Duration,
}

impl McpToolbox {
    /// Start each server once and collect its tools.
    ///
    /// A server that fails to start or list its tools is logged and skipped.
    pub async fn load(servers: ServersFile, timeout: Duration) -> Self {
        let mut toolbox = Self {
            servers: BTreeMap::new(),
            tools: Vec::new(),
            owners: HashMap::new(),
            timeout,
        };

        for (name, params) in servers.mcp_servers {
            let listed = tokio::time::timeout(timeout, async {
                let mut server = ServerProcess::start(&name, &params).await?;
                server.session.list_tools().await
            })
            .await
            .unwrap_or(Err(ToolError::Timeout));

            match listed {
                Ok(tools) => {
                    log::info!(
                        "mcp: {name} provides {:?}",
                        tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
                    );
                    toolbox.add_server(name, params, tools);
                }
                Err(e) => log::warn!("mcp: skipping server {name}: {e}"),
            }
        }

        toolbox
    }

    /// Read the server list at `path` and [`load`](Self::load) it.
    pub async fn from_file(path: &Path, timeout: Duration) -> Result<Self, ToolError> {
        let servers = ServersFile::read(path)?;
        Ok(Self::load(servers, timeout).await)
    }

    fn add_server(&mut self, name: String, params: ServerParams, tools: Vec<ToolSpec>) {
        for tool in tools {
            if let Some(previous) = self.owners.insert(tool.name.clone(), name.clone()) {
                log::warn!("mcp: tool {} of {previous} is shadowed by {name}", tool.name);
                self.tools.retain(|t| t.name != tool.name);
            }
            self.tools.push(tool);
        }
        self.servers.insert(name, params);
    }
}

#[async_trait]
impl ToolInvoker for McpToolbox {
    fn tools(&self) -> Vec<ToolSpec> {
        self.tools.clone()
    }

    async fn call_tool(&self, name: &str, args: &Value) -> Result<String, ToolError> {
        let server = self
            .owners
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let params = self
            .servers
            .get(server)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        tokio::time::timeout(self.timeout, async {
            let mut process = ServerProcess::start(server, params).await?;
            process.session.call_tool(name, args).await
        })
        .await
        .unwrap_or(Err(ToolError::Timeout))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    type TestSession = McpSession<BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>>;

    /// Minimal in-process MCP server: one `add` tool and one `fail` tool.
    async fn fake_server(stream: DuplexStream) {
        let (read, mut write) = split(stream);
        let mut lines = BufReader::new(read).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let Some(id) = request.get("id").cloned() else {
                continue; // notification
            };

            let result = match request["method"].as_str().unwrap() {
                "initialize" => serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "fake", "version": "0" }
                }),
                "tools/list" => serde_json::json!({
                    "tools": [
                        { "name": "add", "description": "Add two numbers",
                          "inputSchema": { "type": "object" } },
                        { "name": "fail" }
                    ]
                }),
                "tools/call" if request["params"]["name"] == "add" => {
                    let a = request["params"]["arguments"]["a"].as_i64().unwrap();
                    let b = request["params"]["arguments"]["b"].as_i64().unwrap();
                    serde_json::json!({
                        "content": [{ "type": "text", "text": (a + b).to_string() }],
                        "structuredContent": { "result": a + b },
                        "isError": false
                    })
                }
                "tools/call" => serde_json::json!({
                    "content": [{ "type": "text", "text": "deck not found" }],
                    "isError": true
                }),
                other => {
                    let reply = serde_json::json!({
                        "jsonrpc": "2.0", "id": id,
                        "error": { "code": -32601, "message": format!("no method {other}") }
                    });
                    write.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
                    continue;
                }
            };

            // Log noise and an unrelated notification before the reply.
            write.write_all(b"starting up...\n").await.unwrap();
            let note = serde_json::json!({ "jsonrpc": "2.0", "method": "notifications/message" });
            write.write_all(format!("{note}\n").as_bytes()).await.unwrap();

            let reply = serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result });
            write.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
        }
    }

    fn connect() -> TestSession {
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(fake_server(server));
        let (read, write) = split(client);
        McpSession::new(BufReader::new(read), write)
    }

    #[tokio::test]
    async fn initialize_then_list_tools() {
        let mut session = connect();
        session.initialize().await.unwrap();
        let tools = session.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["add", "fail"]);
        assert_eq!(tools[0].description, "Add two numbers");
    }

    #[tokio::test]
    async fn call_returns_structured_result() {
        let mut session = connect();
        session.initialize().await.unwrap();
        let out = session
            .call_tool("add", &serde_json::json!({ "a": 2, "b": 40 }))
            .await
            .unwrap();
        assert_eq!(out, "42");
    }

    #[tokio::test]
    async fn tool_error_becomes_failed() {
        let mut session = connect();
        session.initialize().await.unwrap();
        let err = session
            .call_tool("fail", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "deck not found");
    }

    #[tokio::test]
    async fn json_rpc_error_is_a_protocol_error() {
        let mut session = connect();
        let err = session
            .request("resources/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Protocol(m) if m.contains("-32601")));
    }

    #[tokio::test]
    async fn closed_stream_is_a_protocol_error() {
        let (client, server) = duplex(1024);
        drop(server);
        let (read, write) = split(client);
        let mut session = McpSession::new(BufReader::new(read), write);
        assert!(session.initialize().await.is_err());
    }

    #[test]
    fn text_content_used_without_structured_result() {
        let result = serde_json::json!({
            "content": [{ "type": "text", "text": "a" }, { "type": "text", "text": "b" }]
        });
        assert_eq!(tool_result_text(&result).unwrap(), "a\nb");
    }

    #[test]
    fn structured_content_without_result_key_is_rendered_whole() {
        let result = serde_json::json!({ "structuredContent": { "cards": 3 } });
        assert_eq!(tool_result_text(&result).unwrap(), r#"{"cards":3}"#);
    }

    #[test]
    fn servers_file_parses_mcp_layout() {
        let file = ServersFile::parse(
            r#"{ "mcpServers": { "anki": { "command": "uv", "args": ["run", "anki.py"] } } }"#,
        )
        .unwrap();
        let anki = &file.mcp_servers["anki"];
        assert_eq!(anki.command, "uv");
        assert_eq!(anki.args, vec!["run", "anki.py"]);
        assert!(anki.env.is_empty());
    }

    #[test]
    fn malformed_servers_file_is_a_config_error() {
        assert!(matches!(ServersFile::parse("{"), Err(ToolError::Config(_))));
    }

    #[test]
    fn missing_servers_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServersFile::read(&dir.path().join("servers.json")).unwrap_err();
        assert!(matches!(err, ToolError::Config(_)));
    }

    #[tokio::test]
    async fn unstartable_server_is_skipped() {
        let mut servers = ServersFile::default();
        servers.mcp_servers.insert(
            "ghost".into(),
            ServerParams {
                command: "/nonexistent/mcp-server".into(),
                args: Vec::new(),
                env: BTreeMap::new(),
            },
        );
        let toolbox = McpToolbox::load(servers, Duration::from_secs(5)).await;
        assert!(toolbox.tools().is_empty());
        assert!(matches!(
            toolbox.call_tool("add", &Value::Null).await,
            Err(ToolError::UnknownTool(_))
        ));
    }

    #[test]
    fn later_server_shadows_duplicate_tool() {
        let mut toolbox = McpToolbox {
            servers: BTreeMap::new(),
            tools: Vec::new(),
            owners: HashMap::new(),
            timeout: DEFAULT_CALL_TIMEOUT,
        };
        let params = ServerParams {
            command: "x".into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        };
        let spec = |name: &str| ToolSpec {
            name: name.into(),
            description: String::new(),
            input_schema: Value::Null,
        };
        toolbox.add_server("a".into(), params.clone(), vec![spec("search"), spec("add")]);
        toolbox.add_server("b".into(), params, vec![spec("search")]);

        assert_eq!(toolbox.tools().len(), 2);
        assert_eq!(toolbox.owners["search"], "b");
    }
}
