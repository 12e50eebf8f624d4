//! Line-delimited JSON-RPC 2.0 server over stdio.
//!
//! Speaks the tool subset of MCP: `initialize`, `ping`, `tools/list`,
//! `tools/call`. Each request runs on its own task; replies go through a
//! single writer task so lines never interleave.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::tools::{MetaTools, ToolError};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "fmg-bridge";

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
}

const INSTRUCTIONS: &str = "FortiManager operations are reached through meta-tools. \
    Call search_operations or list_operation_categories to find an operation, \
    get_operation_info to see its parameters, then execute_operation to run it.";

const OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Serialize)]
struct ErrorObject {
    code: i32,
    message: String,
}

#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorObject>,
}

impl Response {
    fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ErrorObject { code, message: message.into() }),
        }
    }
}

// ─── Serve Loop ──────────────────────────────────────────────────────────────

/// Serve requests from `reader` until EOF, then wait for in-flight
/// requests to finish and their replies to be written.
pub async fn serve<R, W>(tools: Arc<MetaTools>, mut reader: R, writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Response>(OUTBOUND_QUEUE);
    let writer_task = tokio::spawn(write_loop(writer, rx));
    let mut tasks = JoinSet::new();
    let mut buf = Vec::new();

    tracing::info!("serving on stdio");

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("failed to read request")?;
        if read == 0 {
            break;
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let message: Value = match serde_json::from_slice(&buf) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "unparsable request line");
                let reply = Response::error(Value::Null, error_codes::PARSE_ERROR, format!("parse error: {e}"));
                if tx.send(reply).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let tools = tools.clone();
        let tx = tx.clone();
        tasks.spawn(async move {
            if let Some(reply) = handle_message(&tools, message).await {
                // Receiver gone means the writer failed; its error is reported below.
                let _ = tx.send(reply).await;
            }
        });

        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                tracing::error!(error = %e, "request task panicked");
            }
        }
    }

    tracing::info!(in_flight = tasks.len(), "input closed, draining");
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "request task panicked");
        }
    }

    drop(tx);
    writer_task.await.context("writer task panicked")?
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Response>) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = rx.recv().await {
        let mut line = serde_json::to_string(&reply).context("failed to serialize reply")?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .context("failed to write reply")?;
        writer.flush().await.context("failed to flush reply")?;
    }
    Ok(())
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// Handle one parsed message. `None` for notifications.
async fn handle_message(tools: &MetaTools, message: Value) -> Option<Response> {
    if !message.is_object() {
        return Some(Response::error(
            Value::Null,
            error_codes::INVALID_REQUEST,
            "request must be a JSON object",
        ));
    }
    let id = message.get("id").filter(|id| !id.is_null()).cloned();
    let Some(method) = message.get("method").and_then(Value::as_str) else {
        return id.map(|id| Response::error(id, error_codes::INVALID_REQUEST, "missing method"));
    };
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    let Some(id) = id else {
        tracing::debug!(method = %method, "notification");
        return None;
    };

    tracing::debug!(method = %method, id = %id, "request");
    let reply = match method {
        "initialize" => Response::success(id, initialize_result()),
        "ping" => Response::success(id, json!({})),
        "tools/list" => Response::success(id, json!({ "tools": tools.definitions() })),
        "tools/call" => call_tool(tools, id, params).await,
        other => Response::error(id, error_codes::METHOD_NOT_FOUND, format!("method not found: {other}")),
    };
    Some(reply)
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
        "instructions": INSTRUCTIONS,
    })
}

async fn call_tool(tools: &MetaTools, id: Value, params: Value) -> Response {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return Response::error(id, error_codes::INVALID_PARAMS, "tools/call requires 'name'");
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match tools.call(name, arguments).await {
        Ok(outcome) => {
            let text = serde_json::to_string_pretty(&outcome.content)
                .unwrap_or_else(|_| outcome.content.to_string());
            Response::success(
                id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": outcome.is_error,
                }),
            )
        }
        Err(ToolError::UnknownTool(name)) => {
            Response::error(id, error_codes::METHOD_NOT_FOUND, format!("unknown tool: {name}"))
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use crate::catalog::{CatalogEntry, OperationRegistry};
    use crate::dispatch::{operation, DispatchExecutor, FnLoader, ModuleTable};
    use crate::rpc::client::DEFAULT_TIMEOUT;
    use crate::rpc::transport::testing::{ok_response, token_session, MockTransport};
    use crate::rpc::RpcClient;

    fn tools(transport: Arc<MockTransport>) -> Arc<MetaTools> {
        let mut registry = OperationRegistry::new();
        registry
            .register(CatalogEntry::new("list_adoms", "adom_mod", "adom", "List ADOMs"))
            .unwrap();
        registry.freeze();

        let client = Arc::new(RpcClient::new(token_session(transport), DEFAULT_TIMEOUT));
        let executor = DispatchExecutor::new(Arc::new(registry), client).with_loader(
            "adom_mod",
            Arc::new(FnLoader::new(|| {
                ModuleTable::new("adom_mod").with_operation(
                    "list_adoms",
                    operation(|client, _| async move {
                        client.get("/dvmdb/adom").await.map(|d| d.unwrap_or_default())
                    }),
                )
            })),
        );
        Arc::new(MetaTools::new(Arc::new(executor)))
    }

    /// Feed `input` to the server and collect the reply lines.
    async fn exchange(tools: Arc<MetaTools>, input: &str) -> Vec<Value> {
        exchange_bytes(tools, input.as_bytes()).await
    }

    async fn exchange_bytes(tools: Arc<MetaTools>, input: &[u8]) -> Vec<Value> {
        let (out_write, mut out_read) = tokio::io::duplex(64 * 1024);
        serve(tools, input, out_write).await.unwrap();

        let mut raw = String::new();
        out_read.read_to_string(&mut raw).await.unwrap();
        raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#, "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#, "\n",
        );
        let mut replies = exchange(tools(Arc::new(MockTransport::ok())), input).await;
        replies.sort_by_key(|r| r["id"].as_i64());

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(replies[0]["result"]["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(replies[1]["result"]["tools"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_tools_call_executes_operation() {
        let transport = Arc::new(MockTransport::new(|req, _, _| {
            Ok(ok_response(req.url(), Some(json!([{"name": "root"}]))))
        }));
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"execute_operation","arguments":{"operation":"list_adoms"}}}"#,
            "\n"
        );
        let replies = exchange(tools(transport.clone()), input).await;

        let result = &replies[0]["result"];
        assert_eq!(replies[0]["id"], "a");
        assert_eq!(result["isError"], false);
        let envelope: Value =
            serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(envelope["result"], json!([{"name": "root"}]));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let input = concat!(
            "this is not json\n",
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"nope"}}"#, "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{}}"#, "\n",
        );
        let replies = exchange(tools(Arc::new(MockTransport::ok())), input).await;
        assert_eq!(replies.len(), 4);

        let code_for = |id: Value| {
            replies
                .iter()
                .find(|r| r["id"] == id)
                .map(|r| r["error"]["code"].clone())
                .unwrap()
        };
        assert_eq!(code_for(Value::Null), error_codes::PARSE_ERROR);
        assert_eq!(code_for(json!(1)), error_codes::METHOD_NOT_FOUND);
        assert_eq!(code_for(json!(2)), error_codes::METHOD_NOT_FOUND);
        assert_eq!(code_for(json!(3)), error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_ping() {
        let transport = Arc::new(MockTransport::ok().with_delay(Duration::from_millis(50)));
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"execute_operation","arguments":{"operation":"list_adoms"}}}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#, "\n",
        );
        let replies = exchange(tools(transport), input).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 2);
        assert_eq!(replies[1]["id"], 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_keeps_serving() {
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#);
        input.push(b'\n');

        let replies = exchange_bytes(tools(Arc::new(MockTransport::ok())), &input).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], Value::Null);
        assert_eq!(replies[0]["error"]["code"], error_codes::PARSE_ERROR);
        assert_eq!(replies[1]["id"], 7);
        assert_eq!(replies[1]["result"]["tools"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_non_object_message_is_invalid_request() {
        let input = concat!("5\n", "[1]\n", r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#, "\n");
        let replies = exchange(tools(Arc::new(MockTransport::ok())), input).await;
        assert_eq!(replies.len(), 3);

        let invalid: Vec<&Value> = replies
            .iter()
            .filter(|r| r["error"]["code"] == error_codes::INVALID_REQUEST)
            .collect();
        assert_eq!(invalid.len(), 2);
        assert!(invalid.iter().all(|r| r["id"].is_null()));
        assert!(replies.iter().any(|r| r["id"] == 1 && r.get("result").is_some()));
    }
}
