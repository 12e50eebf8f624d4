//! Meta-tools exposed to the tool-calling consumer.
//!
//! Instead of one tool per FortiManager operation, the consumer sees a
//! handful of meta-tools for discovery, execution and health. The full
//! operation catalog stays behind `execute_operation` and only the modules
//! actually used are ever loaded.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::catalog::{DiscoveryService, OperationDescriptor, DEFAULT_SEARCH_LIMIT};
use crate::dispatch::{DispatchError, DispatchExecutor};
use crate::rpc::SessionPhase;

pub const SEARCH_OPERATIONS: &str = "search_operations";
pub const LIST_OPERATION_CATEGORIES: &str = "list_operation_categories";
pub const GET_OPERATION_INFO: &str = "get_operation_info";
pub const EXECUTE_OPERATION: &str = "execute_operation";
pub const OPERATIONS_HELP: &str = "operations_help";
pub const HEALTH_CHECK: &str = "health_check";

/// Suggestions attached to an unknown-operation error.
const MAX_SUGGESTIONS: usize = 3;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Tool definition as listed by `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Result of one tool call. `content` is the JSON envelope; `is_error`
/// marks envelopes with `status: "error"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: Value,
    pub is_error: bool,
}

impl ToolOutcome {
    fn success(content: Value) -> Self {
        Self { content, is_error: false }
    }

    fn error(content: Value) -> Self {
        Self { content, is_error: true }
    }
}

// ─── MetaTools ───────────────────────────────────────────────────────────────

pub struct MetaTools {
    discovery: DiscoveryService,
    executor: Arc<DispatchExecutor>,
}

impl MetaTools {
    pub fn new(executor: Arc<DispatchExecutor>) -> Self {
        Self {
            discovery: DiscoveryService::new(executor.registry().clone()),
            executor,
        }
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.discovery
    }

    pub fn executor(&self) -> &Arc<DispatchExecutor> {
        &self.executor
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: SEARCH_OPERATIONS,
                description: "Search FortiManager operations by keyword. Returns matching \
                              operation names with their parameters. Use before execute_operation.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Keywords, e.g. \"firewall address\""},
                        "category": {"type": "string", "description": "Restrict to one category"},
                        "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": DEFAULT_SEARCH_LIMIT}
                    }
                }),
            },
            ToolDefinition {
                name: LIST_OPERATION_CATEGORIES,
                description: "List operation categories with the number of operations in each.",
                input_schema: json!({"type": "object", "properties": {}}),
            },
            ToolDefinition {
                name: GET_OPERATION_INFO,
                description: "Describe one operation: parameters, types, defaults and which are required.",
                input_schema: json!({
                    "type": "object",
                    "properties": {"operation": {"type": "string"}},
                    "required": ["operation"]
                }),
            },
            ToolDefinition {
                name: EXECUTE_OPERATION,
                description: "Execute a FortiManager operation by name with the given arguments.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "operation": {"type": "string"},
                        "arguments": {"type": "object", "description": "Operation parameters"}
                    },
                    "required": ["operation"]
                }),
            },
            ToolDefinition {
                name: OPERATIONS_HELP,
                description: "How to find and run FortiManager operations.",
                input_schema: json!({"type": "object", "properties": {}}),
            },
            ToolDefinition {
                name: HEALTH_CHECK,
                description: "Report bridge health: session state, endpoint and loaded modules.",
                input_schema: json!({"type": "object", "properties": {}}),
            },
        ]
    }

    /// Run one meta-tool. Operation failures come back as error
    /// envelopes; only an unknown tool name is an `Err`.
    pub async fn call(&self, tool: &str, arguments: Value) -> Result<ToolOutcome, ToolError> {
        let outcome = match tool {
            SEARCH_OPERATIONS => self.search_operations(&arguments),
            LIST_OPERATION_CATEGORIES => self.list_operation_categories(),
            GET_OPERATION_INFO => self.get_operation_info(&arguments),
            EXECUTE_OPERATION => self.execute_operation(arguments).await,
            OPERATIONS_HELP => ToolOutcome::success(self.operations_help()),
            HEALTH_CHECK => ToolOutcome::success(self.health_check()),
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };
        Ok(outcome)
    }

    fn search_operations(&self, args: &Value) -> ToolOutcome {
        let query = args.get("query").and_then(Value::as_str).unwrap_or("");
        let category = args
            .get("category")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty());
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_SEARCH_LIMIT, |l| l as usize);

        let hits = self.discovery.search(query, category, limit);
        let operations: Vec<Value> = hits
            .iter()
            .map(|hit| {
                let op = hit.descriptor;
                json!({
                    "name": op.name,
                    "category": op.category,
                    "description": op.description,
                    "parameters": op.parameters,
                    "requires_adom": op.requires_adom,
                    "score": hit.score,
                })
            })
            .collect();

        let tip = if operations.is_empty() {
            "No matches. Try broader keywords or list_operation_categories."
        } else {
            "Use get_operation_info for details, then execute_operation to run one."
        };

        ToolOutcome::success(json!({
            "status": "success",
            "count": operations.len(),
            "query": query,
            "category": category,
            "operations": operations,
            "tip": tip,
        }))
    }

    fn list_operation_categories(&self) -> ToolOutcome {
        let categories = self.discovery.list_categories();
        ToolOutcome::success(json!({
            "status": "success",
            "total_operations": self.discovery.registry().len(),
            "categories": categories,
            "tip": "Use search_operations with a category to see its operations.",
        }))
    }

    fn get_operation_info(&self, args: &Value) -> ToolOutcome {
        let Some(name) = args.get("operation").and_then(Value::as_str) else {
            return missing_operation_field();
        };

        match self.discovery.describe(name) {
            Ok(op) => ToolOutcome::success(json!({
                "status": "success",
                "operation": op,
                "usage": usage_example(op),
            })),
            Err(e) => {
                let err = DispatchError::from(e);
                ToolOutcome::error(error_envelope(name, &err))
            }
        }
    }

    async fn execute_operation(&self, args: Value) -> ToolOutcome {
        let Some(name) = args.get("operation").and_then(Value::as_str).map(str::to_owned) else {
            return missing_operation_field();
        };
        let arguments = args
            .get("arguments")
            .or_else(|| args.get("parameters"))
            .cloned()
            .unwrap_or(Value::Null);

        match self.executor.execute_value(&name, arguments).await {
            Ok(result) => ToolOutcome::success(json!({
                "status": "success",
                "operation": name,
                "result": result,
            })),
            Err(err) => ToolOutcome::error(error_envelope(&name, &err)),
        }
    }

    /// Local state only; never calls the platform.
    fn health_check(&self) -> Value {
        let session = self.executor.client().session();
        json!({
            "status": "success",
            "healthy": session.phase() != SessionPhase::Closed,
            "session_phase": session.phase(),
            "auth_mode": if session.is_session_based() { "session" } else { "token" },
            "endpoint": session.endpoint(),
            "total_operations": self.discovery.registry().len(),
            "loaded_modules": self.executor.loaded_modules(),
        })
    }

    fn operations_help(&self) -> Value {
        json!({
            "status": "success",
            "total_operations": self.discovery.registry().len(),
            "workflow": [
                "1. list_operation_categories to see what areas are covered",
                "2. search_operations with keywords (optionally a category)",
                "3. get_operation_info for parameters and defaults",
                "4. execute_operation with {\"operation\": name, \"arguments\": {...}}"
            ],
            "notes": [
                "Most operations take an 'adom' argument; it defaults to 'root' where declared.",
                "Changes in workspace mode need lock_adom before and commit_adom after.",
                "Errors carry a kind (e.g. ObjectNotFoundError) and the platform status code."
            ],
        })
    }
}

// ─── Envelopes ───────────────────────────────────────────────────────────────

fn missing_operation_field() -> ToolOutcome {
    ToolOutcome::error(json!({
        "status": "error",
        "error": "InvalidArgumentError",
        "message": "'operation' is required and must be a string",
        "tip": "Pass {\"operation\": \"<name>\"}.",
    }))
}

fn error_envelope(operation: &str, err: &DispatchError) -> Value {
    let mut envelope = json!({
        "status": "error",
        "error": err.kind(),
        "message": err.to_string(),
        "operation": operation,
    });

    if let Some(code) = err.code() {
        envelope["code"] = json!(code);
    }
    let suggestions: Vec<&String> = err.suggestions().iter().take(MAX_SUGGESTIONS).collect();
    if !suggestions.is_empty() {
        envelope["suggestions"] = json!(suggestions);
    }
    envelope["tip"] = json!(tip_for(err.kind()));
    envelope
}

fn tip_for(kind: &str) -> &'static str {
    match kind {
        "NotFoundError" => "Use search_operations to find the right operation name.",
        "InvalidArgumentError" => "Use get_operation_info to check parameter names and types.",
        "ObjectNotFoundError" => "Check the object name and ADOM.",
        "ObjectExistsError" => "The object already exists; update it instead.",
        "PermissionDeniedError" => "The API user lacks rights, or the ADOM is locked by someone else.",
        "SessionExpiredError" | "AuthenticationError" => "Check the configured FortiManager credentials.",
        "TimeoutError" | "ConnectionError" => "FortiManager is unreachable or slow; retry later.",
        _ => "See the message for details.",
    }
}

fn usage_example(op: &OperationDescriptor) -> Value {
    let arguments: serde_json::Map<String, Value> = op
        .parameters
        .iter()
        .filter(|(_, spec)| spec.required)
        .map(|(name, spec)| (name.clone(), json!(format!("<{}>", spec.param_type.as_str()))))
        .collect();
    json!({
        "tool": EXECUTE_OPERATION,
        "arguments": { "operation": op.name, "arguments": arguments },
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
