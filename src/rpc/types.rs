//! Wire types for the FortiManager JSON-RPC API.
//!
//! The platform speaks a JSON-RPC dialect: every request carries a verb
//! (`get`, `add`, ...) and a list of `{url, data}` params, and every
//! response carries one `{url, status, data}` entry per param.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ─── Verbs ──────────────────────────────────────────────────────────────────

/// JSON-RPC method understood by the remote platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    Add,
    Set,
    Update,
    Delete,
    Exec,
    Clone,
    Move,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Add => "add",
            Verb::Set => "set",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::Exec => "exec",
            Verb::Clone => "clone",
            Verb::Move => "move",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Requests ───────────────────────────────────────────────────────────────

/// One entry of the `params` array.
///
/// Verb options such as `fields`, `filter` or `loadsub` sit beside `url`
/// on the wire, so they are flattened into the same object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcParam {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl RpcParam {
    pub fn new(url: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            url: url.into(),
            data,
            options: Map::new(),
        }
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options.extend(options);
        self
    }
}

/// A logical call, before the session manager stamps it with an id and
/// credential. Kept separate from [`RpcRequest`] so that a retried call is
/// re-sent with a fresh id and the current session.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: Verb,
    pub params: Vec<RpcParam>,
}

impl RpcCall {
    pub fn new(method: Verb, param: RpcParam) -> Self {
        Self {
            method,
            params: vec![param],
        }
    }

    /// The first param's URL, used as context in errors and logs.
    pub fn url(&self) -> &str {
        self.params.first().map(|p| p.url.as_str()).unwrap_or("")
    }
}

/// The envelope actually posted to the endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: Verb,
    pub params: Vec<RpcParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub verbose: u8,
}

impl RpcRequest {
    pub fn new(id: u64, call: &RpcCall, session: Option<String>) -> Self {
        Self {
            id,
            method: call.method,
            params: call.params.clone(),
            session,
            verbose: 1,
        }
    }

    pub fn url(&self) -> &str {
        self.params.first().map(|p| p.url.as_str()).unwrap_or("")
    }
}

// ─── Responses ──────────────────────────────────────────────────────────────

/// Response envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub result: Vec<RpcResult>,
    #[serde(
        default,
        deserialize_with = "deserialize_session",
        skip_serializing_if = "Option::is_none"
    )]
    pub session: Option<String>,
}

impl RpcResponse {
    /// Whether any entry reports the given status code.
    pub fn has_status(&self, code: i64) -> bool {
        self.result.iter().any(|r| r.status.code == code)
    }
}

/// One entry of the `result` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResult {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: RpcStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Session ids come back as strings on current firmware and as integers on
/// some older builds.
fn deserialize_session<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ─── Status Codes ───────────────────────────────────────────────────────────

/// Status codes with a distinct meaning on the remote platform.
pub mod status_codes {
    pub const OK: i64 = 0;
    pub const INTERNAL: i64 = -1;
    pub const OBJECT_EXISTS: i64 = -2;
    pub const OBJECT_NOT_FOUND: i64 = -3;
    pub const PERMISSION_DENIED: i64 = -4;
    pub const INVALID_FORMAT: i64 = -5;
    pub const INVALID_ARGUMENT: i64 = -6;
    pub const ACTION_NOT_ALLOWED: i64 = -10;
    pub const NO_RESOURCE_PERMISSION: i64 = -11;
    pub const SESSION_EXPIRED: i64 = -20;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
