//! RPC client.
//!
//! Turns a logical invocation (`url`, verb, payload) into a request
//! envelope, sends it through the [`SessionManager`], and turns the
//! response envelope back into either the `data` payload or a classified
//! [`RpcError`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use super::errors::RpcError;
use super::session::SessionManager;
use super::types::{status_codes, RpcCall, RpcParam, RpcResponse, Verb};

/// Default per-call deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for `get` calls.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Restrict returned attributes.
    pub fields: Option<Vec<String>>,
    /// Platform filter expression, e.g. `["name", "==", "root"]`.
    pub filter: Option<Value>,
    /// Whether sub-tables are expanded. The platform default is on.
    pub loadsub: Option<bool>,
    /// `[offset, count]` paging.
    pub range: Option<(u64, u64)>,
}

impl GetOptions {
    fn into_map(self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(fields) = self.fields {
            map.insert("fields".into(), Value::from(fields));
        }
        if let Some(filter) = self.filter {
            map.insert("filter".into(), filter);
        }
        map.insert(
            "loadsub".into(),
            Value::from(u8::from(self.loadsub.unwrap_or(true))),
        );
        if let Some((offset, count)) = self.range {
            map.insert("range".into(), Value::from(vec![offset, count]));
        }
        map
    }
}

// ─── RpcClient ───────────────────────────────────────────────────────────────

/// Shared by every operation implementation.
pub struct RpcClient {
    session: Arc<SessionManager>,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(session: Arc<SessionManager>, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invoke `verb` on `url`, returning the first result's `data`.
    pub async fn invoke(
        &self,
        url: &str,
        verb: Verb,
        payload: Option<Value>,
    ) -> Result<Option<Value>, RpcError> {
        self.invoke_with(url, verb, payload, Map::new()).await
    }

    /// Like [`invoke`](Self::invoke) with extra param options beside `url`.
    pub async fn invoke_with(
        &self,
        url: &str,
        verb: Verb,
        payload: Option<Value>,
        options: Map<String, Value>,
    ) -> Result<Option<Value>, RpcError> {
        let call = RpcCall::new(verb, RpcParam::new(url, payload).with_options(options));
        let start = Instant::now();

        let response = tokio::time::timeout(self.timeout, self.session.call(&call))
            .await
            .map_err(|_| {
                tracing::warn!(url = %url, verb = %verb, timeout_ms = self.timeout.as_millis() as u64, "request timed out");
                RpcError::Timeout {
                    url: url.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            })??;

        let outcome = Self::extract_data(url, response);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => tracing::debug!(url = %url, verb = %verb, elapsed_ms, "request ok"),
            Err(e) => tracing::debug!(url = %url, verb = %verb, elapsed_ms, error = %e, "request failed"),
        }
        outcome
    }

    /// The first non-zero status wins; otherwise the first entry's data.
    fn extract_data(url: &str, response: RpcResponse) -> Result<Option<Value>, RpcError> {
        if response.result.is_empty() {
            return Err(RpcError::MalformedResponse {
                reason: format!("empty result list for '{url}'"),
            });
        }
        if let Some(failed) = response
            .result
            .iter()
            .find(|r| r.status.code != status_codes::OK)
        {
            let at = if failed.url.is_empty() { url } else { failed.url.as_str() };
            return Err(RpcError::from_status(failed.status.code, &failed.status.message, at));
        }
        Ok(response.result.into_iter().next().and_then(|r| r.data))
    }

    // ─── Convenience Verbs ───────────────────────────────────────────────

    pub async fn get(&self, url: &str) -> Result<Option<Value>, RpcError> {
        self.get_with(url, GetOptions::default()).await
    }

    pub async fn get_with(
        &self,
        url: &str,
        options: GetOptions,
    ) -> Result<Option<Value>, RpcError> {
        self.invoke_with(url, Verb::Get, None, options.into_map()).await
    }

    pub async fn add(&self, url: &str, data: Value) -> Result<Option<Value>, RpcError> {
        self.invoke(url, Verb::Add, Some(data)).await
    }

    pub async fn set(&self, url: &str, data: Value) -> Result<Option<Value>, RpcError> {
        self.invoke(url, Verb::Set, Some(data)).await
    }

    pub async fn update(&self, url: &str, data: Value) -> Result<Option<Value>, RpcError> {
        self.invoke(url, Verb::Update, Some(data)).await
    }

    pub async fn delete(&self, url: &str) -> Result<Option<Value>, RpcError> {
        self.invoke(url, Verb::Delete, None).await
    }

    pub async fn exec(&self, url: &str, data: Option<Value>) -> Result<Option<Value>, RpcError> {
        self.invoke(url, Verb::Exec, data).await
    }

    pub async fn clone_object(&self, url: &str, data: Value) -> Result<Option<Value>, RpcError> {
        self.invoke(url, Verb::Clone, Some(data)).await
    }

    /// Move an object relative to `target`; `option` is `"before"` or `"after"`.
    pub async fn move_object(
        &self,
        url: &str,
        target: &str,
        option: &str,
    ) -> Result<Option<Value>, RpcError> {
        let mut options = Map::new();
        options.insert("option".into(), Value::from(option));
        options.insert("target".into(), Value::from(target));
        self.invoke_with(url, Verb::Move, None, options).await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::transport::testing::{ok_response, status_response, token_session, MockTransport};
    use crate::rpc::types::{RpcResult, RpcStatus};
    use serde_json::json;

    fn client(transport: Arc<MockTransport>) -> RpcClient {
        RpcClient::new(token_session(transport), DEFAULT_TIMEOUT)
    }

    #[tokio::test]
    async fn test_invoke_returns_data() {
        let transport = Arc::new(MockTransport::new(|req, _, _| {
            Ok(ok_response(req.url(), Some(json!([{"name": "root"}]))))
        }));
        let data = client(transport).invoke("/dvmdb/adom", Verb::Get, None).await.unwrap();
        assert_eq!(data, Some(json!([{"name": "root"}])));
    }

    #[tokio::test]
    async fn test_exec_without_data() {
        let transport = Arc::new(MockTransport::ok());
        let data = client(transport.clone()).exec("/sys/status", None).await.unwrap();
        assert!(data.is_none());
        assert_eq!(transport.requests()[0].0.method, Verb::Exec);
    }

    #[tokio::test]
    async fn test_non_zero_status_is_classified() {
        let transport = Arc::new(MockTransport::new(|req, _, _| {
            Ok(status_response(req.url(), -3, "Object does not exist", None))
        }));
        let err = client(transport)
            .get("/dvmdb/adom/missing")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ObjectNotFoundError");
        assert!(err.to_string().contains("/dvmdb/adom/missing"));
    }

    #[tokio::test]
    async fn test_first_failure_short_circuits() {
        let transport = Arc::new(MockTransport::new(|_, _, _| {
            let entry = |url: &str, code| RpcResult {
                url: url.into(),
                status: RpcStatus { code, message: format!("code {code}") },
                data: Some(json!({})),
            };
            Ok(RpcResponse {
                id: 1,
                result: vec![entry("/a", 0), entry("/b", -2), entry("/c", -4)],
                session: None,
            })
        }));
        let err = client(transport).get("/a").await.unwrap_err();
        match err {
            RpcError::AlreadyExists { url, .. } => assert_eq!(url, "/b"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_result_is_malformed() {
        let transport = Arc::new(MockTransport::new(|_, _, _| Ok(RpcResponse::default())));
        let err = client(transport).get("/x").await.unwrap_err();
        assert!(matches!(err, RpcError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_deadline_raises_timeout_without_retry() {
        let transport =
            Arc::new(MockTransport::ok().with_delay(Duration::from_millis(200)));
        let client = RpcClient::new(token_session(transport.clone()), Duration::from_millis(20));
        let err = client.get("/slow").await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout { timeout_ms: 20, .. }));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_get_options_on_wire() {
        let transport = Arc::new(MockTransport::ok());
        let options = GetOptions {
            fields: Some(vec!["name".into(), "ip".into()]),
            filter: Some(json!(["name", "==", "fw1"])),
            loadsub: Some(false),
            range: Some((0, 50)),
        };
        client(transport.clone())
            .get_with("/dvmdb/adom/root/device", options)
            .await
            .unwrap();

        let param = &transport.requests()[0].0.params[0];
        assert_eq!(param.options["fields"], json!(["name", "ip"]));
        assert_eq!(param.options["filter"], json!(["name", "==", "fw1"]));
        assert_eq!(param.options["loadsub"], json!(0));
        assert_eq!(param.options["range"], json!([0, 50]));
    }

    #[tokio::test]
    async fn test_move_object_options() {
        let transport = Arc::new(MockTransport::ok());
        client(transport.clone())
            .move_object("/pm/config/adom/root/pkg/default/firewall/policy/3", "1", "before")
            .await
            .unwrap();
        let (request, _) = &transport.requests()[0];
        assert_eq!(request.method, Verb::Move);
        assert_eq!(request.params[0].options["target"], "1");
        assert_eq!(request.params[0].options["option"], "before");
    }
}
