//! Session lifecycle.
//!
//! The [`SessionManager`] attaches the active credential to every outbound
//! request. In session mode it logs in lazily before the first call, logs
//! out on shutdown, and recovers from an expired session with exactly one
//! re-authentication and one retry.
//!
//! ```text
//! Unauthenticated ──Begin──▶ Authenticating ──Succeeded──▶ Authenticated
//!        ▲                        │                          │      ▲
//!        └──────────Failed────────┘                    Expired      Succeeded
//!        ▲                                                   ▼      │
//!        └──────────────────Failed─────────────────── Reauthenticating
//!
//! any non-closed phase ──Close──▶ Closed (terminal)
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use super::credentials::{Credential, CredentialProvider};
use super::errors::RpcError;
use super::transport::Transport;
use super::types::{status_codes, RpcCall, RpcRequest, RpcResponse};

// ─── State Machine ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Reauthenticating,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A first login starts.
    Begin,
    /// Login completed and a credential is stored.
    Succeeded,
    /// Login failed or was cancelled.
    Failed,
    /// The stored session was rejected by the server.
    Expired,
    /// Shutdown.
    Close,
}

/// The transition table. `None` means the event is not valid in `from`.
pub fn transition(from: SessionPhase, event: SessionEvent) -> Option<SessionPhase> {
    use SessionEvent as E;
    use SessionPhase as P;

    match (from, event) {
        (P::Closed, _) => None,
        (_, E::Close) => Some(P::Closed),
        (P::Unauthenticated, E::Begin) => Some(P::Authenticating),
        (P::Authenticating, E::Succeeded) => Some(P::Authenticated),
        (P::Authenticating, E::Failed) => Some(P::Unauthenticated),
        (P::Authenticated, E::Expired) => Some(P::Reauthenticating),
        (P::Reauthenticating, E::Succeeded) => Some(P::Authenticated),
        (P::Reauthenticating, E::Failed) => Some(P::Unauthenticated),
        _ => None,
    }
}

struct SessionState {
    phase: SessionPhase,
    credential: Option<Credential>,
}

/// Rolls an in-progress login back to `Unauthenticated` unless disarmed.
/// Covers both explicit failure and the login future being dropped.
struct LoginGuard<'a> {
    state: &'a Mutex<SessionState>,
    fallback: Option<Credential>,
    armed: bool,
}

impl LoginGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock();
        if let Some(next) = transition(state.phase, SessionEvent::Failed) {
            tracing::debug!(from = ?state.phase, to = ?next, "login did not complete, rolling back");
            state.phase = next;
            state.credential = self.fallback.take();
        }
    }
}

// ─── SessionManager ──────────────────────────────────────────────────────────

/// Owns the credential and the live session id.
///
/// Shared as `Arc<SessionManager>` across concurrent callers. The state
/// mutex is never held across an await; logins are serialized by a
/// separate async lock so concurrent expiries coalesce into one login.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    credentials: CredentialProvider,
    state: Mutex<SessionState>,
    auth_lock: tokio::sync::Mutex<()>,
    request_ids: AtomicU64,
    logins: AtomicUsize,
    reauths: AtomicUsize,
    session_ttl: Option<Duration>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: CredentialProvider,
        session_ttl: Option<Duration>,
    ) -> Self {
        let credential = credentials.initial_credential();
        Self {
            transport,
            credentials,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Unauthenticated,
                credential,
            }),
            auth_lock: tokio::sync::Mutex::new(()),
            request_ids: AtomicU64::new(1),
            logins: AtomicUsize::new(0),
            reauths: AtomicUsize::new(0),
            session_ttl,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    pub fn is_session_based(&self) -> bool {
        self.credentials.is_session_based()
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Correlation id for the next request. Unique per manager.
    pub fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Login requests sent so far.
    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    /// Re-authentications triggered by an expired session.
    pub fn reauth_count(&self) -> usize {
        self.reauths.load(Ordering::SeqCst)
    }

    // ─── Authentication ──────────────────────────────────────────────────

    /// Establish credentials. A no-op handshake in token mode; a login in
    /// session mode. Returns immediately if already authenticated.
    pub async fn authenticate(&self) -> Result<(), RpcError> {
        let _auth = self.auth_lock.lock().await;
        match self.phase() {
            SessionPhase::Closed => Err(RpcError::Closed),
            SessionPhase::Authenticated => Ok(()),
            _ => self.establish(SessionEvent::Begin).await,
        }
    }

    /// Replace `stale` with a fresh session. If another caller already did
    /// so while we waited for the lock, reuse theirs.
    async fn reauthenticate(&self, stale: &Credential) -> Result<Credential, RpcError> {
        let _auth = self.auth_lock.lock().await;

        let event = {
            let state = self.state.lock();
            match state.phase {
                SessionPhase::Closed => return Err(RpcError::Closed),
                SessionPhase::Authenticated => match &state.credential {
                    Some(current) if current != stale => return Ok(current.clone()),
                    _ => SessionEvent::Expired,
                },
                _ => SessionEvent::Begin,
            }
        };

        if event == SessionEvent::Expired {
            self.reauths.fetch_add(1, Ordering::SeqCst);
        }
        self.establish(event).await?;
        self.current_credential()
    }

    /// Run one login. Caller holds `auth_lock`.
    async fn establish(&self, event: SessionEvent) -> Result<(), RpcError> {
        self.apply(event)?;
        let guard = LoginGuard {
            state: &self.state,
            fallback: self.credentials.initial_credential(),
            armed: true,
        };

        let Some(login) = self.credentials.login_call() else {
            self.apply(SessionEvent::Succeeded)?;
            guard.disarm();
            return Ok(());
        };

        let request = RpcRequest::new(self.next_request_id(), &login, None);
        self.logins.fetch_add(1, Ordering::SeqCst);
        tracing::info!(endpoint = %self.endpoint(), id = request.id, "logging in");

        let response = self.transport.send(&request, None).await.map_err(|e| {
            tracing::error!(error = %e, "login request failed");
            RpcError::Authentication {
                reason: format!("login request failed: {e}"),
                code: None,
            }
        })?;

        if response.result.is_empty() {
            return Err(RpcError::Authentication {
                reason: "no result in login response".into(),
                code: None,
            });
        }
        if let Some(failed) = response.result.iter().find(|r| r.status.code != status_codes::OK) {
            tracing::error!(code = failed.status.code, message = %failed.status.message, "login rejected");
            return Err(RpcError::Authentication {
                reason: failed.status.message.clone(),
                code: Some(failed.status.code),
            });
        }
        let Some(session_id) = response.session.filter(|s| !s.is_empty()) else {
            return Err(RpcError::Authentication {
                reason: "login response carried no session".into(),
                code: None,
            });
        };

        let expires_hint = self
            .session_ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);

        {
            let mut state = self.state.lock();
            let next = transition(state.phase, SessionEvent::Succeeded).ok_or(RpcError::Closed)?;
            state.phase = next;
            state.credential = Some(Credential::Session {
                session_id,
                expires_hint,
            });
        }
        guard.disarm();
        tracing::info!("session established");
        Ok(())
    }

    fn apply(&self, event: SessionEvent) -> Result<SessionPhase, RpcError> {
        let mut state = self.state.lock();
        match transition(state.phase, event) {
            Some(next) => {
                tracing::trace!(from = ?state.phase, to = ?next, ?event, "session transition");
                state.phase = next;
                Ok(next)
            }
            None if state.phase == SessionPhase::Closed => Err(RpcError::Closed),
            None => Err(RpcError::Authentication {
                reason: format!("invalid session transition from {:?} on {event:?}", state.phase),
                code: None,
            }),
        }
    }

    fn current_credential(&self) -> Result<Credential, RpcError> {
        let state = self.state.lock();
        match (state.phase, &state.credential) {
            (SessionPhase::Closed, _) => Err(RpcError::Closed),
            (SessionPhase::Authenticated, Some(credential)) => Ok(credential.clone()),
            _ => Err(RpcError::Authentication {
                reason: "no active credential".into(),
                code: None,
            }),
        }
    }

    /// The credential to send with, authenticating first if needed.
    async fn ensure_credential(&self) -> Result<Credential, RpcError> {
        let snapshot = {
            let state = self.state.lock();
            (state.phase, state.credential.clone())
        };

        match snapshot {
            (SessionPhase::Closed, _) => Err(RpcError::Closed),
            (SessionPhase::Authenticated, Some(credential)) => {
                if credential.is_past_hint(Utc::now()) {
                    tracing::debug!("session past its expiry hint, refreshing");
                    return self.reauthenticate(&credential).await;
                }
                Ok(credential)
            }
            _ => {
                self.authenticate().await?;
                self.current_credential()
            }
        }
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Send `call` with the current credential.
    ///
    /// In session mode a `-20` status triggers one re-authentication and
    /// one retry; a second `-20` is returned as [`RpcError::SessionExpired`].
    /// The response is otherwise returned as-is for the client to interpret.
    pub async fn call(&self, call: &RpcCall) -> Result<RpcResponse, RpcError> {
        let credential = self.ensure_credential().await?;
        let response = self.send_with(call, &credential).await?;

        if !self.is_session_based() || !response.has_status(status_codes::SESSION_EXPIRED) {
            return Ok(response);
        }

        tracing::info!(url = %call.url(), "session expired, re-authenticating");
        let fresh = self.reauthenticate(&credential).await?;
        let retried = self.send_with(call, &fresh).await?;

        if retried.has_status(status_codes::SESSION_EXPIRED) {
            tracing::warn!(url = %call.url(), "session still expired after re-authentication");
            return Err(RpcError::SessionExpired {
                url: call.url().to_string(),
            });
        }
        Ok(retried)
    }

    async fn send_with(
        &self,
        call: &RpcCall,
        credential: &Credential,
    ) -> Result<RpcResponse, RpcError> {
        let (bearer, session) = match credential {
            Credential::Token(token) => (Some(token.as_str()), None),
            Credential::Session { session_id, .. } => (None, Some(session_id.clone())),
        };
        let request = RpcRequest::new(self.next_request_id(), call, session);
        tracing::debug!(id = request.id, method = %request.method, url = %request.url(), "sending request");
        self.transport.send(&request, bearer).await
    }

    // ─── Shutdown ────────────────────────────────────────────────────────

    /// Close the manager. In session mode this logs out; failures are
    /// logged, not returned. Idempotent.
    pub async fn shutdown(&self) {
        let _auth = self.auth_lock.lock().await;

        let credential = {
            let mut state = self.state.lock();
            if state.phase == SessionPhase::Closed {
                return;
            }
            state.phase = SessionPhase::Closed;
            state.credential.take()
        };

        let Some(session_id) = credential.as_ref().and_then(Credential::session_id) else {
            tracing::debug!("session manager closed");
            return;
        };

        let request = RpcRequest::new(
            self.next_request_id(),
            &self.credentials.logout_call(),
            Some(session_id.to_string()),
        );
        match self.transport.send(&request, None).await {
            Ok(response) => match response.result.iter().find(|r| r.status.code != 0) {
                None => tracing::info!("logged out"),
                Some(r) => tracing::warn!(code = r.status.code, message = %r.status.message, "logout rejected"),
            },
            Err(e) => tracing::warn!(error = %e, "logout failed"),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::credentials::{LOGIN_URL, LOGOUT_URL};
    use crate::rpc::transport::testing::{
        login_response, ok_response, status_response, MockTransport,
    };
    use crate::rpc::types::{RpcParam, Verb};
    use serde_json::json;

    fn session_manager(transport: Arc<MockTransport>, ttl: Option<Duration>) -> SessionManager {
        let credentials = CredentialProvider::resolve(None, Some("admin"), Some("pw")).unwrap();
        SessionManager::new(transport, credentials, ttl)
    }

    fn status_call() -> RpcCall {
        RpcCall::new(Verb::Get, RpcParam::new("/sys/status", None))
    }

    /// Logins hand out s1, s2, ... ; any session other than `valid` is
    /// rejected with -20.
    fn rotating_sessions(valid_from: usize) -> MockTransport {
        let issued = AtomicUsize::new(0);
        MockTransport::new(move |req, _, _| {
            if req.url() == LOGIN_URL {
                let n = issued.fetch_add(1, Ordering::SeqCst) + 1;
                return Ok(login_response(&format!("s{n}")));
            }
            let current = format!("s{}", issued.load(Ordering::SeqCst));
            let n: usize = req.session.as_deref().unwrap_or("s0")[1..].parse().unwrap();
            if n >= valid_from && req.session.as_deref() == Some(current.as_str()) {
                Ok(ok_response(req.url(), Some(json!({"hostname": "fmg"}))))
            } else {
                Ok(status_response(req.url(), -20, "Invalid session", None))
            }
        })
    }

    #[test]
    fn test_transition_table() {
        use SessionEvent as E;
        use SessionPhase as P;

        assert_eq!(transition(P::Unauthenticated, E::Begin), Some(P::Authenticating));
        assert_eq!(transition(P::Authenticating, E::Succeeded), Some(P::Authenticated));
        assert_eq!(transition(P::Authenticating, E::Failed), Some(P::Unauthenticated));
        assert_eq!(transition(P::Authenticated, E::Expired), Some(P::Reauthenticating));
        assert_eq!(transition(P::Reauthenticating, E::Succeeded), Some(P::Authenticated));
        assert_eq!(transition(P::Authenticated, E::Close), Some(P::Closed));

        // Only Begin leaves Unauthenticated (besides shutdown).
        assert_eq!(transition(P::Unauthenticated, E::Succeeded), None);
        assert_eq!(transition(P::Unauthenticated, E::Expired), None);
        assert_eq!(transition(P::Authenticated, E::Begin), None);

        for event in [E::Begin, E::Succeeded, E::Failed, E::Expired, E::Close] {
            assert_eq!(transition(P::Closed, event), None);
        }
    }

    #[tokio::test]
    async fn test_token_mode_sends_bearer_without_login() {
        let transport = Arc::new(MockTransport::ok());
        let credentials = CredentialProvider::resolve(Some("tok"), None, None).unwrap();
        let manager = SessionManager::new(transport.clone(), credentials, None);

        manager.call(&status_call()).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1.as_deref(), Some("tok"));
        assert!(requests[0].0.session.is_none());
        assert_eq!(manager.login_count(), 0);
        assert_eq!(manager.phase(), SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn test_session_mode_logs_in_lazily() {
        let transport = Arc::new(rotating_sessions(1));
        let manager = session_manager(transport.clone(), None);
        assert_eq!(manager.phase(), SessionPhase::Unauthenticated);

        let response = manager.call(&status_call()).await.unwrap();
        assert_eq!(response.result[0].data.as_ref().unwrap()["hostname"], "fmg");

        let requests = transport.requests();
        assert_eq!(requests[0].0.url(), LOGIN_URL);
        assert!(requests[0].0.session.is_none());
        assert_eq!(requests[1].0.session.as_deref(), Some("s1"));
        assert!(requests[1].1.is_none());
        assert_eq!(manager.login_count(), 1);
    }

    #[tokio::test]
    async fn test_request_ids_are_unique() {
        let transport = Arc::new(rotating_sessions(1));
        let manager = session_manager(transport.clone(), None);
        for _ in 0..3 {
            manager.call(&status_call()).await.unwrap();
        }
        let mut ids: Vec<u64> = transport.requests().iter().map(|(r, _)| r.id).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[tokio::test]
    async fn test_expired_session_reauthenticates_exactly_once() {
        // s1 is rejected, s2 is accepted.
        let transport = Arc::new(rotating_sessions(2));
        let manager = session_manager(transport.clone(), None);

        let response = manager.call(&status_call()).await.unwrap();
        assert_eq!(response.result[0].status.code, 0);
        assert_eq!(manager.reauth_count(), 1);
        assert_eq!(transport.login_count(), 2);
        assert_eq!(manager.phase(), SessionPhase::Authenticated);

        // The refreshed session keeps working without another login.
        manager.call(&status_call()).await.unwrap();
        assert_eq!(manager.reauth_count(), 1);
    }

    #[tokio::test]
    async fn test_second_expiry_surfaces_session_expired() {
        let transport = Arc::new(MockTransport::new(|req, _, _| {
            if req.url() == LOGIN_URL {
                Ok(login_response("s"))
            } else {
                Ok(status_response(req.url(), -20, "Invalid session", None))
            }
        }));
        let manager = session_manager(transport.clone(), None);

        let err = manager.call(&status_call()).await.unwrap_err();
        assert!(matches!(err, RpcError::SessionExpired { ref url } if url == "/sys/status"));
        assert_eq!(manager.reauth_count(), 1);
        // login, call, re-login, retry: nothing more
        assert_eq!(transport.call_count(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_expiry_coalesces_into_one_login() {
        let transport =
            Arc::new(rotating_sessions(2).with_delay(Duration::from_millis(20)));
        let manager = Arc::new(session_manager(transport.clone(), None));

        let a = tokio::spawn({
            let m = manager.clone();
            async move { m.call(&status_call()).await }
        });
        let b = tokio::spawn({
            let m = manager.clone();
            async move { m.call(&status_call()).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(manager.reauth_count(), 1);
        assert_eq!(transport.login_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_login_is_authentication_error() {
        let transport = Arc::new(MockTransport::new(|req, _, _| {
            Ok(status_response(req.url(), -11, "No permission", None))
        }));
        let manager = session_manager(transport, None);

        let err = manager.call(&status_call()).await.unwrap_err();
        assert_eq!(err.kind(), "AuthenticationError");
        assert_eq!(err.code(), Some(-11));
        assert_eq!(manager.phase(), SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_login_without_session_is_authentication_error() {
        let transport = Arc::new(MockTransport::ok());
        let manager = session_manager(transport, None);
        let err = manager.authenticate().await.unwrap_err();
        assert!(matches!(err, RpcError::Authentication { code: None, .. }));
    }

    #[tokio::test]
    async fn test_login_http_rejection_is_authentication_error() {
        let transport = Arc::new(MockTransport::new(|req, _, _| {
            if req.url() == LOGIN_URL {
                return Err(RpcError::HttpStatus {
                    status: 401,
                    endpoint: "https://fmg.test/jsonrpc".into(),
                });
            }
            Ok(ok_response(req.url(), None))
        }));
        let manager = session_manager(transport, None);

        let err = manager.authenticate().await.unwrap_err();
        assert_eq!(err.kind(), "AuthenticationError");
        assert!(err.to_string().contains("HTTP 401"));
        assert_eq!(manager.phase(), SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_login_connection_failure_is_authentication_error() {
        let transport = Arc::new(MockTransport::new(|_, _, _| {
            Err(RpcError::Connection {
                endpoint: "https://fmg.test/jsonrpc".into(),
                reason: "connection refused".into(),
            })
        }));
        let manager = session_manager(transport, None);

        let err = manager.call(&status_call()).await.unwrap_err();
        assert_eq!(err.kind(), "AuthenticationError");
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_login_with_empty_result_is_rejected() {
        let transport = Arc::new(MockTransport::new(|_, _, _| {
            let mut response = login_response("s1");
            response.result.clear();
            Ok(response)
        }));
        let manager = session_manager(transport, None);

        let err = manager.authenticate().await.unwrap_err();
        assert!(matches!(err, RpcError::Authentication { code: None, .. }));
        assert!(err.to_string().contains("no result"));
        assert_eq!(manager.phase(), SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_cancelled_login_rolls_back_phase() {
        let transport =
            Arc::new(rotating_sessions(1).with_delay(Duration::from_millis(200)));
        let manager = session_manager(transport, None);

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), manager.call(&status_call())).await;
        assert!(cancelled.is_err());
        assert_eq!(manager.phase(), SessionPhase::Unauthenticated);

        // A later call recovers normally.
        manager.call(&status_call()).await.unwrap();
        assert_eq!(manager.phase(), SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn test_expiry_hint_refreshes_proactively() {
        let transport = Arc::new(rotating_sessions(1));
        let manager = session_manager(transport.clone(), Some(Duration::ZERO));

        manager.call(&status_call()).await.unwrap();
        manager.call(&status_call()).await.unwrap();
        assert_eq!(transport.login_count(), 2);
        // No -20 was ever seen on the wire after a login.
        assert!(transport
            .requests()
            .iter()
            .all(|(r, _)| r.url() == LOGIN_URL || r.session.is_some()));
    }

    #[tokio::test]
    async fn test_shutdown_logs_out_and_closes() {
        let transport = Arc::new(rotating_sessions(1));
        let manager = session_manager(transport.clone(), None);
        manager.authenticate().await.unwrap();

        manager.shutdown().await;
        assert_eq!(manager.phase(), SessionPhase::Closed);

        let last = transport.requests().pop().unwrap().0;
        assert_eq!(last.url(), LOGOUT_URL);
        assert_eq!(last.method, Verb::Exec);
        assert_eq!(last.session.as_deref(), Some("s1"));

        let err = manager.call(&status_call()).await.unwrap_err();
        assert!(matches!(err, RpcError::Closed));

        // Idempotent.
        let before = transport.call_count();
        manager.shutdown().await;
        assert_eq!(transport.call_count(), before);
    }

    #[tokio::test]
    async fn test_token_shutdown_is_silent() {
        let transport = Arc::new(MockTransport::ok());
        let credentials = CredentialProvider::resolve(Some("tok"), None, None).unwrap();
        let manager = SessionManager::new(transport.clone(), credentials, None);
        manager.authenticate().await.unwrap();
        manager.shutdown().await;
        assert_eq!(transport.call_count(), 0);
        assert_eq!(manager.phase(), SessionPhase::Closed);
    }

    #[tokio::test]
    async fn test_token_mode_expiry_is_not_retried() {
        let transport = Arc::new(MockTransport::new(|req, _, _| {
            Ok(status_response(req.url(), -20, "Invalid session", None))
        }));
        let credentials = CredentialProvider::resolve(Some("tok"), None, None).unwrap();
        let manager = SessionManager::new(transport.clone(), credentials, None);

        let response = manager.call(&status_call()).await.unwrap();
        assert!(response.has_status(-20));
        assert_eq!(transport.call_count(), 1);
    }
}
