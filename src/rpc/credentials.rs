//! Credential selection.
//!
//! The platform accepts either a pre-issued API token (sent as a bearer
//! header, no handshake) or a username/password pair exchanged for a
//! session id at login. The strategy is chosen once at startup.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::json;

use super::errors::RpcError;
use super::types::{RpcCall, RpcParam, Verb};

pub const LOGIN_URL: &str = "sys/login/user";
pub const LOGOUT_URL: &str = "sys/logout";

// ─── Strategy ────────────────────────────────────────────────────────────────

/// Authentication strategy resolved from configuration.
#[derive(Clone)]
pub enum AuthStrategy {
    Token { token: String },
    Session { username: String, password: String },
}

impl fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStrategy::Token { .. } => f
                .debug_struct("Token")
                .field("token", &"<redacted>")
                .finish(),
            AuthStrategy::Session { username, .. } => f
                .debug_struct("Session")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

// ─── Credential ──────────────────────────────────────────────────────────────

/// The credential actually attached to outbound calls.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Token(String),
    Session {
        session_id: String,
        expires_hint: Option<DateTime<Utc>>,
    },
}

impl Credential {
    /// Whether the hint says this session has lapsed. Tokens never lapse.
    pub fn is_past_hint(&self, now: DateTime<Utc>) -> bool {
        match self {
            Credential::Session {
                expires_hint: Some(at),
                ..
            } => now >= *at,
            _ => false,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Credential::Session { session_id, .. } => Some(session_id),
            Credential::Token(_) => None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Token(_) => f.write_str("Token(<redacted>)"),
            Credential::Session { expires_hint, .. } => f
                .debug_struct("Session")
                .field("session_id", &"<redacted>")
                .field("expires_hint", expires_hint)
                .finish(),
        }
    }
}

// ─── Provider ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CredentialProvider {
    strategy: AuthStrategy,
}

impl CredentialProvider {
    /// Pick the strategy from configured values.
    ///
    /// A token wins over a username/password pair. Empty strings count as
    /// unset. Having neither is a configuration error.
    pub fn resolve(
        api_token: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, RpcError> {
        fn present(v: Option<&str>) -> Option<&str> {
            v.map(str::trim).filter(|s| !s.is_empty())
        }

        if let Some(token) = present(api_token) {
            if present(username).is_some() {
                tracing::debug!("API token and username both configured, using token");
            }
            return Ok(Self {
                strategy: AuthStrategy::Token {
                    token: token.to_string(),
                },
            });
        }

        match (present(username), password.filter(|p| !p.is_empty())) {
            (Some(user), Some(pass)) => Ok(Self {
                strategy: AuthStrategy::Session {
                    username: user.to_string(),
                    password: pass.to_string(),
                },
            }),
            (Some(_), None) => Err(RpcError::Config {
                reason: "username configured without a password".into(),
            }),
            _ => Err(RpcError::Config {
                reason: "no credentials configured: set an API token or username and password"
                    .into(),
            }),
        }
    }

    pub fn strategy(&self) -> &AuthStrategy {
        &self.strategy
    }

    pub fn is_session_based(&self) -> bool {
        matches!(self.strategy, AuthStrategy::Session { .. })
    }

    /// The credential to use before any login has happened.
    pub fn initial_credential(&self) -> Option<Credential> {
        match &self.strategy {
            AuthStrategy::Token { token } => Some(Credential::Token(token.clone())),
            AuthStrategy::Session { .. } => None,
        }
    }

    /// The login call, or `None` in token mode.
    pub fn login_call(&self) -> Option<RpcCall> {
        match &self.strategy {
            AuthStrategy::Token { .. } => None,
            AuthStrategy::Session { username, password } => Some(RpcCall::new(
                Verb::Exec,
                RpcParam::new(LOGIN_URL, Some(json!({ "user": username, "passwd": password }))),
            )),
        }
    }

    pub fn logout_call(&self) -> RpcCall {
        RpcCall::new(Verb::Exec, RpcParam::new(LOGOUT_URL, None))
    }
}
