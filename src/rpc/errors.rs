//! RPC client error types.
//!
//! Every failure between the session manager and the wire surfaces as an
//! [`RpcError`]. Remote status codes are classified in exactly one place,
//! [`RpcError::from_status`]; everything downstream matches on the variant.

use thiserror::Error;

use super::types::status_codes;

/// Errors that can occur while talking to the remote JSON-RPC endpoint.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Login was rejected, or the token was refused.
    #[error("authentication failed: {reason}")]
    Authentication {
        reason: String,
        code: Option<i64>,
    },

    /// The session was still invalid after the single re-authentication.
    #[error("session expired for '{url}' after re-authentication")]
    SessionExpired {
        url: String,
    },

    /// The call did not complete within its deadline.
    #[error("request to '{url}' timed out after {timeout_ms}ms")]
    Timeout {
        url: String,
        timeout_ms: u64,
    },

    /// The object the call tried to create already exists (-2).
    #[error("object already exists at '{url}': {message}")]
    AlreadyExists {
        url: String,
        message: String,
    },

    /// The addressed object does not exist (-3).
    #[error("object not found at '{url}': {message}")]
    ObjectNotFound {
        url: String,
        message: String,
    },

    /// The account may not perform this action (-4, -10, -11).
    #[error("permission denied [{code}] at '{url}': {message}")]
    PermissionDenied {
        code: i64,
        url: String,
        message: String,
    },

    /// The platform rejected the request shape or an argument (-5, -6).
    #[error("invalid request [{code}] at '{url}': {message}")]
    InvalidRequest {
        code: i64,
        url: String,
        message: String,
    },

    /// Any other non-zero status. Code and message are kept verbatim.
    #[error("remote operation failed [{code}] at '{url}': {message}")]
    RemoteOperation {
        code: i64,
        url: String,
        message: String,
    },

    /// TCP/TLS/HTTP-level failure before a response envelope was read.
    #[error("connection to {endpoint} failed: {reason}")]
    Connection {
        endpoint: String,
        reason: String,
    },

    /// Non-2xx HTTP response.
    #[error("HTTP {status} from {endpoint}")]
    HttpStatus {
        status: u16,
        endpoint: String,
    },

    /// The response body was not a usable envelope.
    #[error("malformed response: {reason}")]
    MalformedResponse {
        reason: String,
    },

    /// An operation could not build its request payload from its arguments.
    #[error("invalid payload: {reason}")]
    InvalidPayload {
        reason: String,
    },

    /// Missing or contradictory client configuration.
    #[error("config error: {reason}")]
    Config {
        reason: String,
    },

    /// The session manager has been shut down.
    #[error("session is closed")]
    Closed,
}

impl RpcError {
    /// Map a non-zero remote status code to its error kind.
    pub fn from_status(code: i64, message: &str, url: &str) -> Self {
        let url = url.to_string();
        let message = message.to_string();
        match code {
            status_codes::OBJECT_EXISTS => RpcError::AlreadyExists { url, message },
            status_codes::OBJECT_NOT_FOUND => RpcError::ObjectNotFound { url, message },
            status_codes::PERMISSION_DENIED
            | status_codes::ACTION_NOT_ALLOWED
            | status_codes::NO_RESOURCE_PERMISSION => {
                RpcError::PermissionDenied { code, url, message }
            }
            status_codes::INVALID_FORMAT | status_codes::INVALID_ARGUMENT => {
                RpcError::InvalidRequest { code, url, message }
            }
            status_codes::SESSION_EXPIRED => RpcError::SessionExpired { url },
            _ => RpcError::RemoteOperation { code, url, message },
        }
    }

    /// The remote status code carried by this error, if any.
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Authentication { code, .. } => *code,
            RpcError::SessionExpired { .. } => Some(status_codes::SESSION_EXPIRED),
            RpcError::AlreadyExists { .. } => Some(status_codes::OBJECT_EXISTS),
            RpcError::ObjectNotFound { .. } => Some(status_codes::OBJECT_NOT_FOUND),
            RpcError::PermissionDenied { code, .. }
            | RpcError::InvalidRequest { code, .. }
            | RpcError::RemoteOperation { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Stable taxonomy name reported to consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Authentication { .. } => "AuthenticationError",
            RpcError::SessionExpired { .. } => "SessionExpiredError",
            RpcError::Timeout { .. } => "TimeoutError",
            RpcError::AlreadyExists { .. } => "ObjectExistsError",
            RpcError::ObjectNotFound { .. } => "ObjectNotFoundError",
            RpcError::PermissionDenied { .. } => "PermissionDeniedError",
            RpcError::InvalidRequest { .. } => "InvalidRequestError",
            RpcError::RemoteOperation { .. } => "RemoteOperationError",
            RpcError::Connection { .. } | RpcError::HttpStatus { .. } => "ConnectionError",
            RpcError::MalformedResponse { .. } => "MalformedResponseError",
            RpcError::InvalidPayload { .. } => "InvalidArgumentError",
            RpcError::Config { .. } => "ConfigurationError",
            RpcError::Closed => "SessionClosedError",
        }
    }

    /// Whether a caller-level retry might succeed without changing anything.
    ///
    /// Nothing in this crate retries on its own apart from the single
    /// session-expiry retry; this is advice for callers.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Timeout { .. } | RpcError::Connection { .. } => true,
            RpcError::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
