//! FortiManager JSON-RPC client stack.
//!
//! Layers, leaf first:
//! - `transport`: HTTPS POST of one envelope
//! - `credentials`: token vs. session strategy
//! - `session`: login/logout and the one-shot expiry retry
//! - `client`: envelope construction and status classification

pub mod client;
pub mod credentials;
pub mod errors;
pub mod session;
pub mod transport;
pub mod types;

pub use client::{GetOptions, RpcClient};
pub use credentials::{AuthStrategy, Credential, CredentialProvider};
pub use errors::RpcError;
pub use session::{SessionManager, SessionPhase};
pub use transport::{HttpTransport, Transport};
pub use types::{RpcCall, RpcParam, RpcRequest, RpcResponse, Verb};
