//! Process wiring: config → transport → session → client → registry →
//! executor → meta-tools.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::catalog::OperationRegistry;
use crate::config::BridgeConfig;
use crate::dispatch::DispatchExecutor;
use crate::operations::builtin_loaders;
use crate::rpc::{CredentialProvider, HttpTransport, RpcClient, RpcError, SessionManager, Transport};
use crate::tools::MetaTools;

/// Operation catalog compiled into the binary.
pub const BUNDLED_CATALOG: &str = include_str!("../catalog/operations.json");

pub struct Bridge {
    config: BridgeConfig,
    session: Arc<SessionManager>,
    executor: Arc<DispatchExecutor>,
    tools: Arc<MetaTools>,
}

impl Bridge {
    /// Assemble the bridge over HTTPS. Nothing touches the network until
    /// [`connect`](Self::connect) or the first operation.
    pub fn build(config: BridgeConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&config.endpoint(), config.verify_tls, config.timeout())
            .context("failed to build HTTP transport")?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: BridgeConfig, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let credentials = CredentialProvider::resolve(
            config.api_token.as_deref(),
            config.username.as_deref(),
            config.password.as_deref(),
        )?;
        let session = Arc::new(SessionManager::new(transport, credentials, config.session_ttl()));
        let client = Arc::new(RpcClient::new(session.clone(), config.timeout()));

        let registry = Arc::new(load_registry(config.catalog_path.as_deref())?);
        let executor = builtin_loaders()
            .into_iter()
            .fold(DispatchExecutor::new(registry, client), |executor, (name, loader)| {
                executor.with_loader(name, loader)
            });

        let unbacked = executor.modules_without_loader();
        if !unbacked.is_empty() {
            tracing::warn!(modules = ?unbacked, "catalog references modules with no implementation");
        }

        let executor = Arc::new(executor);
        let tools = Arc::new(MetaTools::new(executor.clone()));

        tracing::info!(
            endpoint = %session.endpoint(),
            session_auth = session.is_session_based(),
            operations = executor.registry().len(),
            "bridge assembled"
        );

        Ok(Self { config, session, executor, tools })
    }

    /// Authenticate up front so bad credentials fail at startup.
    pub async fn connect(&self) -> Result<(), RpcError> {
        self.session.authenticate().await
    }

    /// Log out. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
        tracing::info!(modules_loaded = ?self.executor.loaded_modules(), "bridge shut down");
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn executor(&self) -> &Arc<DispatchExecutor> {
        &self.executor
    }

    pub fn tools(&self) -> &Arc<MetaTools> {
        &self.tools
    }
}

/// Load the catalog from `path`, or the bundled one when `None`.
pub fn load_registry(path: Option<&Path>) -> anyhow::Result<OperationRegistry> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read catalog {}", path.display()))?;
            OperationRegistry::from_json(&raw)
                .with_context(|| format!("invalid catalog {}", path.display()))
        }
        None => OperationRegistry::from_json(BUNDLED_CATALOG).context("invalid bundled catalog"),
    }
}
