//! Dispatch executor.
//!
//! Resolves an operation name through the registry, validates arguments,
//! loads the owning module on first use, and invokes the callable with the
//! shared [`RpcClient`]:
//!
//! lookup → validate → load module (once) → locate callable → invoke
//!
//! Everything before "invoke" is local; a failure there never reaches the
//! network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::OnceCell;

use super::errors::DispatchError;
use super::module::{validate_arguments, ModuleLoader, ModuleTable, OperationArgs};
use crate::catalog::{ModuleRef, OperationRegistry};
use crate::rpc::RpcClient;

// ─── DispatchExecutor ────────────────────────────────────────────────────────

/// Owns the loaded-module cache.
///
/// The cache has one cell per interned module, created up front and
/// filled on first dispatch. `OnceCell::get_or_try_init` makes the load
/// compute-once under concurrent first use, and a cancelled or failed load
/// leaves the cell empty for the next caller.
pub struct DispatchExecutor {
    registry: Arc<OperationRegistry>,
    client: Arc<RpcClient>,
    /// Indexed by `ModuleRef::id`.
    loaders: Vec<Option<Arc<dyn ModuleLoader>>>,
    /// Indexed by `ModuleRef::id`.
    cache: Vec<OnceCell<Arc<ModuleTable>>>,
    loads: AtomicUsize,
}

impl DispatchExecutor {
    pub fn new(registry: Arc<OperationRegistry>, client: Arc<RpcClient>) -> Self {
        let modules = registry.modules().len();
        Self {
            registry,
            client,
            loaders: vec![None; modules],
            cache: (0..modules).map(|_| OnceCell::new()).collect(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Attach the loader for `module`. Loaders for modules the registry
    /// does not reference are ignored.
    pub fn with_loader(mut self, module: &str, loader: Arc<dyn ModuleLoader>) -> Self {
        match self.registry.module(module) {
            Some(handle) => {
                let id = handle.id();
                self.loaders[id] = Some(loader);
            }
            None => tracing::debug!(module = %module, "no registered operations for module, loader unused"),
        }
        self
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    /// Module loads performed so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Names of modules currently in the cache.
    pub fn loaded_modules(&self) -> Vec<&str> {
        self.registry
            .modules()
            .iter()
            .filter(|m| self.cache[m.id()].initialized())
            .map(ModuleRef::name)
            .collect()
    }

    /// Modules that have operations registered but no loader attached.
    pub fn modules_without_loader(&self) -> Vec<&str> {
        self.registry
            .modules()
            .iter()
            .filter(|m| self.loaders[m.id()].is_none())
            .map(ModuleRef::name)
            .collect()
    }

    // ─── Execution ───────────────────────────────────────────────────────

    /// Execute `name` with `args`.
    pub async fn execute(&self, name: &str, args: OperationArgs) -> Result<Value, DispatchError> {
        let start = Instant::now();

        let descriptor = self.registry.get(name)?;
        let args = validate_arguments(descriptor, args)?;
        let table = self.module(&descriptor.module).await?;

        let Some(callable) = table.get(name) else {
            tracing::error!(
                operation = %name,
                module = %descriptor.module,
                "registered operation has no implementation in its module"
            );
            return Err(DispatchError::ImplementationMissing {
                operation: name.to_string(),
                module: descriptor.module.name().to_string(),
            });
        };

        let result = callable(self.client.clone(), args).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                tracing::info!(operation = %name, elapsed_ms, "operation completed");
                Ok(value)
            }
            Err(source) => {
                tracing::warn!(operation = %name, elapsed_ms, kind = source.kind(), error = %source, "operation failed");
                Err(DispatchError::Operation {
                    operation: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Like [`execute`](Self::execute) for arguments given as a JSON value.
    /// `null` means no arguments; anything but an object is rejected.
    pub async fn execute_value(&self, name: &str, args: Value) -> Result<Value, DispatchError> {
        let args = match args {
            Value::Null => OperationArgs::new(),
            Value::Object(map) => map,
            other => {
                return Err(DispatchError::InvalidArgument {
                    operation: name.to_string(),
                    reason: format!("arguments must be an object, got {other}"),
                })
            }
        };
        self.execute(name, args).await
    }

    /// The loaded table for `module`, loading it on first use.
    async fn module(&self, module: &ModuleRef) -> Result<Arc<ModuleTable>, DispatchError> {
        let cell = &self.cache[module.id()];
        cell.get_or_try_init(|| async {
            let loader = self.loaders[module.id()].clone().ok_or_else(|| {
                DispatchError::ModuleLoad {
                    module: module.name().to_string(),
                    reason: "no loader registered".into(),
                }
            })?;

            let start = Instant::now();
            self.loads.fetch_add(1, Ordering::SeqCst);
            let table = loader.load().await.map_err(|e| {
                tracing::error!(module = %module, error = %e, "module load failed");
                DispatchError::ModuleLoad {
                    module: module.name().to_string(),
                    reason: format!("{e:#}"),
                }
            })?;

            tracing::info!(
                module = %module,
                operations = table.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "module loaded"
            );
            Ok::<_, DispatchError>(Arc::new(table))
        })
        .await
        .cloned()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
