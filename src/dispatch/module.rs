//! Operation modules and argument validation.
//!
//! A module is a table of named async callables. Modules are produced by a
//! [`ModuleLoader`] the first time one of their operations is dispatched.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

use super::errors::DispatchError;
use crate::catalog::OperationDescriptor;
use crate::rpc::{RpcClient, RpcError};

/// Arguments passed to an operation, keyed by parameter name.
pub type OperationArgs = Map<String, Value>;

/// A callable operation implementation.
pub type OperationFn = Arc<
    dyn Fn(Arc<RpcClient>, OperationArgs) -> BoxFuture<'static, Result<Value, RpcError>>
        + Send
        + Sync,
>;

/// Wrap an async fn as an [`OperationFn`].
pub fn operation<F, Fut>(f: F) -> OperationFn
where
    F: Fn(Arc<RpcClient>, OperationArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    Arc::new(move |client, args| Box::pin(f(client, args)))
}

// ─── ModuleTable ─────────────────────────────────────────────────────────────

/// The callables exported by one loaded module.
#[derive(Clone)]
pub struct ModuleTable {
    name: String,
    operations: HashMap<String, OperationFn>,
}

impl ModuleTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            operations: HashMap::new(),
        }
    }

    pub fn with_operation(mut self, name: &str, f: OperationFn) -> Self {
        self.operations.insert(name.to_string(), f);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, operation: &str) -> Option<&OperationFn> {
        self.operations.get(operation)
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.operations.contains_key(operation)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl std::fmt::Debug for ModuleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ModuleTable")
            .field("name", &self.name)
            .field("operations", &names)
            .finish()
    }
}

// ─── Loaders ─────────────────────────────────────────────────────────────────

/// Produces a module's callable table. Called at most once per module.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self) -> anyhow::Result<ModuleTable>;
}

/// Loader backed by a plain constructor function.
pub struct FnLoader<F> {
    build: F,
}

impl<F> FnLoader<F>
where
    F: Fn() -> ModuleTable + Send + Sync,
{
    pub fn new(build: F) -> Self {
        Self { build }
    }
}

#[async_trait]
impl<F> ModuleLoader for FnLoader<F>
where
    F: Fn() -> ModuleTable + Send + Sync,
{
    async fn load(&self) -> anyhow::Result<ModuleTable> {
        Ok((self.build)())
    }
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Check `args` against the descriptor's parameter spec and fill defaults.
///
/// Strict: unknown names are rejected, every required parameter must be
/// present and non-null, and each value must match its declared type.
/// A `null` for an optional parameter counts as omitted.
pub fn validate_arguments(
    descriptor: &OperationDescriptor,
    mut args: OperationArgs,
) -> Result<OperationArgs, DispatchError> {
    let invalid = |reason: String| DispatchError::InvalidArgument {
        operation: descriptor.name.clone(),
        reason,
    };

    let unknown: Vec<&str> = args
        .keys()
        .filter(|k| !descriptor.parameters.contains_key(k.as_str()))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        let expected: Vec<&str> = descriptor.parameters.keys().map(String::as_str).collect();
        let expected = if expected.is_empty() {
            "none".to_string()
        } else {
            expected.join(", ")
        };
        return Err(invalid(format!(
            "unknown parameter(s): {} (accepted: {expected})",
            unknown.join(", ")
        )));
    }

    args.retain(|_, v| !v.is_null());

    let missing: Vec<&str> = descriptor
        .required_params()
        .filter(|name| !args.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        return Err(invalid(format!(
            "missing required parameter(s): {}",
            missing.join(", ")
        )));
    }

    for (name, value) in &args {
        let spec = &descriptor.parameters[name];
        if !spec.param_type.accepts(value) {
            return Err(invalid(format!(
                "parameter '{name}' must be {}, got {}",
                spec.param_type.as_str(),
                json_type_name(value)
            )));
        }
    }

    for (name, spec) in &descriptor.parameters {
        if let (false, Some(default)) = (args.contains_key(name), &spec.default) {
            args.insert(name.clone(), default.clone());
        }
    }

    Ok(args)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
