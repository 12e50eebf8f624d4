//! Built-in operation modules.
//!
//! Each module exports a [`ModuleTable`] of async callables taking the
//! shared [`RpcClient`] and validated arguments. They are thin: build the
//! URL and payload, call one verb, shape the result. Modules are handed to
//! the executor as loaders and are only built on first dispatch.

pub mod adom;
pub mod devices;
pub mod monitoring;
pub mod objects;
pub mod policies;

use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::{FnLoader, ModuleLoader, ModuleTable, OperationArgs};
use crate::rpc::{GetOptions, RpcError};

/// `(module name, loader)` for every built-in module.
pub fn builtin_loaders() -> Vec<(&'static str, Arc<dyn ModuleLoader>)> {
    let modules: [(&'static str, fn() -> ModuleTable); 5] = [
        (adom::MODULE, adom::module),
        (devices::MODULE, devices::module),
        (monitoring::MODULE, monitoring::module),
        (policies::MODULE, policies::module),
        (objects::MODULE, objects::module),
    ];
    modules
        .into_iter()
        .map(|(name, build)| (name, Arc::new(FnLoader::new(build)) as Arc<dyn ModuleLoader>))
        .collect()
}

// ─── Argument Helpers ────────────────────────────────────────────────────────

/// A required string argument. Validation has already run, so a miss here
/// means the catalog and the implementation disagree.
pub(crate) fn required_str<'a>(args: &'a OperationArgs, key: &str) -> Result<&'a str, RpcError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::InvalidPayload {
            reason: format!("missing string argument '{key}'"),
        })
}

/// A required argument that becomes one URL path segment.
pub(crate) fn path_segment<'a>(args: &'a OperationArgs, key: &str) -> Result<&'a str, RpcError> {
    check_segment(key, required_str(args, key)?)
}

pub(crate) fn optional_segment<'a>(
    args: &'a OperationArgs,
    key: &str,
) -> Result<Option<&'a str>, RpcError> {
    optional_str(args, key)
        .map(|value| check_segment(key, value))
        .transpose()
}

fn check_segment<'a>(key: &str, value: &'a str) -> Result<&'a str, RpcError> {
    if value.is_empty() || value.contains('/') || value == "." || value == ".." {
        return Err(RpcError::InvalidPayload {
            reason: format!("'{key}' must be a single name without '/', got '{value}'"),
        });
    }
    Ok(value)
}

pub(crate) fn optional_str<'a>(args: &'a OperationArgs, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// `fields` and `filter` arguments as `get` options.
pub(crate) fn get_options(args: &OperationArgs) -> Result<GetOptions, RpcError> {
    let fields = match args.get("fields") {
        Some(value) => Some(serde_json::from_value::<Vec<String>>(value.clone()).map_err(
            |e| RpcError::InvalidPayload {
                reason: format!("'fields' must be a list of strings: {e}"),
            },
        )?),
        None => None,
    };
    Ok(GetOptions {
        fields,
        filter: args.get("filter").cloned(),
        ..GetOptions::default()
    })
}

/// Lists come back as `null` when empty.
pub(crate) fn list_or_empty(data: Option<Value>) -> Value {
    match data {
        Some(Value::Null) | None => Value::Array(Vec::new()),
        Some(value) => value,
    }
}
