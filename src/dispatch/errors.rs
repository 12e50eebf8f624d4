//! Dispatch error types.

use thiserror::Error;

use crate::catalog::RegistryError;
use crate::rpc::RpcError;

/// Errors returned by [`DispatchExecutor::execute`](super::DispatchExecutor::execute).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Registry lookup failed; in practice an unknown operation name.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Arguments failed validation against the parameter spec.
    #[error("invalid arguments for '{operation}': {reason}")]
    InvalidArgument {
        operation: String,
        reason: String,
    },

    /// The descriptor exists but its module has no callable of that name.
    #[error("operation '{operation}' is registered but module '{module}' does not implement it")]
    ImplementationMissing {
        operation: String,
        module: String,
    },

    /// The owning module failed to load.
    #[error("failed to load module '{module}': {reason}")]
    ModuleLoad {
        module: String,
        reason: String,
    },

    /// The operation ran and failed. Kind is the wrapped error's kind.
    #[error("operation '{operation}' failed: {source}")]
    Operation {
        operation: String,
        #[source]
        source: RpcError,
    },
}

impl DispatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Registry(e) => e.kind(),
            DispatchError::InvalidArgument { .. } => "InvalidArgumentError",
            DispatchError::ImplementationMissing { .. } => "ImplementationMissingError",
            DispatchError::ModuleLoad { .. } => "ModuleLoadError",
            DispatchError::Operation { source, .. } => source.kind(),
        }
    }

    /// Remote status code, when the failure came from the platform.
    pub fn code(&self) -> Option<i64> {
        match self {
            DispatchError::Operation { source, .. } => source.code(),
            _ => None,
        }
    }

    pub fn suggestions(&self) -> &[String] {
        match self {
            DispatchError::Registry(RegistryError::NotFound { suggestions, .. }) => suggestions,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_is_unchanged() {
        let err = DispatchError::Operation {
            operation: "lock_adom".into(),
            source: RpcError::from_status(-10, "Workspace locked by other user", "/dvmdb/adom/root/workspace/lock"),
        };
        assert_eq!(err.kind(), "PermissionDeniedError");
        assert_eq!(err.code(), Some(-10));
        assert!(err.to_string().contains("lock_adom"));
    }

    #[test]
    fn test_not_found_from_registry() {
        let err: DispatchError = RegistryError::NotFound {
            name: "list_devics".into(),
            suggestions: vec!["list_devices".into()],
        }
        .into();
        assert_eq!(err.kind(), "NotFoundError");
        assert_eq!(err.suggestions(), ["list_devices".to_string()]);
    }
}
