//! Operation dispatch: argument validation, lazy module loading, and
//! invocation against the shared RPC client.

pub mod errors;
pub mod executor;
pub mod module;

pub use errors::DispatchError;
pub use executor::DispatchExecutor;
pub use module::{operation, FnLoader, ModuleLoader, ModuleTable, OperationArgs, OperationFn};
