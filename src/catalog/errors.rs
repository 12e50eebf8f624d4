//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// No operation with this name is registered.
    #[error("unknown operation: '{name}'")]
    NotFound {
        name: String,
        suggestions: Vec<String>,
    },

    /// A second descriptor used an existing name.
    #[error("duplicate operation: '{name}'")]
    DuplicateOperation {
        name: String,
    },

    /// Registration after the registry was frozen.
    #[error("registry is frozen, cannot register '{name}'")]
    RegistryFrozen {
        name: String,
    },

    /// The catalog could not be parsed or is missing fields.
    #[error("malformed catalog: {reason}")]
    MalformedCatalog {
        reason: String,
    },
}

impl RegistryError {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::NotFound { .. } => "NotFoundError",
            RegistryError::DuplicateOperation { .. } => "DuplicateOperationError",
            RegistryError::RegistryFrozen { .. } => "RegistryFrozenError",
            RegistryError::MalformedCatalog { .. } => "MalformedCatalogError",
        }
    }
}
