//! Operation catalog: descriptors, the registry that owns them, and the
//! discovery service that searches them.

pub mod discovery;
pub mod errors;
pub mod registry;
pub mod types;

pub use discovery::{CategorySummary, DiscoveryService, SearchHit, DEFAULT_SEARCH_LIMIT};
pub use errors::RegistryError;
pub use registry::OperationRegistry;
pub use types::{Catalog, CatalogEntry, ModuleRef, OperationDescriptor, ParamSpec, ParamType};
