//! Operation catalog types.
//!
//! The catalog is generated ahead of time and shipped as JSON. It is read
//! into [`CatalogEntry`] values and then registered as immutable
//! [`OperationDescriptor`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

// ─── Parameters ──────────────────────────────────────────────────────────────

/// Declared type of an operation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamType {
    /// Whether `value` is acceptable for this type. `null` never is.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
            ParamType::Any => !value.is_null(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
            ParamType::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ─── Module Handles ──────────────────────────────────────────────────────────

/// Handle to an owning module, interned by the registry.
///
/// Every descriptor of the same module shares one `ModuleRef`, so the
/// dispatch cache is keyed by a small integer rather than re-resolving a
/// module name on each call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleRef {
    id: usize,
    name: Arc<str>,
}

impl ModuleRef {
    pub(crate) fn new(id: usize, name: &str) -> Self {
        Self {
            id,
            name: Arc::from(name),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Serialize for ModuleRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

// ─── Catalog File ────────────────────────────────────────────────────────────

/// One operation as it appears in the catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub module: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,
}

impl CatalogEntry {
    pub fn new(name: &str, module: &str, category: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            module: module.to_string(),
            category: category.to_string(),
            description: description.to_string(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: &str, spec: ParamSpec) -> Self {
        self.parameters.insert(name.to_string(), spec);
        self
    }
}

/// Optional display metadata for a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Top-level catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub categories: Vec<CategoryInfo>,
    pub operations: Vec<CatalogEntry>,
}

fn default_version() -> u32 {
    1
}

// ─── Descriptors ─────────────────────────────────────────────────────────────

/// Immutable metadata for one registered operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationDescriptor {
    pub name: String,
    pub module: ModuleRef,
    pub category: String,
    pub description: String,
    pub parameters: BTreeMap<String, ParamSpec>,
    /// The operation is scoped to an administrative domain.
    pub requires_adom: bool,
}

impl OperationDescriptor {
    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
    }
}
