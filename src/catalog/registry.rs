//! Operation registry.
//!
//! Maps operation names to their descriptors. Built once at startup from
//! the catalog, then frozen and shared read-only (`Arc<OperationRegistry>`).
//!
//! Provides:
//! - O(1) lookup by name
//! - Per-category listing in registration order
//! - Interned module handles for the dispatch cache
//! - "Did you mean" suggestions for unknown names

use std::collections::HashMap;

use super::errors::RegistryError;
use super::types::{Catalog, CatalogEntry, CategoryInfo, ModuleRef, OperationDescriptor};

/// Maximum suggestions attached to a `NotFound` error.
const MAX_SUGGESTIONS: usize = 3;

/// Minimum similarity for a name to be suggested.
const SUGGESTION_FLOOR: f64 = 0.3;

// ─── OperationRegistry ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct OperationRegistry {
    /// Descriptors in registration order.
    operations: Vec<OperationDescriptor>,
    /// `name → index into operations`.
    by_name: HashMap<String, usize>,
    /// Interned module handles, in order of first appearance.
    modules: Vec<ModuleRef>,
    module_ids: HashMap<String, usize>,
    /// Category display metadata from the catalog file.
    category_info: Vec<CategoryInfo>,
    frozen: bool,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and freeze a registry from a parsed catalog.
    pub fn from_catalog(catalog: Catalog) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for entry in catalog.operations {
            registry.register(entry)?;
        }
        registry.category_info = catalog.categories;
        registry.freeze();

        tracing::info!(
            operations = registry.len(),
            modules = registry.modules.len(),
            version = catalog.version,
            "operation registry built"
        );
        Ok(registry)
    }

    /// Parse a JSON catalog and build a frozen registry from it.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let catalog: Catalog =
            serde_json::from_str(json).map_err(|e| RegistryError::MalformedCatalog {
                reason: e.to_string(),
            })?;
        Self::from_catalog(catalog)
    }

    /// Register one operation. Only valid before [`freeze`](Self::freeze).
    pub fn register(&mut self, entry: CatalogEntry) -> Result<&OperationDescriptor, RegistryError> {
        if self.frozen {
            return Err(RegistryError::RegistryFrozen { name: entry.name });
        }
        for (field, value) in [
            ("name", &entry.name),
            ("module", &entry.module),
            ("category", &entry.category),
        ] {
            if value.trim().is_empty() {
                return Err(RegistryError::MalformedCatalog {
                    reason: format!("operation '{}' has an empty {field}", entry.name),
                });
            }
        }
        if self.by_name.contains_key(&entry.name) {
            return Err(RegistryError::DuplicateOperation { name: entry.name });
        }

        let module = self.intern_module(&entry.module);
        let requires_adom = entry.parameters.contains_key("adom");
        let index = self.operations.len();
        self.by_name.insert(entry.name.clone(), index);
        self.operations.push(OperationDescriptor {
            name: entry.name,
            module,
            category: entry.category,
            description: entry.description,
            parameters: entry.parameters,
            requires_adom,
        });
        Ok(&self.operations[index])
    }

    fn intern_module(&mut self, name: &str) -> ModuleRef {
        if let Some(&id) = self.module_ids.get(name) {
            return self.modules[id].clone();
        }
        let id = self.modules.len();
        let module = ModuleRef::new(id, name);
        self.module_ids.insert(name.to_string(), id);
        self.modules.push(module.clone());
        module
    }

    /// Reject all further registration.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Result<&OperationDescriptor, RegistryError> {
        self.by_name
            .get(name)
            .map(|&i| &self.operations[i])
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
                suggestions: self.find_similar(name, MAX_SUGGESTIONS),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Operations in `category`, in registration order.
    pub fn list_by_category(&self, category: &str) -> Vec<&OperationDescriptor> {
        self.operations
            .iter()
            .filter(|op| op.category == category)
            .collect()
    }

    /// All descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.operations.iter()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Distinct category names in order of first registration.
    pub fn category_names(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for op in &self.operations {
            if !seen.contains(&op.category.as_str()) {
                seen.push(op.category.as_str());
            }
        }
        seen
    }

    pub fn category_info(&self, category: &str) -> Option<&CategoryInfo> {
        self.category_info.iter().find(|c| c.name == category)
    }

    /// Interned module handles.
    pub fn modules(&self) -> &[ModuleRef] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&ModuleRef> {
        self.module_ids.get(name).map(|&id| &self.modules[id])
    }

    /// Registered names most similar to `name`, best first.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let query = name.trim().to_lowercase();

        let mut scored: Vec<(&str, f64)> = self
            .operations
            .iter()
            .map(|op| (op.name.as_str(), similarity(&query, &op.name.to_lowercase())))
            .filter(|(_, score)| *score > SUGGESTION_FLOOR)
            .collect();

        // Stable sort keeps registration order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored.into_iter().map(|(n, _)| n.to_string()).collect()
    }
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Levenshtein edit distance, single-row DP.
fn levenshtein(a: &str, b: &str) -> usize {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let n = b.len();

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity (0.0 = unrelated, 1.0 = identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
