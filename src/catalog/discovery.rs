//! Discovery service: search, category listing and lookup over the registry.
//!
//! The catalog holds hundreds of operations, not millions, so search is a
//! linear scan with a token-overlap score. No index is built.

use std::sync::{Arc, OnceLock};

use serde::Serialize;

use super::errors::RegistryError;
use super::registry::OperationRegistry;
use super::types::OperationDescriptor;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const MAX_SEARCH_LIMIT: usize = 100;

// Per-token weights. Name matches dominate, description matches break ties.
const NAME_EXACT: f64 = 3.0;
const NAME_PREFIX: f64 = 2.0;
const CATEGORY_EXACT: f64 = 2.0;
const CATEGORY_PREFIX: f64 = 1.0;
const DESCRIPTION_EXACT: f64 = 1.0;
const DESCRIPTION_PREFIX: f64 = 0.5;
/// Bonus when the whole query appears verbatim inside the name.
const NAME_SUBSTRING: f64 = 1.0;

/// Shortest token allowed to match as a prefix.
const MIN_PREFIX_LEN: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit<'a> {
    pub descriptor: &'a OperationDescriptor,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub category: String,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ─── DiscoveryService ────────────────────────────────────────────────────────

/// Read-only query surface. Never mutates the registry and never touches
/// the network.
pub struct DiscoveryService {
    registry: Arc<OperationRegistry>,
    categories: OnceLock<Vec<CategorySummary>>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self {
            registry,
            categories: OnceLock::new(),
        }
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// Rank operations against `query`, optionally within one category.
    ///
    /// An empty query lists the (filtered) operations in registration
    /// order with score 0. Otherwise only operations scoring above zero
    /// are returned, best first, ties in registration order.
    pub fn search(&self, query: &str, category: Option<&str>, limit: usize) -> Vec<SearchHit<'_>> {
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        let terms = tokenize(query);
        let in_category = |op: &&OperationDescriptor| {
            category.map_or(true, |c| op.category.eq_ignore_ascii_case(c))
        };

        let mut hits: Vec<SearchHit<'_>> = if terms.is_empty() {
            self.registry
                .iter()
                .filter(in_category)
                .map(|descriptor| SearchHit { descriptor, score: 0.0 })
                .collect()
        } else {
            let phrase = query.trim().to_lowercase().replace(' ', "_");
            self.registry
                .iter()
                .filter(in_category)
                .map(|descriptor| SearchHit {
                    descriptor,
                    score: score(descriptor, &terms, &phrase),
                })
                .filter(|hit| hit.score > 0.0)
                .collect()
        };

        // Stable: equal scores stay in registration order.
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);

        tracing::debug!(query = %query, category = ?category, hits = hits.len(), "operation search");
        hits
    }

    /// Categories with their operation counts, in order of first
    /// registration. Computed once; the registry never changes.
    pub fn list_categories(&self) -> &[CategorySummary] {
        self.categories.get_or_init(|| {
            self.registry
                .category_names()
                .into_iter()
                .map(|name| {
                    let info = self.registry.category_info(name);
                    CategorySummary {
                        category: name.to_string(),
                        count: self.registry.list_by_category(name).len(),
                        title: info.and_then(|i| i.title.clone()),
                        description: info.and_then(|i| i.description.clone()),
                    }
                })
                .collect()
        })
    }

    pub fn describe(&self, name: &str) -> Result<&OperationDescriptor, RegistryError> {
        self.registry.get(name)
    }

    pub fn suggest(&self, name: &str, max_results: usize) -> Vec<String> {
        self.registry.find_similar(name, max_results)
    }
}

// ─── Scoring ─────────────────────────────────────────────────────────────────

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn token_match(term: &str, candidates: &[String], exact: f64, prefix: f64) -> f64 {
    let mut best = 0.0_f64;
    for candidate in candidates {
        if candidate == term {
            return exact;
        }
        let short = term.len().min(candidate.len());
        if short >= MIN_PREFIX_LEN && (candidate.starts_with(term) || term.starts_with(candidate.as_str())) {
            best = best.max(prefix);
        }
    }
    best
}

fn score(op: &OperationDescriptor, terms: &[String], phrase: &str) -> f64 {
    let name = tokenize(&op.name);
    let category = tokenize(&op.category);
    let description = tokenize(&op.description);

    let mut total: f64 = terms
        .iter()
        .map(|term| {
            token_match(term, &name, NAME_EXACT, NAME_PREFIX)
                + token_match(term, &category, CATEGORY_EXACT, CATEGORY_PREFIX)
                + token_match(term, &description, DESCRIPTION_EXACT, DESCRIPTION_PREFIX)
        })
        .sum();

    if total > 0.0 && !phrase.is_empty() && op.name.to_lowercase().contains(phrase) {
        total += NAME_SUBSTRING;
    }
    total
}

// ─── Tests ───────────────────────────────────────────────────────────────────
