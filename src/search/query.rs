use std::collections::HashSet;

use crate::analysis::analyzer::Analyzer;

/// Result-count limits are clamped to this window.
pub const MIN_RESULT_LIMIT: usize = 1;
pub const MAX_RESULT_LIMIT: usize = 10_000;

/// Caller-facing search knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SearchOptions {
    /// None = use the index default.
    pub max_results: Option<usize>,
    /// true = every query term must match (AND); default is OR.
    pub and_logic: bool,
    /// Document must carry all of these labels (case-insensitive).
    pub labels: Vec<String>,
    /// Document must carry all of these (key, value) tags.
    pub tags: Vec<(String, Option<String>)>,
    /// Attach document metadata to each hit.
    pub include_documents: bool,
}

impl SearchOptions {
    pub fn and_logic() -> Self {
        SearchOptions {
            and_logic: true,
            ..Default::default()
        }
    }

    pub fn with_labels(labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        SearchOptions {
            labels: labels.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Query text after it has passed the analyzer: normalized terms, deduped,
/// in first-appearance order (phrase checks rely on that order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedQuery {
    pub terms: Vec<String>,
}

impl PreparedQuery {
    /// Queries go through the same pipeline as documents, so a query term
    /// always compares against stored normalized terms.
    pub fn prepare(analyzer: &Analyzer, query: &str) -> Self {
        let mut seen = HashSet::new();
        let mut terms = Vec::new();
        for token in analyzer.analyze(query) {
            if seen.insert(token.text.clone()) {
                terms.push(token.text);
            }
        }
        PreparedQuery { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

pub fn clamp_result_limit(limit: usize) -> usize {
    limit.clamp(MIN_RESULT_LIMIT, MAX_RESULT_LIMIT)
}
