use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::types::DocumentRecord;

/// Document with relevance score. Scores are sigmoid-normalized to [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document_id: String,
    pub score: f64,
    pub matched_term_count: usize,
    /// The query terms present in this document, in query order.
    pub matched_terms: Vec<String>,
    /// Populated when the search asked for document metadata.
    pub document: Option<DocumentRecord>,
}

/// Search results container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub hits: Vec<ScoredDocument>,
    /// Matching documents before truncation to the result limit.
    pub total_count: usize,
    pub search_time: Duration,
}

impl SearchResults {
    pub fn empty(search_time: Duration) -> Self {
        SearchResults {
            hits: Vec::new(),
            total_count: 0,
            search_time,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn max_score(&self) -> f64 {
        self.hits.first().map(|hit| hit.score).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_results() {
        let results = SearchResults::empty(Duration::from_millis(3));
        assert!(results.is_empty());
        assert_eq!(results.total_count, 0);
        assert_eq!(results.max_score(), 0.0);
    }
}
