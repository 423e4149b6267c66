use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::core::cancel::{CancellationToken, ensure_not_cancelled};
use crate::core::error::Result;
use crate::core::types::TermRecord;
use crate::search::query::{PreparedQuery, SearchOptions};
use crate::search::results::{ScoredDocument, SearchResults};
use crate::storage::backend::MatchQuery;
use crate::storage::repository::Repository;

/// Stateless ranked-search execution over the repository: candidate
/// selection, scoring, ordering and truncation.
pub struct QueryExecutor {
    pub phrase_search_bonus: f64,
    pub sigmoid_normalization_divisor: f64,
}

struct DocAccumulator {
    raw_score: f64,
    matched: HashSet<String>,
    positions: HashMap<String, Vec<u64>>,
}

impl QueryExecutor {
    pub fn new(phrase_search_bonus: f64, sigmoid_normalization_divisor: f64) -> Self {
        QueryExecutor {
            phrase_search_bonus,
            sigmoid_normalization_divisor,
        }
    }

    pub async fn execute(
        &self,
        repo: &Repository,
        query: &PreparedQuery,
        options: &SearchOptions,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<SearchResults> {
        let started = Instant::now();
        if query.is_empty() {
            return Ok(SearchResults::empty(started.elapsed()));
        }

        // Resolve query terms against the vocabulary. In AND mode a term
        // the vocabulary has never seen rules out every document.
        let mut known: Vec<TermRecord> = Vec::with_capacity(query.terms.len());
        for term in &query.terms {
            ensure_not_cancelled(cancel)?;
            match repo.get_term(term).await? {
                Some(record) => known.push(record),
                None if options.and_logic => {
                    return Ok(SearchResults::empty(started.elapsed()));
                }
                None => {}
            }
        }
        if known.is_empty() {
            return Ok(SearchResults::empty(started.elapsed()));
        }

        ensure_not_cancelled(cancel)?;
        let total_docs = repo.statistics().await?.doc_count;

        ensure_not_cancelled(cancel)?;
        let matches = repo
            .find_matches(&MatchQuery {
                term_ids: known.iter().map(|t| t.id.clone()).collect(),
                require_all: options.and_logic,
                labels: options.labels.clone(),
                tags: options.tags.clone(),
            })
            .await?;

        let idf_by_term: HashMap<&str, f64> = known
            .iter()
            .map(|t| (t.id.as_str(), bm25_idf(total_docs, t.document_frequency)))
            .collect();
        let term_text_by_id: HashMap<&str, &str> = known
            .iter()
            .map(|t| (t.id.as_str(), t.term.as_str()))
            .collect();

        let mut accumulators: HashMap<String, DocAccumulator> = HashMap::new();
        for m in matches {
            let idf = idf_by_term.get(m.term_id.as_str()).copied().unwrap_or(0.0);
            let entry = accumulators
                .entry(m.document_id.clone())
                .or_insert_with(|| DocAccumulator {
                    raw_score: 0.0,
                    matched: HashSet::new(),
                    positions: HashMap::new(),
                });
            entry.raw_score += m.term_frequency as f64 * idf;
            if let Some(text) = term_text_by_id.get(m.term_id.as_str()) {
                entry.matched.insert((*text).to_string());
            }
            entry.positions.insert(m.term_id.clone(), m.term_positions);
        }

        // Query-order term id sequence for the phrase walk. Only complete:
        // a document missing any query term can't contain the phrase.
        let phrase_sequence: Option<Vec<&str>> = if query.terms.len() >= 2
            && known.len() == query.terms.len()
        {
            Some(known.iter().map(|t| t.id.as_str()).collect())
        } else {
            None
        };

        let mut hits: Vec<ScoredDocument> = accumulators
            .into_iter()
            .map(|(document_id, acc)| {
                let mut raw = acc.raw_score;
                if let Some(sequence) = &phrase_sequence {
                    if contains_phrase(sequence, &acc.positions) {
                        raw *= self.phrase_search_bonus;
                    }
                }
                let score = raw / (raw + self.sigmoid_normalization_divisor);
                let matched_terms: Vec<String> = query
                    .terms
                    .iter()
                    .filter(|term| acc.matched.contains(*term))
                    .cloned()
                    .collect();
                ScoredDocument {
                    document_id,
                    score,
                    matched_term_count: matched_terms.len(),
                    matched_terms,
                    document: None,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.matched_term_count.cmp(&a.matched_term_count))
                .then_with(|| a.document_id.cmp(&b.document_id))
        });

        let total_count = hits.len();
        hits.truncate(limit);

        if options.include_documents {
            for hit in &mut hits {
                ensure_not_cancelled(cancel)?;
                hit.document = repo.get_document(&hit.document_id).await?;
            }
        }

        Ok(SearchResults {
            hits,
            total_count,
            search_time: started.elapsed(),
        })
    }
}

/// Smoothed inverse document frequency; stays positive even when a term
/// appears in most documents.
fn bm25_idf(total_docs: u64, document_frequency: u64) -> f64 {
    let n = total_docs as f64;
    let df = document_frequency as f64;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// True when the terms of `sequence` occur at consecutive word positions,
/// in order, somewhere in the document.
fn contains_phrase(sequence: &[&str], positions: &HashMap<String, Vec<u64>>) -> bool {
    let Some(first) = sequence.first().and_then(|id| positions.get(*id)) else {
        return false;
    };
    let sets: Vec<Option<HashSet<u64>>> = sequence
        .iter()
        .map(|id| positions.get(*id).map(|p| p.iter().copied().collect()))
        .collect();
    if sets.iter().any(|s| s.is_none()) {
        return false;
    }

    'starts: for &start in first {
        for (k, set) in sets.iter().enumerate().skip(1) {
            let wanted = start + k as u64;
            match set {
                Some(set) if set.contains(&wanted) => {}
                _ => continue 'starts,
            }
        }
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bm25_idf_monotonic_in_rarity() {
        let rare = bm25_idf(100, 1);
        let common = bm25_idf(100, 90);
        assert!(rare > common);
        assert!(common > 0.0);
    }

    #[test]
    fn test_contains_phrase_consecutive() {
        let mut positions = HashMap::new();
        positions.insert("a".to_string(), vec![0, 7]);
        positions.insert("b".to_string(), vec![3, 8]);
        // "a" at 7 followed by "b" at 8.
        assert!(contains_phrase(&["a", "b"], &positions));
        // Reverse order never lines up.
        assert!(!contains_phrase(&["b", "a"], &positions));
    }

    #[test]
    fn test_contains_phrase_three_terms() {
        let mut positions = HashMap::new();
        positions.insert("a".to_string(), vec![4]);
        positions.insert("b".to_string(), vec![5]);
        positions.insert("c".to_string(), vec![6]);
        assert!(contains_phrase(&["a", "b", "c"], &positions));

        positions.insert("c".to_string(), vec![7]);
        assert!(!contains_phrase(&["a", "b", "c"], &positions));
    }

    #[test]
    fn test_contains_phrase_missing_term() {
        let mut positions = HashMap::new();
        positions.insert("a".to_string(), vec![0]);
        assert!(!contains_phrase(&["a", "b"], &positions));
    }

    #[test]
    fn test_sigmoid_normalization_bounds() {
        let executor = QueryExecutor::new(2.0, 10.0);
        // score = raw / (raw + divisor) stays in (0, 1).
        for raw in [0.1_f64, 1.0, 10.0, 1000.0] {
            let score = raw / (raw + executor.sigmoid_normalization_divisor);
            assert!(score > 0.0 && score < 1.0);
        }
    }
}
