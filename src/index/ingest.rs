use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::analysis::analyzer::Analyzer;
use crate::core::error::{Error, Result};
use crate::core::ids::IdGenerator;
use crate::core::types::DocumentRecord;
use crate::storage::backend::{DocumentWrite, TermIngest};

/// Turns raw text into an atomic [`DocumentWrite`]: runs the analyzer,
/// aggregates per-term frequencies and position lists, and fills in the
/// document row with fingerprint and timestamps.
pub struct Indexer {
    analyzer: Arc<Analyzer>,
    ids: Arc<IdGenerator>,
}

impl Indexer {
    pub fn new(analyzer: Arc<Analyzer>, ids: Arc<IdGenerator>) -> Self {
        Indexer { analyzer, ids }
    }

    /// Aggregate analyzed tokens by term. Tokens arrive in document order,
    /// so the position lists come out strictly ascending.
    pub fn analyze_terms(&self, content: &str) -> Vec<TermIngest> {
        let mut grouped: BTreeMap<String, TermIngest> = BTreeMap::new();
        for token in self.analyzer.analyze(content) {
            let entry = grouped
                .entry(token.text.clone())
                .or_insert_with(|| TermIngest {
                    term: token.text.clone(),
                    term_frequency: 0,
                    character_positions: Vec::new(),
                    term_positions: Vec::new(),
                });
            entry.term_frequency += 1;
            entry.character_positions.push(token.offset as u64);
            entry.term_positions.push(u64::from(token.position));
        }
        grouped.into_values().collect()
    }

    pub fn prepare(
        &self,
        id: Option<String>,
        name: &str,
        content: &str,
        replace_existing: bool,
    ) -> Result<DocumentWrite> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_argument("document name must not be empty"));
        }
        let id = match id {
            Some(id) => {
                if id.trim().is_empty() {
                    return Err(Error::invalid_argument("document id must not be empty"));
                }
                id
            }
            None => self.ids.next_id(),
        };

        let terms = self.analyze_terms(content);
        let now = Utc::now();
        let document = DocumentRecord {
            id,
            name: name.to_string(),
            content_sha256: Some(content_sha256(content)),
            document_length: content.chars().count() as u64,
            term_count: terms.len() as u64,
            indexed_utc: now,
            last_modified_utc: now,
            created_utc: now,
        };

        Ok(DocumentWrite {
            document,
            terms,
            replace_existing,
        })
    }
}

pub fn content_sha256(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
