use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored document metadata. Content itself is not retained; only the
/// fingerprint and length survive ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    pub content_sha256: Option<String>,
    pub document_length: u64,
    pub term_count: u64,
    pub indexed_utc: DateTime<Utc>,
    pub last_modified_utc: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

/// Vocabulary entry with collection-wide frequency counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermRecord {
    pub id: String,
    pub term: String,
    pub document_frequency: u64,
    pub total_frequency: u64,
}

/// Document-term mapping. Position lists are strictly ascending and both
/// have length equal to `term_frequency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingRecord {
    pub document_id: String,
    pub term_id: String,
    pub term_frequency: u64,
    pub character_positions: Vec<u64>,
    pub term_positions: Vec<u64>,
}

/// Freeform string attached to a document, or to the index itself when
/// `document_id` is None.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub id: String,
    pub document_id: Option<String>,
    pub label: String,
}

/// Key-value pair attached to a document, or to the index itself when
/// `document_id` is None. Upserted by (document_id, key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: String,
    pub document_id: Option<String>,
    pub key: String,
    pub value: Option<String>,
}

/// Single metadata row per index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub id: String,
    pub name: String,
    pub created_utc: DateTime<Utc>,
    pub last_modified_utc: DateTime<Utc>,
}

/// Collection-level counters for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub doc_count: u64,
    pub term_count: u64,
    pub posting_count: u64,
    pub total_doc_size: u64,
    pub avg_doc_length: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermStatistics {
    pub document_frequency: u64,
    pub total_frequency: u64,
}

/// A term as it appears in one document, for single-shot document fetches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTermEntry {
    pub term: String,
    pub term_frequency: u64,
}

/// Document together with everything attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentWithMetadata {
    pub document: DocumentRecord,
    pub labels: Vec<String>,
    pub tags: Vec<TagRecord>,
    pub terms: Vec<DocumentTermEntry>,
}

/// One (doc, term) row returned by the candidate match query. Carries just
/// enough for scoring and phrase checks.
#[derive(Debug, Clone, PartialEq)]
pub struct TermMatch {
    pub document_id: String,
    pub term_id: String,
    pub term_frequency: u64,
    pub term_positions: Vec<u64>,
}

/// Frequency adjustment applied to a term during ingest or removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrequencyDelta {
    pub document_frequency: u64,
    pub total_frequency: u64,
}

impl FrequencyDelta {
    pub fn new(document_frequency: u64, total_frequency: u64) -> Self {
        FrequencyDelta {
            document_frequency,
            total_frequency,
        }
    }
}
