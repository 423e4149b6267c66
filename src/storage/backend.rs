use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::types::{
    DocumentRecord, FrequencyDelta, IndexMetadata, IndexStatistics, LabelRecord, PostingRecord,
    TagRecord, TermMatch, TermRecord,
};

/// One term of a document as produced by ingestion, before term ids are
/// resolved against the vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct TermIngest {
    pub term: String,
    pub term_frequency: u64,
    pub character_positions: Vec<u64>,
    pub term_positions: Vec<u64>,
}

/// Complete atomic document write: document row, vocabulary upserts,
/// postings, and frequency increments land together or not at all.
#[derive(Debug, Clone)]
pub struct DocumentWrite {
    pub document: DocumentRecord,
    pub terms: Vec<TermIngest>,
    /// When set, an existing document with the same id is removed first,
    /// inside the same transaction.
    pub replace_existing: bool,
}

/// Candidate selection request: Boolean term matching combined with label
/// and tag constraints, answered by one backend query.
#[derive(Debug, Clone, Default)]
pub struct MatchQuery {
    pub term_ids: Vec<String>,
    /// true = every term must match (AND), false = any term (OR).
    pub require_all: bool,
    /// Document must carry all of these labels (case-insensitive).
    pub labels: Vec<String>,
    /// Document must carry all of these (key, value) tags, value compared
    /// by exact equality.
    pub tags: Vec<(String, Option<String>)>,
}

/// Full record-level state of an index, used to snapshot an in-memory
/// index into a persistent one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub metadata: Option<IndexMetadata>,
    pub documents: Vec<DocumentRecord>,
    pub terms: Vec<TermRecord>,
    pub postings: Vec<PostingRecord>,
    pub labels: Vec<LabelRecord>,
    pub tags: Vec<TagRecord>,
}

/// Uniform contract over the in-memory and persistent backends. Both
/// provide identical result semantics; differences are limited to
/// durability and flush behavior.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
    async fn flush(&self) -> Result<()>;

    // ── Index metadata ──────────────────────────────────────────────────

    async fn get_metadata(&self) -> Result<Option<IndexMetadata>>;
    async fn put_metadata(&self, metadata: &IndexMetadata) -> Result<()>;
    async fn touch_metadata(&self, at: DateTime<Utc>) -> Result<()>;

    // ── Documents ───────────────────────────────────────────────────────

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>>;
    async fn get_document_by_name(&self, name: &str) -> Result<Option<DocumentRecord>>;
    async fn list_documents(&self, limit: usize, offset: usize) -> Result<Vec<DocumentRecord>>;
    async fn document_exists(&self, id: &str) -> Result<bool>;
    async fn document_exists_by_name(&self, name: &str) -> Result<bool>;

    /// Documents sharing a content fingerprint, for duplicate detection.
    async fn get_documents_by_sha256(&self, sha256: &str) -> Result<Vec<DocumentRecord>>;

    /// Atomic ingest per [`DocumentWrite`]. Fails Duplicate when the id or
    /// name is already taken and `replace_existing` does not cover it.
    async fn ingest_document(&self, write: DocumentWrite) -> Result<()>;

    /// Atomic removal: postings deleted, term frequencies decremented,
    /// orphaned terms pruned, document-scoped labels/tags dropped, document
    /// row deleted. Returns false when the id is unknown.
    async fn remove_document(&self, id: &str) -> Result<bool>;

    // ── Terms ───────────────────────────────────────────────────────────

    async fn get_term(&self, term: &str) -> Result<Option<TermRecord>>;
    async fn get_terms_by_ids(&self, ids: &[String]) -> Result<Vec<TermRecord>>;

    /// Vocabulary ordered by descending document frequency.
    async fn get_top_terms(&self, limit: usize) -> Result<Vec<TermRecord>>;

    /// Resolve terms to ids, inserting missing ones with zero frequencies.
    /// Returns term text → term id.
    async fn add_or_get_terms_batch(&self, terms: &[String]) -> Result<HashMap<String, String>>;

    async fn increment_term_frequencies_batch(
        &self,
        deltas: &HashMap<String, FrequencyDelta>,
    ) -> Result<()>;
    async fn decrement_term_frequencies_batch(
        &self,
        deltas: &HashMap<String, FrequencyDelta>,
    ) -> Result<()>;

    // ── Postings ────────────────────────────────────────────────────────

    async fn insert_postings_batch(&self, postings: &[PostingRecord]) -> Result<()>;
    async fn get_postings_for_document(&self, document_id: &str) -> Result<Vec<PostingRecord>>;

    // ── Labels (document_id None = index-level) ─────────────────────────

    async fn add_label(&self, document_id: Option<&str>, label: &str) -> Result<()>;
    async fn add_labels_batch(&self, document_id: Option<&str>, labels: &[String]) -> Result<()>;
    async fn remove_label(&self, document_id: Option<&str>, label: &str) -> Result<bool>;
    async fn get_labels(&self, document_id: Option<&str>) -> Result<Vec<String>>;
    async fn replace_labels(&self, document_id: Option<&str>, labels: &[String]) -> Result<()>;

    // ── Tags (document_id None = index-level) ───────────────────────────

    async fn set_tag(
        &self,
        document_id: Option<&str>,
        key: &str,
        value: Option<&str>,
    ) -> Result<()>;
    async fn add_tags_batch(
        &self,
        document_id: Option<&str>,
        tags: &[(String, Option<String>)],
    ) -> Result<()>;
    async fn remove_tag(&self, document_id: Option<&str>, key: &str) -> Result<bool>;
    async fn get_tags(&self, document_id: Option<&str>) -> Result<Vec<TagRecord>>;
    async fn replace_tags(
        &self,
        document_id: Option<&str>,
        tags: &[(String, Option<String>)],
    ) -> Result<()>;

    // ── Search and statistics ───────────────────────────────────────────

    /// Single combined candidate query: Boolean mode over term ids plus
    /// label/tag constraints. Returns one row per (document, query term)
    /// posting among the candidates.
    async fn find_matches(&self, query: &MatchQuery) -> Result<Vec<TermMatch>>;

    async fn statistics(&self) -> Result<IndexStatistics>;

    // ── Snapshots ───────────────────────────────────────────────────────

    async fn export_snapshot(&self) -> Result<IndexSnapshot>;
    async fn import_snapshot(&self, snapshot: IndexSnapshot) -> Result<()>;
}
