use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::core::error::{Error, Result};
use crate::core::types::{
    DocumentRecord, FrequencyDelta, IndexMetadata, IndexStatistics, PostingRecord, TagRecord,
    TermMatch, TermRecord,
};
use crate::storage::backend::{
    DocumentWrite, IndexSnapshot, MatchQuery, StorageBackend,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    New,
    Open,
    Closed,
}

/// Uniform entry point over the active backend. Every call checks the
/// lifecycle first: operations before `open` fail NotOpen, operations
/// after `dispose` fail Disposed.
pub struct Repository {
    backend: Arc<dyn StorageBackend>,
    state: RwLock<Lifecycle>,
}

impl Repository {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Repository {
            backend,
            state: RwLock::new(Lifecycle::New),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.state.read()
    }

    fn guard(&self) -> Result<()> {
        match *self.state.read() {
            Lifecycle::Open => Ok(()),
            Lifecycle::New => Err(Error::not_open()),
            Lifecycle::Closed => Err(Error::disposed()),
        }
    }

    /// Idempotent: opening an open repository is a no-op; a disposed one
    /// cannot come back.
    pub async fn open(&self) -> Result<()> {
        match *self.state.read() {
            Lifecycle::Open => return Ok(()),
            Lifecycle::Closed => return Err(Error::disposed()),
            Lifecycle::New => {}
        }
        self.backend.initialize().await?;
        *self.state.write() = Lifecycle::Open;
        Ok(())
    }

    /// Terminal transition; the backend is flushed and closed.
    pub async fn dispose(&self) -> Result<()> {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, Lifecycle::Closed)
        };
        if previous == Lifecycle::Open {
            self.backend.close().await?;
        }
        Ok(())
    }

    pub async fn flush(&self) -> Result<()> {
        self.guard()?;
        self.backend.flush().await
    }

    // ── Index metadata ──────────────────────────────────────────────────

    pub async fn get_metadata(&self) -> Result<Option<IndexMetadata>> {
        self.guard()?;
        self.backend.get_metadata().await
    }

    pub async fn put_metadata(&self, metadata: &IndexMetadata) -> Result<()> {
        self.guard()?;
        self.backend.put_metadata(metadata).await
    }

    pub async fn touch_metadata(&self, at: DateTime<Utc>) -> Result<()> {
        self.guard()?;
        self.backend.touch_metadata(at).await
    }

    // ── Documents ───────────────────────────────────────────────────────

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        self.guard()?;
        self.backend.get_document(id).await
    }

    pub async fn get_document_by_name(&self, name: &str) -> Result<Option<DocumentRecord>> {
        self.guard()?;
        self.backend.get_document_by_name(name).await
    }

    pub async fn list_documents(&self, limit: usize, offset: usize) -> Result<Vec<DocumentRecord>> {
        self.guard()?;
        self.backend.list_documents(limit, offset).await
    }

    pub async fn document_exists(&self, id: &str) -> Result<bool> {
        self.guard()?;
        self.backend.document_exists(id).await
    }

    pub async fn document_exists_by_name(&self, name: &str) -> Result<bool> {
        self.guard()?;
        self.backend.document_exists_by_name(name).await
    }

    pub async fn get_documents_by_sha256(&self, sha256: &str) -> Result<Vec<DocumentRecord>> {
        self.guard()?;
        self.backend.get_documents_by_sha256(sha256).await
    }

    pub async fn ingest_document(&self, write: DocumentWrite) -> Result<()> {
        self.guard()?;
        self.backend.ingest_document(write).await
    }

    pub async fn remove_document(&self, id: &str) -> Result<bool> {
        self.guard()?;
        self.backend.remove_document(id).await
    }

    // ── Terms ───────────────────────────────────────────────────────────

    pub async fn get_term(&self, term: &str) -> Result<Option<TermRecord>> {
        self.guard()?;
        self.backend.get_term(term).await
    }

    pub async fn get_terms_by_ids(&self, ids: &[String]) -> Result<Vec<TermRecord>> {
        self.guard()?;
        self.backend.get_terms_by_ids(ids).await
    }

    pub async fn get_top_terms(&self, limit: usize) -> Result<Vec<TermRecord>> {
        self.guard()?;
        self.backend.get_top_terms(limit).await
    }

    pub async fn add_or_get_terms_batch(
        &self,
        terms: &[String],
    ) -> Result<HashMap<String, String>> {
        self.guard()?;
        self.backend.add_or_get_terms_batch(terms).await
    }

    pub async fn increment_term_frequencies_batch(
        &self,
        deltas: &HashMap<String, FrequencyDelta>,
    ) -> Result<()> {
        self.guard()?;
        self.backend.increment_term_frequencies_batch(deltas).await
    }

    pub async fn decrement_term_frequencies_batch(
        &self,
        deltas: &HashMap<String, FrequencyDelta>,
    ) -> Result<()> {
        self.guard()?;
        self.backend.decrement_term_frequencies_batch(deltas).await
    }

    // ── Postings ────────────────────────────────────────────────────────

    pub async fn insert_postings_batch(&self, postings: &[PostingRecord]) -> Result<()> {
        self.guard()?;
        self.backend.insert_postings_batch(postings).await
    }

    pub async fn get_postings_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<PostingRecord>> {
        self.guard()?;
        self.backend.get_postings_for_document(document_id).await
    }

    // ── Labels ──────────────────────────────────────────────────────────

    pub async fn add_label(&self, document_id: Option<&str>, label: &str) -> Result<()> {
        self.guard()?;
        self.backend.add_label(document_id, label).await
    }

    pub async fn add_labels_batch(
        &self,
        document_id: Option<&str>,
        labels: &[String],
    ) -> Result<()> {
        self.guard()?;
        self.backend.add_labels_batch(document_id, labels).await
    }

    pub async fn remove_label(&self, document_id: Option<&str>, label: &str) -> Result<bool> {
        self.guard()?;
        self.backend.remove_label(document_id, label).await
    }

    pub async fn get_labels(&self, document_id: Option<&str>) -> Result<Vec<String>> {
        self.guard()?;
        self.backend.get_labels(document_id).await
    }

    pub async fn replace_labels(
        &self,
        document_id: Option<&str>,
        labels: &[String],
    ) -> Result<()> {
        self.guard()?;
        self.backend.replace_labels(document_id, labels).await
    }

    // ── Tags ────────────────────────────────────────────────────────────

    pub async fn set_tag(
        &self,
        document_id: Option<&str>,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.guard()?;
        self.backend.set_tag(document_id, key, value).await
    }

    pub async fn add_tags_batch(
        &self,
        document_id: Option<&str>,
        tags: &[(String, Option<String>)],
    ) -> Result<()> {
        self.guard()?;
        self.backend.add_tags_batch(document_id, tags).await
    }

    pub async fn remove_tag(&self, document_id: Option<&str>, key: &str) -> Result<bool> {
        self.guard()?;
        self.backend.remove_tag(document_id, key).await
    }

    pub async fn get_tags(&self, document_id: Option<&str>) -> Result<Vec<TagRecord>> {
        self.guard()?;
        self.backend.get_tags(document_id).await
    }

    pub async fn replace_tags(
        &self,
        document_id: Option<&str>,
        tags: &[(String, Option<String>)],
    ) -> Result<()> {
        self.guard()?;
        self.backend.replace_tags(document_id, tags).await
    }

    // ── Search and statistics ───────────────────────────────────────────

    pub async fn find_matches(&self, query: &MatchQuery) -> Result<Vec<TermMatch>> {
        self.guard()?;
        self.backend.find_matches(query).await
    }

    pub async fn statistics(&self) -> Result<IndexStatistics> {
        self.guard()?;
        self.backend.statistics().await
    }

    // ── Snapshots ───────────────────────────────────────────────────────

    pub async fn export_snapshot(&self) -> Result<IndexSnapshot> {
        self.guard()?;
        self.backend.export_snapshot().await
    }

    pub async fn import_snapshot(&self, snapshot: IndexSnapshot) -> Result<()> {
        self.guard()?;
        self.backend.import_snapshot(snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::ids::IdGenerator;
    use crate::storage::memory::MemoryBackend;

    fn repository() -> Repository {
        Repository::new(Arc::new(MemoryBackend::new(Arc::new(IdGenerator::new()))))
    }

    #[tokio::test]
    async fn test_guards_before_open() {
        let repo = repository();
        let err = repo.statistics().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotOpen);
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let repo = repository();
        repo.open().await.unwrap();
        repo.open().await.unwrap();
        assert_eq!(repo.lifecycle(), Lifecycle::Open);
        assert!(repo.statistics().await.is_ok());
    }

    #[tokio::test]
    async fn test_dispose_is_terminal() {
        let repo = repository();
        repo.open().await.unwrap();
        repo.dispose().await.unwrap();
        assert_eq!(repo.lifecycle(), Lifecycle::Closed);

        let err = repo.statistics().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Disposed);
        let err = repo.open().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Disposed);
    }
}
