use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::analysis::analyzer::Analyzer;
use crate::core::cancel::{CancellationToken, ensure_not_cancelled};
use crate::core::config::{IndexConfig, StorageMode};
use crate::core::error::{Error, Result};
use crate::core::ids::IdGenerator;
use crate::core::types::{
    DocumentRecord, DocumentTermEntry, DocumentWithMetadata, IndexMetadata, IndexStatistics,
    TagRecord, TermStatistics,
};
use crate::index::ingest::Indexer;
use crate::search::cache::QueryCache;
use crate::search::executor::QueryExecutor;
use crate::search::query::{PreparedQuery, SearchOptions, clamp_result_limit};
use crate::search::results::SearchResults;
use crate::storage::backend::StorageBackend;
use crate::storage::memory::MemoryBackend;
use crate::storage::repository::{Lifecycle, Repository};
use crate::storage::sqlite::SqliteBackend;

const QUERY_CACHE_CAPACITY: usize = 256;

/// A single named full-text index. All mutating operations are serialized
/// through one per-index writer lock; reads go straight to the backend.
///
/// Lifecycle: construct, `open`, use, `close`. Closed is terminal.
pub struct Index {
    config: IndexConfig,
    analyzer: Arc<Analyzer>,
    indexer: Indexer,
    repo: Repository,
    executor: QueryExecutor,
    query_cache: QueryCache,
    ids: Arc<IdGenerator>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index").field("config", &self.config).finish()
    }
}

impl Index {
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;

        let ids = Arc::new(IdGenerator::new());
        let backend: Arc<dyn StorageBackend> = match config.storage_mode {
            StorageMode::InMemory => Arc::new(MemoryBackend::new(Arc::clone(&ids))),
            StorageMode::OnDisk => Arc::new(SqliteBackend::new(
                config.database_path(),
                config.max_concurrent_ops,
                Arc::clone(&ids),
            )),
        };

        let analyzer = Arc::new(Analyzer::from_config(&config));
        let indexer = Indexer::new(Arc::clone(&analyzer), Arc::clone(&ids));
        let executor = QueryExecutor::new(
            config.phrase_search_bonus,
            config.sigmoid_normalization_divisor,
        );

        Ok(Index {
            analyzer,
            indexer,
            repo: Repository::new(backend),
            executor,
            query_cache: QueryCache::new(QUERY_CACHE_CAPACITY),
            ids,
            write_lock: Mutex::new(()),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.repo.lifecycle() == Lifecycle::Open
    }

    fn ensure_open(&self) -> Result<()> {
        match self.repo.lifecycle() {
            Lifecycle::Open => Ok(()),
            Lifecycle::New => Err(Error::not_open()),
            Lifecycle::Closed => Err(Error::disposed()),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Idempotent. Creates the storage directory and schema for the
    /// persistent backend and writes the metadata row on first open.
    pub async fn open(&self) -> Result<()> {
        self.repo.open().await?;

        if self.repo.get_metadata().await?.is_none() {
            let now = Utc::now();
            self.repo
                .put_metadata(&IndexMetadata {
                    id: self.ids.next_id(),
                    name: self.config.name.clone(),
                    created_utc: now,
                    last_modified_utc: now,
                })
                .await?;
        }
        tracing::info!(index = %self.config.name, mode = self.config.storage_mode.as_str(), "index opened");
        Ok(())
    }

    /// Waits for in-flight mutations, flushes the persistent backend and
    /// releases its connections. Terminal: every later call fails Disposed.
    pub async fn close(&self) -> Result<()> {
        let _write = self.write_lock.lock().await;
        self.query_cache.invalidate_all();
        self.repo.dispose().await?;
        tracing::info!(index = %self.config.name, "index closed");
        Ok(())
    }

    /// Persistent mode: durably commit pending writes. In-memory mode with
    /// a target: snapshot into a fresh persistent database inside the
    /// target directory; without a target, a no-op.
    pub async fn flush(&self, target: Option<&Path>) -> Result<()> {
        self.ensure_open()?;
        match self.config.storage_mode {
            StorageMode::OnDisk => self.repo.flush().await,
            StorageMode::InMemory => match target {
                Some(directory) => self.snapshot_to(directory).await,
                None => Ok(()),
            },
        }
    }

    async fn snapshot_to(&self, directory: &Path) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let snapshot = self.repo.export_snapshot().await?;
        let target = SqliteBackend::new(
            directory.join(&self.config.database_filename),
            self.config.max_concurrent_ops,
            Arc::clone(&self.ids),
        );
        target.initialize().await?;
        target.import_snapshot(snapshot).await?;
        target.close().await?;
        tracing::info!(index = %self.config.name, target = %directory.display(), "snapshot written");
        Ok(())
    }

    // ── Documents ───────────────────────────────────────────────────────

    pub async fn add_document(
        &self,
        name: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let write = self.indexer.prepare(None, name, content, false)?;
        let id = write.document.id.clone();
        self.commit_write(write, cancel).await?;
        Ok(id)
    }

    /// Fails Duplicate when the id (or name) is already taken; use
    /// [`Index::update_document`] to re-index under an existing id.
    pub async fn add_document_with_id(
        &self,
        id: &str,
        name: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let write = self.indexer.prepare(Some(id.to_string()), name, content, false)?;
        self.commit_write(write, cancel).await
    }

    /// Remove-then-add under one transaction. Idempotent for identical
    /// input; the id may be fresh or already present.
    pub async fn update_document(
        &self,
        id: &str,
        name: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let write = self.indexer.prepare(Some(id.to_string()), name, content, true)?;
        self.commit_write(write, cancel).await
    }

    async fn commit_write(
        &self,
        write: crate::storage::backend::DocumentWrite,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _write = self.write_lock.lock().await;
        ensure_not_cancelled(cancel)?;
        self.repo.ingest_document(write).await?;
        self.repo.touch_metadata(Utc::now()).await?;
        self.query_cache.invalidate_all();
        Ok(())
    }

    pub async fn remove_document(&self, id: &str, cancel: &CancellationToken) -> Result<bool> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        if id.trim().is_empty() {
            return Err(Error::invalid_argument("document id must not be empty"));
        }
        let _write = self.write_lock.lock().await;
        ensure_not_cancelled(cancel)?;
        let removed = self.repo.remove_document(id).await?;
        if removed {
            self.repo.touch_metadata(Utc::now()).await?;
            self.query_cache.invalidate_all();
        }
        Ok(removed)
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        self.repo.get_document(id).await
    }

    pub async fn get_document_by_name(&self, name: &str) -> Result<Option<DocumentRecord>> {
        self.repo.get_document_by_name(name).await
    }

    /// Single-shot fetch of a document together with its labels, tags and
    /// the terms it contains.
    pub async fn get_document_with_metadata(
        &self,
        id: &str,
    ) -> Result<Option<DocumentWithMetadata>> {
        let Some(document) = self.repo.get_document(id).await? else {
            return Ok(None);
        };
        let labels = self.repo.get_labels(Some(id)).await?;
        let tags = self.repo.get_tags(Some(id)).await?;

        let postings = self.repo.get_postings_for_document(id).await?;
        let term_ids: Vec<String> = postings.iter().map(|p| p.term_id.clone()).collect();
        let records = self.repo.get_terms_by_ids(&term_ids).await?;
        let mut terms: Vec<DocumentTermEntry> = postings
            .iter()
            .filter_map(|posting| {
                records
                    .iter()
                    .find(|record| record.id == posting.term_id)
                    .map(|record| DocumentTermEntry {
                        term: record.term.clone(),
                        term_frequency: posting.term_frequency,
                    })
            })
            .collect();
        terms.sort_by(|a, b| a.term.cmp(&b.term));

        Ok(Some(DocumentWithMetadata {
            document,
            labels,
            tags,
            terms,
        }))
    }

    pub async fn list_documents(&self, limit: usize, offset: usize) -> Result<Vec<DocumentRecord>> {
        self.repo
            .list_documents(clamp_result_limit(limit), offset)
            .await
    }

    pub async fn document_exists(&self, id: &str) -> Result<bool> {
        self.repo.document_exists(id).await
    }

    pub async fn document_exists_by_name(&self, name: &str) -> Result<bool> {
        self.repo.document_exists_by_name(name).await
    }

    /// Documents already holding the given content, by fingerprint.
    pub async fn find_documents_by_content(&self, content: &str) -> Result<Vec<DocumentRecord>> {
        let sha = crate::index::ingest::content_sha256(content);
        self.repo.get_documents_by_sha256(&sha).await
    }

    // ── Search ──────────────────────────────────────────────────────────

    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<SearchResults> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;

        let prepared = PreparedQuery::prepare(&self.analyzer, query);
        let limit = clamp_result_limit(
            options
                .max_results
                .unwrap_or(self.config.default_max_search_results),
        );

        if let Some(cached) = self.query_cache.get(&prepared.terms, limit, options) {
            tracing::debug!(index = %self.config.name, query, "query cache hit");
            return Ok(cached);
        }

        let results = self
            .executor
            .execute(&self.repo, &prepared, options, limit, cancel)
            .await?;
        self.query_cache
            .put(&prepared.terms, limit, options, results.clone());
        tracing::debug!(
            index = %self.config.name,
            query,
            hits = results.hits.len(),
            total = results.total_count,
            "search executed"
        );
        Ok(results)
    }

    // ── Statistics ──────────────────────────────────────────────────────

    pub async fn get_statistics(&self) -> Result<IndexStatistics> {
        self.repo.statistics().await
    }

    /// The term goes through the same analyzer as queries; a term the
    /// pipeline drops or the vocabulary lacks yields None.
    pub async fn get_term_statistics(&self, term: &str) -> Result<Option<TermStatistics>> {
        self.ensure_open()?;
        let prepared = PreparedQuery::prepare(&self.analyzer, term);
        let Some(normalized) = prepared.terms.first() else {
            return Ok(None);
        };
        Ok(self.repo.get_term(normalized).await?.map(|record| {
            TermStatistics {
                document_frequency: record.document_frequency,
                total_frequency: record.total_frequency,
            }
        }))
    }

    /// The most widespread terms in the collection, by descending document
    /// frequency; limit clamped like result limits.
    pub async fn get_top_terms(&self, limit: usize) -> Result<Vec<crate::core::types::TermRecord>> {
        self.repo.get_top_terms(clamp_result_limit(limit)).await
    }

    pub async fn get_metadata(&self) -> Result<Option<IndexMetadata>> {
        self.repo.get_metadata().await
    }

    // ── Labels ──────────────────────────────────────────────────────────

    pub async fn add_label(
        &self,
        document_id: &str,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.label_scope_checked(Some(document_id), label)?;
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        self.repo.add_label(Some(document_id), label).await?;
        self.touch_after_write().await
    }

    pub async fn remove_label(
        &self,
        document_id: &str,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.label_scope_checked(Some(document_id), label)?;
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        let removed = self.repo.remove_label(Some(document_id), label).await?;
        if removed {
            self.touch_after_write().await?;
        }
        Ok(removed)
    }

    pub async fn get_labels(&self, document_id: &str) -> Result<Vec<String>> {
        if document_id.trim().is_empty() {
            return Err(Error::invalid_argument("document id must not be empty"));
        }
        self.repo.get_labels(Some(document_id)).await
    }

    pub async fn replace_labels(
        &self,
        document_id: &str,
        labels: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if document_id.trim().is_empty() {
            return Err(Error::invalid_argument("document id must not be empty"));
        }
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        self.repo.replace_labels(Some(document_id), labels).await?;
        self.touch_after_write().await
    }

    pub async fn add_labels_batch(
        &self,
        document_id: &str,
        labels: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if document_id.trim().is_empty() {
            return Err(Error::invalid_argument("document id must not be empty"));
        }
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        self.repo.add_labels_batch(Some(document_id), labels).await?;
        self.touch_after_write().await
    }

    pub async fn add_index_label(&self, label: &str, cancel: &CancellationToken) -> Result<()> {
        if label.trim().is_empty() {
            return Err(Error::invalid_argument("label must not be empty"));
        }
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        self.repo.add_label(None, label).await?;
        self.touch_after_write().await
    }

    pub async fn remove_index_label(
        &self,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        let removed = self.repo.remove_label(None, label).await?;
        if removed {
            self.touch_after_write().await?;
        }
        Ok(removed)
    }

    pub async fn get_index_labels(&self) -> Result<Vec<String>> {
        self.repo.get_labels(None).await
    }

    // ── Tags ────────────────────────────────────────────────────────────

    pub async fn set_tag(
        &self,
        document_id: &str,
        key: &str,
        value: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.tag_scope_checked(Some(document_id), key)?;
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        self.repo.set_tag(Some(document_id), key, value).await?;
        self.touch_after_write().await
    }

    pub async fn remove_tag(
        &self,
        document_id: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.tag_scope_checked(Some(document_id), key)?;
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        let removed = self.repo.remove_tag(Some(document_id), key).await?;
        if removed {
            self.touch_after_write().await?;
        }
        Ok(removed)
    }

    pub async fn get_tags(&self, document_id: &str) -> Result<Vec<TagRecord>> {
        if document_id.trim().is_empty() {
            return Err(Error::invalid_argument("document id must not be empty"));
        }
        self.repo.get_tags(Some(document_id)).await
    }

    pub async fn replace_tags(
        &self,
        document_id: &str,
        tags: &[(String, Option<String>)],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if document_id.trim().is_empty() {
            return Err(Error::invalid_argument("document id must not be empty"));
        }
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        self.repo.replace_tags(Some(document_id), tags).await?;
        self.touch_after_write().await
    }

    pub async fn add_tags_batch(
        &self,
        document_id: &str,
        tags: &[(String, Option<String>)],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if document_id.trim().is_empty() {
            return Err(Error::invalid_argument("document id must not be empty"));
        }
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        self.repo.add_tags_batch(Some(document_id), tags).await?;
        self.touch_after_write().await
    }

    pub async fn set_index_tag(
        &self,
        key: &str,
        value: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::invalid_argument("tag key must not be empty"));
        }
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        self.repo.set_tag(None, key, value).await?;
        self.touch_after_write().await
    }

    pub async fn remove_index_tag(&self, key: &str, cancel: &CancellationToken) -> Result<bool> {
        self.ensure_open()?;
        ensure_not_cancelled(cancel)?;
        let _write = self.write_lock.lock().await;
        let removed = self.repo.remove_tag(None, key).await?;
        if removed {
            self.touch_after_write().await?;
        }
        Ok(removed)
    }

    pub async fn get_index_tags(&self) -> Result<Vec<TagRecord>> {
        self.repo.get_tags(None).await
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn label_scope_checked(&self, document_id: Option<&str>, label: &str) -> Result<()> {
        if let Some(id) = document_id {
            if id.trim().is_empty() {
                return Err(Error::invalid_argument("document id must not be empty"));
            }
        }
        if label.trim().is_empty() {
            return Err(Error::invalid_argument("label must not be empty"));
        }
        Ok(())
    }

    fn tag_scope_checked(&self, document_id: Option<&str>, key: &str) -> Result<()> {
        if let Some(id) = document_id {
            if id.trim().is_empty() {
                return Err(Error::invalid_argument("document id must not be empty"));
            }
        }
        if key.trim().is_empty() {
            return Err(Error::invalid_argument("tag key must not be empty"));
        }
        Ok(())
    }

    async fn touch_after_write(&self) -> Result<()> {
        self.repo.touch_metadata(Utc::now()).await?;
        self.query_cache.invalidate_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::filters::lemmatizer::BasicLemmatizer;
    use crate::analysis::filters::stopword::BasicStopWordRemover;
    use crate::core::error::ErrorKind;
    use tempfile::TempDir;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    async fn memory_index() -> Index {
        let index = Index::new(IndexConfig::new("test")).unwrap();
        index.open().await.unwrap();
        index
    }

    async fn seed_fruit(index: &Index) -> (String, String, String) {
        let token = cancel();
        let d1 = index
            .add_document("doc1", "apple banana cherry", &token)
            .await
            .unwrap();
        let d2 = index
            .add_document("doc2", "banana cherry date", &token)
            .await
            .unwrap();
        let d3 = index
            .add_document("doc3", "cherry date elderberry", &token)
            .await
            .unwrap();
        (d1, d2, d3)
    }

    #[tokio::test]
    async fn test_or_search_over_corpus() {
        let index = memory_index().await;
        let (d1, _, _) = seed_fruit(&index).await;

        let results = index
            .search("cherry", &SearchOptions::default(), &cancel())
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 3);
        assert_eq!(results.total_count, 3);

        let results = index
            .search("apple", &SearchOptions::default(), &cancel())
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].document_id, d1);
    }

    #[tokio::test]
    async fn test_and_search_over_corpus() {
        let index = memory_index().await;
        let (d1, _, _) = seed_fruit(&index).await;

        let results = index
            .search("apple banana", &SearchOptions::and_logic(), &cancel())
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].document_id, d1);

        let results = index
            .search(
                "apple elderberry banana",
                &SearchOptions::and_logic(),
                &cancel(),
            )
            .await
            .unwrap();
        assert!(results.hits.is_empty());
        assert_eq!(results.total_count, 0);
    }

    #[tokio::test]
    async fn test_and_results_subset_of_or_results() {
        let index = memory_index().await;
        seed_fruit(&index).await;

        let or_hits: std::collections::HashSet<String> = index
            .search("banana cherry", &SearchOptions::default(), &cancel())
            .await
            .unwrap()
            .hits
            .into_iter()
            .map(|h| h.document_id)
            .collect();
        let and_hits: std::collections::HashSet<String> = index
            .search("banana cherry", &SearchOptions::and_logic(), &cancel())
            .await
            .unwrap()
            .hits
            .into_iter()
            .map(|h| h.document_id)
            .collect();
        assert!(and_hits.is_subset(&or_hits));
        assert!(!and_hits.is_empty());
    }

    #[tokio::test]
    async fn test_lemmatizer_integration() {
        let mut config = IndexConfig::new("lemma");
        config.lemmatizer = Some(Arc::new(BasicLemmatizer::new()));
        let index = Index::new(config).unwrap();
        index.open().await.unwrap();

        index
            .add_document("doc", "cats running walked children were going", &cancel())
            .await
            .unwrap();

        for query in ["cat", "run", "walk", "child", "be", "go"] {
            let results = index
                .search(query, &SearchOptions::default(), &cancel())
                .await
                .unwrap();
            assert_eq!(results.hits.len(), 1, "query '{query}' should hit");
        }
    }

    #[tokio::test]
    async fn test_stop_word_integration() {
        let mut config = IndexConfig::new("stop");
        config.stop_word_remover = Some(Arc::new(BasicStopWordRemover::english()));
        let index = Index::new(config).unwrap();
        index.open().await.unwrap();

        index
            .add_document("doc", "the cat and the dog are running in the garden", &cancel())
            .await
            .unwrap();

        for query in ["cat", "dog", "garden"] {
            let results = index
                .search(query, &SearchOptions::default(), &cancel())
                .await
                .unwrap();
            assert_eq!(results.hits.len(), 1, "query '{query}' should hit");
        }
        for query in ["the", "and"] {
            let results = index
                .search(query, &SearchOptions::default(), &cancel())
                .await
                .unwrap();
            assert_eq!(results.total_count, 0, "query '{query}' should miss");
        }
    }

    #[tokio::test]
    async fn test_label_filtered_search() {
        let index = memory_index().await;
        let token = cancel();
        let tech = index
            .add_document("tech-doc", "machine learning in production", &token)
            .await
            .unwrap();
        let science = index
            .add_document("science-doc", "machine learning for physics", &token)
            .await
            .unwrap();
        index.add_label(&tech, "tech", &token).await.unwrap();
        index.add_label(&science, "science", &token).await.unwrap();

        let options = SearchOptions::with_labels(["tech"]);
        let results = index.search("machine", &options, &token).await.unwrap();
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].document_id, tech);
    }

    #[tokio::test]
    async fn test_tag_filtered_search() {
        let index = memory_index().await;
        let token = cancel();
        let d1 = index
            .add_document("one", "shared words here", &token)
            .await
            .unwrap();
        index
            .add_document("two", "shared words there", &token)
            .await
            .unwrap();
        index
            .set_tag(&d1, "year", Some("2024"), &token)
            .await
            .unwrap();

        let options = SearchOptions {
            tags: vec![("year".to_string(), Some("2024".to_string()))],
            ..Default::default()
        };
        let results = index.search("shared", &options, &token).await.unwrap();
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].document_id, d1);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let token = cancel();
        let content = "persistent content survives restarts";
        let sha;

        {
            let config = IndexConfig::on_disk("persist", dir.path());
            let index = Index::new(config).unwrap();
            index.open().await.unwrap();
            index.add_document("doc", content, &token).await.unwrap();
            sha = index
                .get_document_by_name("doc")
                .await
                .unwrap()
                .unwrap()
                .content_sha256;
            index.flush(None).await.unwrap();
            index.close().await.unwrap();
        }

        let config = IndexConfig::on_disk("persist", dir.path());
        let index = Index::new(config).unwrap();
        index.open().await.unwrap();

        let stats = index.get_statistics().await.unwrap();
        assert_eq!(stats.doc_count, 1);

        let results = index
            .search("persistent", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 1);

        let reloaded = index.get_document_by_name("doc").await.unwrap().unwrap();
        assert_eq!(reloaded.content_sha256, sha);
        assert_eq!(
            reloaded.content_sha256.as_deref(),
            Some(crate::index::ingest::content_sha256(content).as_str())
        );
    }

    #[tokio::test]
    async fn test_in_memory_snapshot_to_disk() {
        let dir = TempDir::new().unwrap();
        let token = cancel();

        let index = memory_index().await;
        seed_fruit(&index).await;
        index.flush(Some(dir.path())).await.unwrap();
        index.close().await.unwrap();

        let config = IndexConfig::on_disk("test", dir.path());
        let restored = Index::new(config).unwrap();
        restored.open().await.unwrap();

        let stats = restored.get_statistics().await.unwrap();
        assert_eq!(stats.doc_count, 3);
        let results = restored
            .search("cherry", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_explicit_id() {
        let index = memory_index().await;
        let token = cancel();
        index
            .add_document_with_id("fixed", "one", "alpha beta", &token)
            .await
            .unwrap();
        let err = index
            .add_document_with_id("fixed", "other", "gamma", &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Duplicate);
    }

    #[tokio::test]
    async fn test_update_document_is_idempotent() {
        let index = memory_index().await;
        let token = cancel();
        index
            .update_document("d1", "doc", "apple banana", &token)
            .await
            .unwrap();
        let first = index.get_statistics().await.unwrap();

        index
            .update_document("d1", "doc", "apple banana", &token)
            .await
            .unwrap();
        let second = index.get_statistics().await.unwrap();
        assert_eq!(first.doc_count, second.doc_count);
        assert_eq!(first.term_count, second.term_count);
        assert_eq!(first.posting_count, second.posting_count);

        // Re-index with different content replaces the old postings.
        index
            .update_document("d1", "doc", "cherry", &token)
            .await
            .unwrap();
        let results = index
            .search("apple", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(results.total_count, 0);
        let results = index
            .search("cherry", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_document_round_trip() {
        let index = memory_index().await;
        let token = cancel();
        let id = index
            .add_document("doc", "alpha beta gamma", &token)
            .await
            .unwrap();
        index.add_label(&id, "keep", &token).await.unwrap();
        index.set_tag(&id, "k", Some("v"), &token).await.unwrap();
        index.add_index_label("global", &token).await.unwrap();

        assert!(index.remove_document(&id, &token).await.unwrap());
        assert!(!index.remove_document(&id, &token).await.unwrap());

        let stats = index.get_statistics().await.unwrap();
        assert_eq!(stats.doc_count, 0);
        assert_eq!(stats.term_count, 0);
        assert_eq!(stats.posting_count, 0);

        // Index-level labels are untouched by document removal.
        assert_eq!(index.get_index_labels().await.unwrap(), vec!["global"]);

        let results = index
            .search("alpha", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(results.total_count, 0);
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty_results() {
        let index = memory_index().await;
        seed_fruit(&index).await;

        for query in ["", "   ", "...,,,"] {
            let results = index
                .search(query, &SearchOptions::default(), &cancel())
                .await
                .unwrap();
            assert_eq!(results.total_count, 0);
            assert!(results.hits.is_empty());
        }
    }

    #[tokio::test]
    async fn test_max_results_truncation() {
        let index = memory_index().await;
        seed_fruit(&index).await;

        let options = SearchOptions {
            max_results: Some(2),
            ..Default::default()
        };
        let results = index.search("cherry", &options, &cancel()).await.unwrap();
        assert_eq!(results.hits.len(), 2);
        assert_eq!(results.total_count, 3);

        // Zero clamps up to one.
        let options = SearchOptions {
            max_results: Some(0),
            ..Default::default()
        };
        let results = index.search("cherry", &options, &cancel()).await.unwrap();
        assert_eq!(results.hits.len(), 1);
    }

    #[tokio::test]
    async fn test_phrase_bonus_prefers_adjacent_terms() {
        let index = memory_index().await;
        let token = cancel();
        let adjacent = index
            .add_document("adjacent", "machine learning rules", &token)
            .await
            .unwrap();
        let scattered = index
            .add_document("scattered", "machine shop teaches learning", &token)
            .await
            .unwrap();

        let results = index
            .search("machine learning", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 2);
        assert_eq!(results.hits[0].document_id, adjacent);
        assert_eq!(results.hits[1].document_id, scattered);
        assert!(results.hits[0].score > results.hits[1].score);
    }

    #[tokio::test]
    async fn test_scores_normalized_and_ordering_deterministic() {
        let index = memory_index().await;
        seed_fruit(&index).await;

        let results = index
            .search("cherry date", &SearchOptions::default(), &cancel())
            .await
            .unwrap();
        for hit in &results.hits {
            assert!(hit.score > 0.0 && hit.score < 1.0);
        }
        // Two-term matches come first; the single-term match last.
        assert_eq!(results.hits[0].matched_term_count, 2);
        assert_eq!(results.hits[2].matched_term_count, 1);

        // Same query twice gives identical ordering.
        let again = index
            .search("cherry date", &SearchOptions::default(), &cancel())
            .await
            .unwrap();
        let ids: Vec<&str> = results.hits.iter().map(|h| h.document_id.as_str()).collect();
        let ids_again: Vec<&str> = again.hits.iter().map(|h| h.document_id.as_str()).collect();
        assert_eq!(ids, ids_again);
    }

    #[tokio::test]
    async fn test_matched_terms_reported() {
        let index = memory_index().await;
        seed_fruit(&index).await;

        let results = index
            .search("apple cherry", &SearchOptions::default(), &cancel())
            .await
            .unwrap();
        let top = &results.hits[0];
        assert_eq!(top.matched_terms, vec!["apple", "cherry"]);
    }

    #[tokio::test]
    async fn test_include_documents_option() {
        let index = memory_index().await;
        seed_fruit(&index).await;

        let options = SearchOptions {
            include_documents: true,
            ..Default::default()
        };
        let results = index.search("apple", &options, &cancel()).await.unwrap();
        let document = results.hits[0].document.as_ref().unwrap();
        assert_eq!(document.name, "doc1");
    }

    #[tokio::test]
    async fn test_get_document_with_metadata() {
        let index = memory_index().await;
        let token = cancel();
        let id = index
            .add_document("doc", "apple apple banana", &token)
            .await
            .unwrap();
        index.add_label(&id, "fruit", &token).await.unwrap();
        index.set_tag(&id, "lang", Some("en"), &token).await.unwrap();

        let full = index
            .get_document_with_metadata(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(full.document.term_count, 2);
        assert_eq!(full.labels, vec!["fruit"]);
        assert_eq!(full.tags.len(), 1);
        assert_eq!(full.terms.len(), 2);
        let apple = full.terms.iter().find(|t| t.term == "apple").unwrap();
        assert_eq!(apple.term_frequency, 2);

        assert!(index.get_document_with_metadata("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_statistics_and_term_statistics() {
        let index = memory_index().await;
        let token = cancel();
        index
            .add_document("one", "apple apple banana", &token)
            .await
            .unwrap();
        index.add_document("two", "apple", &token).await.unwrap();

        let stats = index.get_statistics().await.unwrap();
        assert_eq!(stats.doc_count, 2);
        assert_eq!(stats.term_count, 2);
        assert_eq!(stats.posting_count, 3);
        assert_eq!(stats.total_doc_size, 18 + 5);
        assert!((stats.avg_doc_length - 11.5).abs() < 1e-9);

        let apple = index.get_term_statistics("Apple").await.unwrap().unwrap();
        assert_eq!(apple.document_frequency, 2);
        assert_eq!(apple.total_frequency, 3);
        assert!(index.get_term_statistics("missing").await.unwrap().is_none());
        assert!(index.get_term_statistics("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let index = Index::new(IndexConfig::new("lifecycle")).unwrap();
        let token = cancel();

        let err = index
            .add_document("doc", "text", &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotOpen);

        index.open().await.unwrap();
        index.open().await.unwrap(); // idempotent
        index.add_document("doc", "text", &token).await.unwrap();

        index.close().await.unwrap();
        let err = index
            .search("text", &SearchOptions::default(), &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Disposed);
        let err = index.open().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Disposed);
    }

    #[tokio::test]
    async fn test_cancellation_before_work() {
        let index = memory_index().await;
        let token = cancel();
        token.cancel();

        let err = index
            .add_document("doc", "text", &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(index.get_statistics().await.unwrap().doc_count, 0);

        let err = index
            .search("text", &SearchOptions::default(), &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_list_documents_pagination() {
        let index = memory_index().await;
        let token = cancel();
        for i in 0..5 {
            index
                .add_document(&format!("doc{i}"), "shared content", &token)
                .await
                .unwrap();
        }

        let page = index.list_documents(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        let rest = index.list_documents(10, 4).await.unwrap();
        assert_eq!(rest.len(), 1);

        // Ids are k-sortable, so listing order matches insertion order.
        let all = index.list_documents(10, 0).await.unwrap();
        let names: Vec<&str> = all.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["doc0", "doc1", "doc2", "doc3", "doc4"]);
    }

    #[tokio::test]
    async fn test_query_cache_invalidated_by_writes() {
        let index = memory_index().await;
        let token = cancel();
        index
            .add_document("one", "apple banana", &token)
            .await
            .unwrap();

        let before = index
            .search("apple", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(before.hits.len(), 1);

        index.add_document("two", "apple", &token).await.unwrap();
        let after = index
            .search("apple", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(after.hits.len(), 2);
    }

    #[tokio::test]
    async fn test_invariants_hold_after_mixed_operations() {
        let index = memory_index().await;
        let token = cancel();
        let a = index
            .add_document("a", "red green blue red", &token)
            .await
            .unwrap();
        index
            .add_document("b", "green blue yellow", &token)
            .await
            .unwrap();
        index
            .add_document("c", "blue yellow red", &token)
            .await
            .unwrap();
        index.remove_document(&a, &token).await.unwrap();

        // df("red") = 1 (only doc c), total 1.
        let red = index.get_term_statistics("red").await.unwrap().unwrap();
        assert_eq!(red.document_frequency, 1);
        assert_eq!(red.total_frequency, 1);

        // df("blue") = 2 after removal.
        let blue = index.get_term_statistics("blue").await.unwrap().unwrap();
        assert_eq!(blue.document_frequency, 2);
        assert_eq!(blue.total_frequency, 2);

        // term_count per document equals its distinct postings.
        let b = index.get_document_by_name("b").await.unwrap().unwrap();
        let full = index
            .get_document_with_metadata(&b.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.term_count as usize, full.terms.len());
    }

    #[tokio::test]
    async fn test_on_disk_end_to_end_search() {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig::on_disk("disk-e2e", dir.path());
        let index = Index::new(config).unwrap();
        index.open().await.unwrap();
        let token = cancel();

        let d1 = index
            .add_document("doc1", "apple banana cherry", &token)
            .await
            .unwrap();
        index
            .add_document("doc2", "banana cherry date", &token)
            .await
            .unwrap();
        index.add_label(&d1, "fruit", &token).await.unwrap();

        let results = index
            .search("banana", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 2);

        let results = index
            .search(
                "banana",
                &SearchOptions::with_labels(["FRUIT"]),
                &token,
            )
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].document_id, d1);

        let results = index
            .search("apple banana", &SearchOptions::and_logic(), &token)
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 1);
        index.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_find_documents_by_content() {
        let index = memory_index().await;
        let token = cancel();
        let a = index
            .add_document("a", "identical payload", &token)
            .await
            .unwrap();
        let b = index
            .add_document("b", "identical payload", &token)
            .await
            .unwrap();
        index
            .add_document("c", "different payload", &token)
            .await
            .unwrap();

        let duplicates = index
            .find_documents_by_content("identical payload")
            .await
            .unwrap();
        let ids: Vec<&str> = duplicates.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str(), b.as_str()]);
        assert!(
            index
                .find_documents_by_content("absent payload")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_get_top_terms() {
        let index = memory_index().await;
        seed_fruit(&index).await;

        let top = index.get_top_terms(2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].term, "cherry");
        assert_eq!(top[0].document_frequency, 3);
        // banana and date tie at two documents; ties break alphabetically.
        assert_eq!(top[1].term, "banana");
    }

    #[tokio::test]
    async fn test_concurrent_writers_serialize() {
        let index = Arc::new(memory_index().await);
        let token = cancel();

        let mut handles = Vec::new();
        for i in 0..8 {
            let index = Arc::clone(&index);
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                index
                    .add_document(&format!("doc{i}"), "shared body text", &token)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = index.get_statistics().await.unwrap();
        assert_eq!(stats.doc_count, 8);
        let shared = index.get_term_statistics("shared").await.unwrap().unwrap();
        assert_eq!(shared.document_frequency, 8);

        let results = index
            .search("shared", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(results.total_count, 8);
    }

    #[tokio::test]
    async fn test_concurrent_reads_during_writes() {
        let index = Arc::new(memory_index().await);
        let token = cancel();
        seed_fruit(&index).await;

        let writer = {
            let index = Arc::clone(&index);
            let token = token.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    index
                        .add_document(&format!("extra{i}"), "cherry filler", &token)
                        .await
                        .unwrap();
                }
            })
        };
        let reader = {
            let index = Arc::clone(&index);
            let token = token.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    let results = index
                        .search("cherry", &SearchOptions::default(), &token)
                        .await
                        .unwrap();
                    // Never a torn state: at least the seeded three.
                    assert!(results.total_count >= 3);
                }
            })
        };
        writer.await.unwrap();
        reader.await.unwrap();

        let final_results = index
            .search("cherry", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(final_results.total_count, 23);
    }
}
