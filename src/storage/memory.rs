use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::core::error::{Error, Result};
use crate::core::ids::IdGenerator;
use crate::core::types::{
    DocumentRecord, FrequencyDelta, IndexMetadata, IndexStatistics, LabelRecord, PostingRecord,
    TagRecord, TermMatch, TermRecord,
};
use crate::storage::backend::{
    DocumentWrite, IndexSnapshot, MatchQuery, StorageBackend,
};

/// Scope key for labels and tags: None addresses the index itself.
type Scope = Option<String>;

#[derive(Default)]
struct Inner {
    metadata: Option<IndexMetadata>,
    documents: HashMap<String, DocumentRecord>,
    names: HashMap<String, String>,
    terms: HashMap<String, TermRecord>,
    term_ids: HashMap<String, String>,
    postings: HashMap<(String, String), PostingRecord>,
    by_term: HashMap<String, BTreeSet<String>>,
    by_doc: HashMap<String, HashSet<String>>,
    labels: HashMap<Scope, Vec<LabelRecord>>,
    tags: HashMap<Scope, HashMap<String, TagRecord>>,
}

/// Volatile backend. A single reader-writer lock gives every operation
/// transactional semantics; there is no durability and `flush` is a no-op.
pub struct MemoryBackend {
    inner: RwLock<Inner>,
    ids: Arc<IdGenerator>,
}

impl MemoryBackend {
    pub fn new(ids: Arc<IdGenerator>) -> Self {
        MemoryBackend {
            inner: RwLock::new(Inner::default()),
            ids,
        }
    }
}

impl Inner {
    fn remove_document_locked(&mut self, id: &str) -> bool {
        let Some(document) = self.documents.remove(id) else {
            return false;
        };
        self.names.remove(&document.name);

        if let Some(term_ids) = self.by_doc.remove(id) {
            for term_id in term_ids {
                let removed = self.postings.remove(&(id.to_string(), term_id.clone()));
                if let Some(docs) = self.by_term.get_mut(&term_id) {
                    docs.remove(id);
                    if docs.is_empty() {
                        self.by_term.remove(&term_id);
                    }
                }
                if let Some(term) = self.terms.get_mut(&term_id) {
                    let tf = removed.map(|p| p.term_frequency).unwrap_or(0);
                    term.document_frequency = term.document_frequency.saturating_sub(1);
                    term.total_frequency = term.total_frequency.saturating_sub(tf);
                    if term.document_frequency == 0 && term.total_frequency == 0 {
                        let text = term.term.clone();
                        self.terms.remove(&term_id);
                        self.term_ids.remove(&text);
                    }
                }
            }
        }

        self.labels.remove(&Some(id.to_string()));
        self.tags.remove(&Some(id.to_string()));
        true
    }

    fn insert_posting_locked(&mut self, posting: PostingRecord) {
        let key = (posting.document_id.clone(), posting.term_id.clone());
        self.by_term
            .entry(posting.term_id.clone())
            .or_default()
            .insert(posting.document_id.clone());
        self.by_doc
            .entry(posting.document_id.clone())
            .or_default()
            .insert(posting.term_id.clone());
        self.postings.insert(key, posting);
    }

    fn doc_labels_lowered(&self, document_id: &str) -> HashSet<String> {
        self.labels
            .get(&Some(document_id.to_string()))
            .map(|labels| labels.iter().map(|l| l.label.to_lowercase()).collect())
            .unwrap_or_default()
    }

    fn doc_matches_filters(&self, document_id: &str, query: &MatchQuery) -> bool {
        if !query.labels.is_empty() {
            let have = self.doc_labels_lowered(document_id);
            for wanted in &query.labels {
                if !have.contains(&wanted.to_lowercase()) {
                    return false;
                }
            }
        }
        if !query.tags.is_empty() {
            let tags = self.tags.get(&Some(document_id.to_string()));
            for (key, value) in &query.tags {
                match tags.and_then(|t| t.get(key)) {
                    Some(tag) if tag.value.as_deref() == value.as_deref() => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn get_metadata(&self) -> Result<Option<IndexMetadata>> {
        Ok(self.inner.read().metadata.clone())
    }

    async fn put_metadata(&self, metadata: &IndexMetadata) -> Result<()> {
        self.inner.write().metadata = Some(metadata.clone());
        Ok(())
    }

    async fn touch_metadata(&self, at: DateTime<Utc>) -> Result<()> {
        if let Some(metadata) = self.inner.write().metadata.as_mut() {
            metadata.last_modified_utc = at;
        }
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.inner.read().documents.get(id).cloned())
    }

    async fn get_document_by_name(&self, name: &str) -> Result<Option<DocumentRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .names
            .get(name)
            .and_then(|id| inner.documents.get(id))
            .cloned())
    }

    async fn list_documents(&self, limit: usize, offset: usize) -> Result<Vec<DocumentRecord>> {
        let inner = self.inner.read();
        let mut documents: Vec<DocumentRecord> = inner.documents.values().cloned().collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents.into_iter().skip(offset).take(limit).collect())
    }

    async fn document_exists(&self, id: &str) -> Result<bool> {
        Ok(self.inner.read().documents.contains_key(id))
    }

    async fn document_exists_by_name(&self, name: &str) -> Result<bool> {
        Ok(self.inner.read().names.contains_key(name))
    }

    async fn get_documents_by_sha256(&self, sha256: &str) -> Result<Vec<DocumentRecord>> {
        let inner = self.inner.read();
        let mut documents: Vec<DocumentRecord> = inner
            .documents
            .values()
            .filter(|d| d.content_sha256.as_deref() == Some(sha256))
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(documents)
    }

    async fn ingest_document(&self, write: DocumentWrite) -> Result<()> {
        let mut inner = self.inner.write();

        if write.replace_existing {
            inner.remove_document_locked(&write.document.id);
        } else if inner.documents.contains_key(&write.document.id) {
            return Err(Error::duplicate(format!(
                "document id '{}' already exists",
                write.document.id
            )));
        }
        if let Some(existing) = inner.names.get(&write.document.name) {
            if existing != &write.document.id {
                return Err(Error::duplicate(format!(
                    "document name '{}' already exists",
                    write.document.name
                )));
            }
        }

        inner
            .names
            .insert(write.document.name.clone(), write.document.id.clone());
        inner
            .documents
            .insert(write.document.id.clone(), write.document.clone());

        for ingest in write.terms {
            let term_id = match inner.term_ids.get(&ingest.term) {
                Some(id) => id.clone(),
                None => {
                    let id = self.ids.next_id();
                    inner.term_ids.insert(ingest.term.clone(), id.clone());
                    inner.terms.insert(
                        id.clone(),
                        TermRecord {
                            id: id.clone(),
                            term: ingest.term.clone(),
                            document_frequency: 0,
                            total_frequency: 0,
                        },
                    );
                    id
                }
            };

            if let Some(term) = inner.terms.get_mut(&term_id) {
                term.document_frequency += 1;
                term.total_frequency += ingest.term_frequency;
            }

            inner.insert_posting_locked(PostingRecord {
                document_id: write.document.id.clone(),
                term_id,
                term_frequency: ingest.term_frequency,
                character_positions: ingest.character_positions,
                term_positions: ingest.term_positions,
            });
        }

        Ok(())
    }

    async fn remove_document(&self, id: &str) -> Result<bool> {
        Ok(self.inner.write().remove_document_locked(id))
    }

    async fn get_term(&self, term: &str) -> Result<Option<TermRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .term_ids
            .get(term)
            .and_then(|id| inner.terms.get(id))
            .cloned())
    }

    async fn get_terms_by_ids(&self, ids: &[String]) -> Result<Vec<TermRecord>> {
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.terms.get(id))
            .cloned()
            .collect())
    }

    async fn get_top_terms(&self, limit: usize) -> Result<Vec<TermRecord>> {
        let inner = self.inner.read();
        let mut terms: Vec<TermRecord> = inner.terms.values().cloned().collect();
        terms.sort_by(|a, b| {
            b.document_frequency
                .cmp(&a.document_frequency)
                .then_with(|| a.term.cmp(&b.term))
        });
        terms.truncate(limit);
        Ok(terms)
    }

    async fn add_or_get_terms_batch(&self, terms: &[String]) -> Result<HashMap<String, String>> {
        let mut inner = self.inner.write();
        let mut resolved = HashMap::with_capacity(terms.len());
        for term in terms {
            let term_id = match inner.term_ids.get(term) {
                Some(id) => id.clone(),
                None => {
                    let id = self.ids.next_id();
                    inner.term_ids.insert(term.clone(), id.clone());
                    inner.terms.insert(
                        id.clone(),
                        TermRecord {
                            id: id.clone(),
                            term: term.clone(),
                            document_frequency: 0,
                            total_frequency: 0,
                        },
                    );
                    id
                }
            };
            resolved.insert(term.clone(), term_id);
        }
        Ok(resolved)
    }

    async fn increment_term_frequencies_batch(
        &self,
        deltas: &HashMap<String, FrequencyDelta>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        for (term_id, delta) in deltas {
            if let Some(term) = inner.terms.get_mut(term_id) {
                term.document_frequency += delta.document_frequency;
                term.total_frequency += delta.total_frequency;
            }
        }
        Ok(())
    }

    async fn decrement_term_frequencies_batch(
        &self,
        deltas: &HashMap<String, FrequencyDelta>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        for (term_id, delta) in deltas {
            let mut orphaned = None;
            if let Some(term) = inner.terms.get_mut(term_id) {
                term.document_frequency =
                    term.document_frequency.saturating_sub(delta.document_frequency);
                term.total_frequency = term.total_frequency.saturating_sub(delta.total_frequency);
                if term.document_frequency == 0 && term.total_frequency == 0 {
                    orphaned = Some(term.term.clone());
                }
            }
            if let Some(text) = orphaned {
                inner.terms.remove(term_id);
                inner.term_ids.remove(&text);
            }
        }
        Ok(())
    }

    async fn insert_postings_batch(&self, postings: &[PostingRecord]) -> Result<()> {
        let mut inner = self.inner.write();
        for posting in postings {
            inner.insert_posting_locked(posting.clone());
        }
        Ok(())
    }

    async fn get_postings_for_document(&self, document_id: &str) -> Result<Vec<PostingRecord>> {
        let inner = self.inner.read();
        let mut postings: Vec<PostingRecord> = inner
            .postings
            .values()
            .filter(|p| p.document_id == document_id)
            .cloned()
            .collect();
        postings.sort_by(|a, b| a.term_id.cmp(&b.term_id));
        Ok(postings)
    }

    async fn add_label(&self, document_id: Option<&str>, label: &str) -> Result<()> {
        let labels = vec![label.to_string()];
        self.add_labels_batch(document_id, &labels).await
    }

    async fn add_labels_batch(&self, document_id: Option<&str>, labels: &[String]) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(id) = document_id {
            if !inner.documents.contains_key(id) {
                return Err(Error::not_found(format!("document '{id}' not found")));
            }
        }
        let scope: Scope = document_id.map(str::to_string);
        for label in labels {
            let entries = inner.labels.entry(scope.clone()).or_default();
            let exists = entries
                .iter()
                .any(|l| l.label.to_lowercase() == label.to_lowercase());
            if !exists {
                entries.push(LabelRecord {
                    id: self.ids.next_id(),
                    document_id: scope.clone(),
                    label: label.clone(),
                });
            }
        }
        Ok(())
    }

    async fn remove_label(&self, document_id: Option<&str>, label: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        let scope: Scope = document_id.map(str::to_string);
        let Some(entries) = inner.labels.get_mut(&scope) else {
            return Ok(false);
        };
        let before = entries.len();
        let lowered = label.to_lowercase();
        entries.retain(|l| l.label.to_lowercase() != lowered);
        Ok(entries.len() < before)
    }

    async fn get_labels(&self, document_id: Option<&str>) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let scope: Scope = document_id.map(str::to_string);
        let mut labels: Vec<String> = inner
            .labels
            .get(&scope)
            .map(|entries| entries.iter().map(|l| l.label.clone()).collect())
            .unwrap_or_default();
        labels.sort();
        Ok(labels)
    }

    async fn replace_labels(&self, document_id: Option<&str>, labels: &[String]) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(id) = document_id {
            if !inner.documents.contains_key(id) {
                return Err(Error::not_found(format!("document '{id}' not found")));
            }
        }
        let scope: Scope = document_id.map(str::to_string);
        inner.labels.remove(&scope);
        for label in labels {
            let entries = inner.labels.entry(scope.clone()).or_default();
            let exists = entries
                .iter()
                .any(|l| l.label.to_lowercase() == label.to_lowercase());
            if !exists {
                entries.push(LabelRecord {
                    id: self.ids.next_id(),
                    document_id: scope.clone(),
                    label: label.clone(),
                });
            }
        }
        Ok(())
    }

    async fn set_tag(
        &self,
        document_id: Option<&str>,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let tags = vec![(key.to_string(), value.map(str::to_string))];
        self.add_tags_batch(document_id, &tags).await
    }

    async fn add_tags_batch(
        &self,
        document_id: Option<&str>,
        tags: &[(String, Option<String>)],
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(id) = document_id {
            if !inner.documents.contains_key(id) {
                return Err(Error::not_found(format!("document '{id}' not found")));
            }
        }
        let scope: Scope = document_id.map(str::to_string);
        for (key, value) in tags {
            let entries = inner.tags.entry(scope.clone()).or_default();
            match entries.get_mut(key) {
                Some(existing) => existing.value = value.clone(),
                None => {
                    entries.insert(
                        key.clone(),
                        TagRecord {
                            id: self.ids.next_id(),
                            document_id: scope.clone(),
                            key: key.clone(),
                            value: value.clone(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn remove_tag(&self, document_id: Option<&str>, key: &str) -> Result<bool> {
        let mut inner = self.inner.write();
        let scope: Scope = document_id.map(str::to_string);
        Ok(inner
            .tags
            .get_mut(&scope)
            .and_then(|entries| entries.remove(key))
            .is_some())
    }

    async fn get_tags(&self, document_id: Option<&str>) -> Result<Vec<TagRecord>> {
        let inner = self.inner.read();
        let scope: Scope = document_id.map(str::to_string);
        let mut tags: Vec<TagRecord> = inner
            .tags
            .get(&scope)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default();
        tags.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(tags)
    }

    async fn replace_tags(
        &self,
        document_id: Option<&str>,
        tags: &[(String, Option<String>)],
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(id) = document_id {
            if !inner.documents.contains_key(id) {
                return Err(Error::not_found(format!("document '{id}' not found")));
            }
        }
        let scope: Scope = document_id.map(str::to_string);
        inner.tags.remove(&scope);
        for (key, value) in tags {
            let entries = inner.tags.entry(scope.clone()).or_default();
            entries.insert(
                key.clone(),
                TagRecord {
                    id: self.ids.next_id(),
                    document_id: scope.clone(),
                    key: key.clone(),
                    value: value.clone(),
                },
            );
        }
        Ok(())
    }

    async fn find_matches(&self, query: &MatchQuery) -> Result<Vec<TermMatch>> {
        let inner = self.inner.read();
        if query.term_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Boolean candidate set from the precomputed term -> docs sets.
        let mut candidates: BTreeSet<String> = BTreeSet::new();
        for (i, term_id) in query.term_ids.iter().enumerate() {
            let docs = inner.by_term.get(term_id).cloned().unwrap_or_default();
            if query.require_all {
                if docs.is_empty() {
                    return Ok(Vec::new());
                }
                if i == 0 {
                    candidates = docs;
                } else {
                    candidates = candidates.intersection(&docs).cloned().collect();
                    if candidates.is_empty() {
                        return Ok(Vec::new());
                    }
                }
            } else {
                candidates.extend(docs);
            }
        }

        let mut matches = Vec::new();
        for document_id in candidates {
            if !inner.doc_matches_filters(&document_id, query) {
                continue;
            }
            for term_id in &query.term_ids {
                if let Some(posting) =
                    inner.postings.get(&(document_id.clone(), term_id.clone()))
                {
                    matches.push(TermMatch {
                        document_id: document_id.clone(),
                        term_id: term_id.clone(),
                        term_frequency: posting.term_frequency,
                        term_positions: posting.term_positions.clone(),
                    });
                }
            }
        }
        Ok(matches)
    }

    async fn statistics(&self) -> Result<IndexStatistics> {
        let inner = self.inner.read();
        let doc_count = inner.documents.len() as u64;
        let total_doc_size: u64 = inner.documents.values().map(|d| d.document_length).sum();
        let avg_doc_length = if doc_count > 0 {
            total_doc_size as f64 / doc_count as f64
        } else {
            0.0
        };
        Ok(IndexStatistics {
            doc_count,
            term_count: inner.terms.len() as u64,
            posting_count: inner.postings.len() as u64,
            total_doc_size,
            avg_doc_length,
        })
    }

    async fn export_snapshot(&self) -> Result<IndexSnapshot> {
        let inner = self.inner.read();
        let mut documents: Vec<DocumentRecord> = inner.documents.values().cloned().collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        let mut terms: Vec<TermRecord> = inner.terms.values().cloned().collect();
        terms.sort_by(|a, b| a.id.cmp(&b.id));
        let mut postings: Vec<PostingRecord> = inner.postings.values().cloned().collect();
        postings.sort_by(|a, b| {
            (a.document_id.as_str(), a.term_id.as_str())
                .cmp(&(b.document_id.as_str(), b.term_id.as_str()))
        });
        let labels: Vec<LabelRecord> = inner.labels.values().flatten().cloned().collect();
        let tags: Vec<TagRecord> = inner
            .tags
            .values()
            .flat_map(|entries| entries.values().cloned())
            .collect();
        Ok(IndexSnapshot {
            metadata: inner.metadata.clone(),
            documents,
            terms,
            postings,
            labels,
            tags,
        })
    }

    async fn import_snapshot(&self, snapshot: IndexSnapshot) -> Result<()> {
        let mut inner = self.inner.write();
        *inner = Inner::default();
        inner.metadata = snapshot.metadata;
        for document in snapshot.documents {
            inner.names.insert(document.name.clone(), document.id.clone());
            inner.documents.insert(document.id.clone(), document);
        }
        for term in snapshot.terms {
            inner.term_ids.insert(term.term.clone(), term.id.clone());
            inner.terms.insert(term.id.clone(), term);
        }
        for posting in snapshot.postings {
            inner.insert_posting_locked(posting);
        }
        for label in snapshot.labels {
            inner
                .labels
                .entry(label.document_id.clone())
                .or_default()
                .push(label);
        }
        for tag in snapshot.tags {
            inner
                .tags
                .entry(tag.document_id.clone())
                .or_default()
                .insert(tag.key.clone(), tag);
        }
        Ok(())
    }
}
