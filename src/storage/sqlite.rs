use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tokio::sync::Semaphore;

use crate::core::error::{Error, Result};
use crate::core::ids::IdGenerator;
use crate::core::types::{
    DocumentRecord, FrequencyDelta, IndexMetadata, IndexStatistics, LabelRecord, PostingRecord,
    TagRecord, TermMatch, TermRecord,
};
use crate::storage::backend::{
    DocumentWrite, IndexSnapshot, MatchQuery, StorageBackend,
};
use crate::storage::schema;

/// Persistent backend over a single SQLite database file. One dedicated
/// writer connection serializes mutations; readers draw from a small
/// connection pool gated by a semaphore.
pub struct SqliteBackend {
    path: PathBuf,
    writer: Mutex<Option<Connection>>,
    readers: Mutex<Vec<Connection>>,
    read_permits: Semaphore,
    pool_size: usize,
    ids: Arc<IdGenerator>,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>, pool_size: usize, ids: Arc<IdGenerator>) -> Self {
        SqliteBackend {
            path: path.into(),
            writer: Mutex::new(None),
            readers: Mutex::new(Vec::new()),
            read_permits: Semaphore::new(pool_size.max(1)),
            pool_size: pool_size.max(1),
            ids,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        schema::apply_pragmas(&conn)?;
        Ok(conn)
    }

    /// Run a read-only closure on a pooled connection. The permit bounds
    /// concurrent readers to the configured pool size.
    async fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let _permit = self
            .read_permits
            .acquire()
            .await
            .map_err(|_| Error::storage("reader pool is closed"))?;
        let pooled = self.readers.lock().pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => self.open_connection()?,
        };
        let result = f(&conn);
        self.readers.lock().push(conn);
        result
    }

    /// Run a closure on the dedicated writer connection.
    fn with_writer<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self.writer.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::storage("writer connection is closed"))?;
        f(conn)
    }

    fn delete_document_tx(tx: &rusqlite::Transaction<'_>, id: &str) -> Result<bool> {
        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(false);
        }

        let affected: Vec<(String, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT term_id, term_frequency FROM postings WHERE document_id = ?1",
            )?;
            let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        for (term_id, term_frequency) in &affected {
            tx.execute(
                "UPDATE terms
                 SET document_frequency = MAX(document_frequency - 1, 0),
                     total_frequency = MAX(total_frequency - ?2, 0)
                 WHERE id = ?1",
                params![term_id, term_frequency],
            )?;
        }

        // Cascades take postings, labels and tags along.
        tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;

        for (term_id, _) in &affected {
            tx.execute(
                "DELETE FROM terms
                 WHERE id = ?1 AND document_frequency <= 0 AND total_frequency <= 0",
                params![term_id],
            )?;
        }

        Ok(true)
    }

    fn resolve_term_tx(
        tx: &rusqlite::Transaction<'_>,
        ids: &IdGenerator,
        term: &str,
    ) -> Result<String> {
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM terms WHERE term = ?1",
                params![term],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = ids.next_id();
        tx.execute(
            "INSERT INTO terms (id, term, document_frequency, total_frequency)
             VALUES (?1, ?2, 0, 0)",
            params![id, term],
        )?;
        Ok(id)
    }

    fn insert_posting_tx(tx: &rusqlite::Transaction<'_>, posting: &PostingRecord) -> Result<()> {
        tx.execute(
            "INSERT OR REPLACE INTO postings
             (document_id, term_id, term_frequency, character_positions, term_positions)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                posting.document_id,
                posting.term_id,
                posting.term_frequency as i64,
                encode_positions(&posting.character_positions)?,
                encode_positions(&posting.term_positions)?,
            ],
        )?;
        Ok(())
    }

    fn check_document_exists(conn: &Connection, id: &str) -> Result<()> {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(Error::not_found(format!("document '{id}' not found")));
        }
        Ok(())
    }
}

fn encode_positions(positions: &[u64]) -> Result<Vec<u8>> {
    Ok(bincode::serialize(positions)?)
}

fn decode_positions(blob: &[u8]) -> Result<Vec<u64>> {
    Ok(bincode::deserialize(blob)?)
}

fn timestamp_to_sql(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn timestamp_from_sql(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::new(crate::core::error::ErrorKind::Parse, e.to_string()))
}

fn document_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(DocumentRecord, [String; 3])> {
    Ok((
        DocumentRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            content_sha256: row.get(2)?,
            document_length: row.get::<_, i64>(3)? as u64,
            term_count: row.get::<_, i64>(4)? as u64,
            indexed_utc: Utc::now(),
            last_modified_utc: Utc::now(),
            created_utc: Utc::now(),
        },
        [row.get(5)?, row.get(6)?, row.get(7)?],
    ))
}

fn finish_document((mut doc, stamps): (DocumentRecord, [String; 3])) -> Result<DocumentRecord> {
    doc.indexed_utc = timestamp_from_sql(&stamps[0])?;
    doc.last_modified_utc = timestamp_from_sql(&stamps[1])?;
    doc.created_utc = timestamp_from_sql(&stamps[2])?;
    Ok(doc)
}

const DOCUMENT_COLUMNS: &str =
    "id, name, content_sha256, document_length, term_count, indexed_utc, last_modified_utc, created_utc";

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut guard = self.writer.lock();
        if guard.is_none() {
            let mut conn = Connection::open(&self.path)?;
            schema::apply_pragmas(&conn)?;
            schema::apply_migrations(&mut conn)?;
            *guard = Some(conn);
        }
        drop(guard);

        let mut readers = self.readers.lock();
        while readers.len() < self.pool_size {
            readers.push(self.open_connection()?);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let flushed = self.with_writer(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        });
        *self.writer.lock() = None;
        self.readers.lock().clear();
        flushed
    }

    async fn flush(&self) -> Result<()> {
        self.with_writer(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
    }

    async fn get_metadata(&self) -> Result<Option<IndexMetadata>> {
        self.with_reader(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, created_utc, last_modified_utc FROM index_metadata LIMIT 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;
            match row {
                Some((id, name, created, modified)) => Ok(Some(IndexMetadata {
                    id,
                    name,
                    created_utc: timestamp_from_sql(&created)?,
                    last_modified_utc: timestamp_from_sql(&modified)?,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put_metadata(&self, metadata: &IndexMetadata) -> Result<()> {
        self.with_writer(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM index_metadata", [])?;
            tx.execute(
                "INSERT INTO index_metadata (id, name, created_utc, last_modified_utc)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    metadata.id,
                    metadata.name,
                    timestamp_to_sql(metadata.created_utc),
                    timestamp_to_sql(metadata.last_modified_utc),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    async fn touch_metadata(&self, at: DateTime<Utc>) -> Result<()> {
        self.with_writer(|conn| {
            conn.execute(
                "UPDATE index_metadata SET last_modified_utc = ?1",
                params![timestamp_to_sql(at)],
            )?;
            Ok(())
        })
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let id = id.to_string();
        self.with_reader(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                    params![id],
                    document_from_row,
                )
                .optional()?;
            row.map(finish_document).transpose()
        })
        .await
    }

    async fn get_document_by_name(&self, name: &str) -> Result<Option<DocumentRecord>> {
        let name = name.to_string();
        self.with_reader(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE name = ?1"),
                    params![name],
                    document_from_row,
                )
                .optional()?;
            row.map(finish_document).transpose()
        })
        .await
    }

    async fn list_documents(&self, limit: usize, offset: usize) -> Result<Vec<DocumentRecord>> {
        self.with_reader(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY id LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], document_from_row)?;
            rows.map(|row| finish_document(row?))
                .collect::<Result<Vec<_>>>()
        })
        .await
    }

    async fn document_exists(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_reader(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM documents WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn document_exists_by_name(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.with_reader(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM documents WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn get_documents_by_sha256(&self, sha256: &str) -> Result<Vec<DocumentRecord>> {
        let sha256 = sha256.to_string();
        self.with_reader(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE content_sha256 = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![sha256], document_from_row)?;
            rows.map(|row| finish_document(row?))
                .collect::<Result<Vec<_>>>()
        })
        .await
    }

    async fn ingest_document(&self, write: DocumentWrite) -> Result<()> {
        let ids = Arc::clone(&self.ids);
        self.with_writer(move |conn| {
            let tx = conn.transaction()?;

            if write.replace_existing {
                Self::delete_document_tx(&tx, &write.document.id)?;
            } else {
                let taken: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM documents WHERE id = ?1",
                        params![write.document.id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if taken.is_some() {
                    return Err(Error::duplicate(format!(
                        "document id '{}' already exists",
                        write.document.id
                    )));
                }
            }

            let name_owner: Option<String> = tx
                .query_row(
                    "SELECT id FROM documents WHERE name = ?1",
                    params![write.document.name],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(owner) = name_owner {
                if owner != write.document.id {
                    return Err(Error::duplicate(format!(
                        "document name '{}' already exists",
                        write.document.name
                    )));
                }
            }

            let doc = &write.document;
            tx.execute(
                &format!(
                    "INSERT INTO documents ({DOCUMENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    doc.id,
                    doc.name,
                    doc.content_sha256,
                    doc.document_length as i64,
                    doc.term_count as i64,
                    timestamp_to_sql(doc.indexed_utc),
                    timestamp_to_sql(doc.last_modified_utc),
                    timestamp_to_sql(doc.created_utc),
                ],
            )?;

            for ingest in &write.terms {
                let term_id = Self::resolve_term_tx(&tx, &ids, &ingest.term)?;
                Self::insert_posting_tx(
                    &tx,
                    &PostingRecord {
                        document_id: doc.id.clone(),
                        term_id: term_id.clone(),
                        term_frequency: ingest.term_frequency,
                        character_positions: ingest.character_positions.clone(),
                        term_positions: ingest.term_positions.clone(),
                    },
                )?;
                tx.execute(
                    "UPDATE terms
                     SET document_frequency = document_frequency + 1,
                         total_frequency = total_frequency + ?2
                     WHERE id = ?1",
                    params![term_id, ingest.term_frequency as i64],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    async fn remove_document(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_writer(move |conn| {
            let tx = conn.transaction()?;
            let removed = Self::delete_document_tx(&tx, &id)?;
            tx.commit()?;
            Ok(removed)
        })
    }

    async fn get_term(&self, term: &str) -> Result<Option<TermRecord>> {
        let term = term.to_string();
        self.with_reader(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, term, document_frequency, total_frequency
                     FROM terms WHERE term = ?1",
                    params![term],
                    |row| {
                        Ok(TermRecord {
                            id: row.get(0)?,
                            term: row.get(1)?,
                            document_frequency: row.get::<_, i64>(2)? as u64,
                            total_frequency: row.get::<_, i64>(3)? as u64,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    async fn get_terms_by_ids(&self, ids: &[String]) -> Result<Vec<TermRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = ids.to_vec();
        self.with_reader(move |conn| {
            let sql = format!(
                "SELECT id, term, document_frequency, total_frequency
                 FROM terms WHERE id IN ({})",
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
                Ok(TermRecord {
                    id: row.get(0)?,
                    term: row.get(1)?,
                    document_frequency: row.get::<_, i64>(2)? as u64,
                    total_frequency: row.get::<_, i64>(3)? as u64,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn get_top_terms(&self, limit: usize) -> Result<Vec<TermRecord>> {
        self.with_reader(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, term, document_frequency, total_frequency
                 FROM terms ORDER BY document_frequency DESC, term ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok(TermRecord {
                    id: row.get(0)?,
                    term: row.get(1)?,
                    document_frequency: row.get::<_, i64>(2)? as u64,
                    total_frequency: row.get::<_, i64>(3)? as u64,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn add_or_get_terms_batch(&self, terms: &[String]) -> Result<HashMap<String, String>> {
        let terms = terms.to_vec();
        let ids = Arc::clone(&self.ids);
        self.with_writer(move |conn| {
            let tx = conn.transaction()?;
            let mut resolved = HashMap::with_capacity(terms.len());
            for term in &terms {
                let term_id = Self::resolve_term_tx(&tx, &ids, term)?;
                resolved.insert(term.clone(), term_id);
            }
            tx.commit()?;
            Ok(resolved)
        })
    }

    async fn increment_term_frequencies_batch(
        &self,
        deltas: &HashMap<String, FrequencyDelta>,
    ) -> Result<()> {
        let deltas = deltas.clone();
        self.with_writer(move |conn| {
            let tx = conn.transaction()?;
            for (term_id, delta) in &deltas {
                tx.execute(
                    "UPDATE terms
                     SET document_frequency = document_frequency + ?2,
                         total_frequency = total_frequency + ?3
                     WHERE id = ?1",
                    params![
                        term_id,
                        delta.document_frequency as i64,
                        delta.total_frequency as i64
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn decrement_term_frequencies_batch(
        &self,
        deltas: &HashMap<String, FrequencyDelta>,
    ) -> Result<()> {
        let deltas = deltas.clone();
        self.with_writer(move |conn| {
            let tx = conn.transaction()?;
            for (term_id, delta) in &deltas {
                tx.execute(
                    "UPDATE terms
                     SET document_frequency = MAX(document_frequency - ?2, 0),
                         total_frequency = MAX(total_frequency - ?3, 0)
                     WHERE id = ?1",
                    params![
                        term_id,
                        delta.document_frequency as i64,
                        delta.total_frequency as i64
                    ],
                )?;
                tx.execute(
                    "DELETE FROM terms
                     WHERE id = ?1 AND document_frequency <= 0 AND total_frequency <= 0",
                    params![term_id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn insert_postings_batch(&self, postings: &[PostingRecord]) -> Result<()> {
        let postings = postings.to_vec();
        self.with_writer(move |conn| {
            let tx = conn.transaction()?;
            for posting in &postings {
                Self::insert_posting_tx(&tx, posting)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn get_postings_for_document(&self, document_id: &str) -> Result<Vec<PostingRecord>> {
        let document_id = document_id.to_string();
        self.with_reader(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT document_id, term_id, term_frequency, character_positions, term_positions
                 FROM postings WHERE document_id = ?1 ORDER BY term_id",
            )?;
            let rows = stmt.query_map(params![document_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })?;
            rows.map(|row| {
                let (document_id, term_id, tf, chars, words) = row?;
                Ok(PostingRecord {
                    document_id,
                    term_id,
                    term_frequency: tf as u64,
                    character_positions: decode_positions(&chars)?,
                    term_positions: decode_positions(&words)?,
                })
            })
            .collect::<Result<Vec<_>>>()
        })
        .await
    }

    async fn add_label(&self, document_id: Option<&str>, label: &str) -> Result<()> {
        let labels = vec![label.to_string()];
        self.add_labels_batch(document_id, &labels).await
    }

    async fn add_labels_batch(&self, document_id: Option<&str>, labels: &[String]) -> Result<()> {
        let document_id = document_id.map(str::to_string);
        let labels = labels.to_vec();
        let ids = Arc::clone(&self.ids);
        self.with_writer(move |conn| {
            if let Some(id) = &document_id {
                Self::check_document_exists(conn, id)?;
            }
            let tx = conn.transaction()?;
            for label in &labels {
                tx.execute(
                    "INSERT OR IGNORE INTO labels (id, document_id, label) VALUES (?1, ?2, ?3)",
                    params![ids.next_id(), document_id, label],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn remove_label(&self, document_id: Option<&str>, label: &str) -> Result<bool> {
        let document_id = document_id.map(str::to_string);
        let label = label.to_string();
        self.with_writer(move |conn| {
            let changed = conn.execute(
                "DELETE FROM labels WHERE document_id IS ?1 AND label = ?2",
                params![document_id, label],
            )?;
            Ok(changed > 0)
        })
    }

    async fn get_labels(&self, document_id: Option<&str>) -> Result<Vec<String>> {
        let document_id = document_id.map(str::to_string);
        self.with_reader(move |conn| {
            let mut stmt = conn
                .prepare("SELECT label FROM labels WHERE document_id IS ?1 ORDER BY label")?;
            let rows = stmt.query_map(params![document_id], |row| row.get(0))?;
            Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
        })
        .await
    }

    async fn replace_labels(&self, document_id: Option<&str>, labels: &[String]) -> Result<()> {
        let scope = document_id.map(str::to_string);
        let labels = labels.to_vec();
        let ids = Arc::clone(&self.ids);
        self.with_writer(move |conn| {
            if let Some(id) = &scope {
                Self::check_document_exists(conn, id)?;
            }
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM labels WHERE document_id IS ?1",
                params![scope],
            )?;
            for label in &labels {
                tx.execute(
                    "INSERT OR IGNORE INTO labels (id, document_id, label) VALUES (?1, ?2, ?3)",
                    params![ids.next_id(), scope, label],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
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
        let scope = document_id.map(str::to_string);
        let tags = tags.to_vec();
        let ids = Arc::clone(&self.ids);
        self.with_writer(move |conn| {
            if let Some(id) = &scope {
                Self::check_document_exists(conn, id)?;
            }
            let tx = conn.transaction()?;
            for (key, value) in &tags {
                let changed = tx.execute(
                    "UPDATE tags SET value = ?3 WHERE document_id IS ?1 AND key = ?2",
                    params![scope, key, value],
                )?;
                if changed == 0 {
                    tx.execute(
                        "INSERT INTO tags (id, document_id, key, value) VALUES (?1, ?2, ?3, ?4)",
                        params![ids.next_id(), scope, key, value],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn remove_tag(&self, document_id: Option<&str>, key: &str) -> Result<bool> {
        let scope = document_id.map(str::to_string);
        let key = key.to_string();
        self.with_writer(move |conn| {
            let changed = conn.execute(
                "DELETE FROM tags WHERE document_id IS ?1 AND key = ?2",
                params![scope, key],
            )?;
            Ok(changed > 0)
        })
    }

    async fn get_tags(&self, document_id: Option<&str>) -> Result<Vec<TagRecord>> {
        let scope = document_id.map(str::to_string);
        self.with_reader(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, document_id, key, value FROM tags
                 WHERE document_id IS ?1 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![scope], |row| {
                Ok(TagRecord {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    key: row.get(2)?,
                    value: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn replace_tags(
        &self,
        document_id: Option<&str>,
        tags: &[(String, Option<String>)],
    ) -> Result<()> {
        let scope = document_id.map(str::to_string);
        let tags = tags.to_vec();
        let ids = Arc::clone(&self.ids);
        self.with_writer(move |conn| {
            if let Some(id) = &scope {
                Self::check_document_exists(conn, id)?;
            }
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM tags WHERE document_id IS ?1", params![scope])?;
            for (key, value) in &tags {
                tx.execute(
                    "INSERT INTO tags (id, document_id, key, value) VALUES (?1, ?2, ?3, ?4)",
                    params![ids.next_id(), scope, key, value],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn find_matches(&self, query: &MatchQuery) -> Result<Vec<TermMatch>> {
        if query.term_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = query.clone();
        self.with_reader(move |conn| {
            let term_slots = placeholders(query.term_ids.len());
            let mut sql = format!(
                "SELECT p.document_id, p.term_id, p.term_frequency, p.term_positions
                 FROM postings p
                 WHERE p.term_id IN ({term_slots})
                   AND p.document_id IN (
                       SELECT c.document_id FROM postings c
                       WHERE c.term_id IN ({term_slots})
                       GROUP BY c.document_id"
            );
            if query.require_all {
                sql.push_str(" HAVING COUNT(DISTINCT c.term_id) = ?");
            }
            sql.push_str(")");

            let mut bound: Vec<Value> = Vec::new();
            for term_id in &query.term_ids {
                bound.push(Value::Text(term_id.clone()));
            }
            for term_id in &query.term_ids {
                bound.push(Value::Text(term_id.clone()));
            }
            if query.require_all {
                bound.push(Value::Integer(query.term_ids.len() as i64));
            }

            for label in &query.labels {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM labels l
                       WHERE l.document_id = p.document_id AND l.label = ?)",
                );
                bound.push(Value::Text(label.clone()));
            }
            for (key, value) in &query.tags {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM tags t
                       WHERE t.document_id = p.document_id AND t.key = ? AND t.value IS ?)",
                );
                bound.push(Value::Text(key.clone()));
                bound.push(match value {
                    Some(v) => Value::Text(v.clone()),
                    None => Value::Null,
                });
            }

            sql.push_str(" ORDER BY p.document_id, p.term_id");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bound.into_iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?;
            rows.map(|row| {
                let (document_id, term_id, tf, positions) = row?;
                Ok(TermMatch {
                    document_id,
                    term_id,
                    term_frequency: tf as u64,
                    term_positions: decode_positions(&positions)?,
                })
            })
            .collect::<Result<Vec<_>>>()
        })
        .await
    }

    async fn statistics(&self) -> Result<IndexStatistics> {
        self.with_reader(|conn| {
            let (doc_count, term_count, posting_count, total_doc_size): (i64, i64, i64, i64) =
                conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM documents),
                            (SELECT COUNT(*) FROM terms),
                            (SELECT COUNT(*) FROM postings),
                            (SELECT COALESCE(SUM(document_length), 0) FROM documents)",
                    [],
                    |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    },
                )?;
            let avg_doc_length = if doc_count > 0 {
                total_doc_size as f64 / doc_count as f64
            } else {
                0.0
            };
            Ok(IndexStatistics {
                doc_count: doc_count as u64,
                term_count: term_count as u64,
                posting_count: posting_count as u64,
                total_doc_size: total_doc_size as u64,
                avg_doc_length,
            })
        })
        .await
    }

    async fn export_snapshot(&self) -> Result<IndexSnapshot> {
        let metadata = self.get_metadata().await?;
        self.with_reader(move |conn| {
            let documents = {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY id"
                ))?;
                let rows = stmt.query_map([], document_from_row)?;
                rows.map(|row| finish_document(row?))
                    .collect::<Result<Vec<_>>>()?
            };
            let terms = {
                let mut stmt = conn.prepare(
                    "SELECT id, term, document_frequency, total_frequency FROM terms ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(TermRecord {
                        id: row.get(0)?,
                        term: row.get(1)?,
                        document_frequency: row.get::<_, i64>(2)? as u64,
                        total_frequency: row.get::<_, i64>(3)? as u64,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            let postings = {
                let mut stmt = conn.prepare(
                    "SELECT document_id, term_id, term_frequency, character_positions, term_positions
                     FROM postings ORDER BY document_id, term_id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                    ))
                })?;
                rows.map(|row| {
                    let (document_id, term_id, tf, chars, words) = row?;
                    Ok(PostingRecord {
                        document_id,
                        term_id,
                        term_frequency: tf as u64,
                        character_positions: decode_positions(&chars)?,
                        term_positions: decode_positions(&words)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?
            };
            let labels = {
                let mut stmt =
                    conn.prepare("SELECT id, document_id, label FROM labels ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok(LabelRecord {
                        id: row.get(0)?,
                        document_id: row.get(1)?,
                        label: row.get(2)?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            let tags = {
                let mut stmt =
                    conn.prepare("SELECT id, document_id, key, value FROM tags ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok(TagRecord {
                        id: row.get(0)?,
                        document_id: row.get(1)?,
                        key: row.get(2)?,
                        value: row.get(3)?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            Ok(IndexSnapshot {
                metadata,
                documents,
                terms,
                postings,
                labels,
                tags,
            })
        })
        .await
    }

    async fn import_snapshot(&self, snapshot: IndexSnapshot) -> Result<()> {
        self.with_writer(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM postings", [])?;
            tx.execute("DELETE FROM labels", [])?;
            tx.execute("DELETE FROM tags", [])?;
            tx.execute("DELETE FROM terms", [])?;
            tx.execute("DELETE FROM documents", [])?;
            tx.execute("DELETE FROM index_metadata", [])?;

            if let Some(metadata) = &snapshot.metadata {
                tx.execute(
                    "INSERT INTO index_metadata (id, name, created_utc, last_modified_utc)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        metadata.id,
                        metadata.name,
                        timestamp_to_sql(metadata.created_utc),
                        timestamp_to_sql(metadata.last_modified_utc),
                    ],
                )?;
            }
            for doc in &snapshot.documents {
                tx.execute(
                    &format!(
                        "INSERT INTO documents ({DOCUMENT_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ),
                    params![
                        doc.id,
                        doc.name,
                        doc.content_sha256,
                        doc.document_length as i64,
                        doc.term_count as i64,
                        timestamp_to_sql(doc.indexed_utc),
                        timestamp_to_sql(doc.last_modified_utc),
                        timestamp_to_sql(doc.created_utc),
                    ],
                )?;
            }
            for term in &snapshot.terms {
                tx.execute(
                    "INSERT INTO terms (id, term, document_frequency, total_frequency)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        term.id,
                        term.term,
                        term.document_frequency as i64,
                        term.total_frequency as i64
                    ],
                )?;
            }
            for posting in &snapshot.postings {
                Self::insert_posting_tx(&tx, posting)?;
            }
            for label in &snapshot.labels {
                tx.execute(
                    "INSERT OR IGNORE INTO labels (id, document_id, label) VALUES (?1, ?2, ?3)",
                    params![label.id, label.document_id, label.label],
                )?;
            }
            for tag in &snapshot.tags {
                tx.execute(
                    "INSERT INTO tags (id, document_id, key, value) VALUES (?1, ?2, ?3, ?4)",
                    params![tag.id, tag.document_id, tag.key, tag.value],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }
}
