use rusqlite::Connection;

use crate::core::error::Result;

/// Current schema version. Bumped whenever DDL or migrations change.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// A schema migration. Migrations are additive; `up` runs inside one
/// transaction per version.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema: documents, terms, postings, labels, tags, metadata",
    up: MIGRATION_V1_UP,
}];

const MIGRATION_V1_UP: &str = r#"
    CREATE TABLE IF NOT EXISTS index_metadata (
        id                TEXT PRIMARY KEY,
        name              TEXT NOT NULL,
        created_utc       TEXT NOT NULL,
        last_modified_utc TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS documents (
        id                TEXT PRIMARY KEY,
        name              TEXT NOT NULL UNIQUE,
        content_sha256    TEXT,
        document_length   INTEGER NOT NULL DEFAULT 0,
        term_count        INTEGER NOT NULL DEFAULT 0,
        indexed_utc       TEXT NOT NULL,
        last_modified_utc TEXT NOT NULL,
        created_utc       TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_documents_name ON documents(name);
    CREATE INDEX IF NOT EXISTS idx_documents_sha ON documents(content_sha256);
    CREATE INDEX IF NOT EXISTS idx_documents_indexed ON documents(indexed_utc);

    CREATE TABLE IF NOT EXISTS terms (
        id                 TEXT PRIMARY KEY,
        term               TEXT NOT NULL UNIQUE,
        document_frequency INTEGER NOT NULL DEFAULT 0,
        total_frequency    INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_terms_doc_freq ON terms(document_frequency DESC);

    -- Position lists are bincode-encoded ascending u64 arrays.
    CREATE TABLE IF NOT EXISTS postings (
        document_id         TEXT NOT NULL,
        term_id             TEXT NOT NULL,
        term_frequency      INTEGER NOT NULL,
        character_positions BLOB NOT NULL,
        term_positions      BLOB NOT NULL,
        PRIMARY KEY (document_id, term_id),
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
        FOREIGN KEY (term_id) REFERENCES terms(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_postings_term ON postings(term_id);

    -- NULL document_id = index-level. SQLite treats NULLs as distinct in
    -- unique indexes, so uniqueness goes through COALESCE.
    CREATE TABLE IF NOT EXISTS labels (
        id          TEXT PRIMARY KEY,
        document_id TEXT,
        label       TEXT NOT NULL COLLATE NOCASE,
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_labels_scope_label
        ON labels(COALESCE(document_id, ''), label);
    CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label);

    CREATE TABLE IF NOT EXISTS tags (
        id          TEXT PRIMARY KEY,
        document_id TEXT,
        key         TEXT NOT NULL,
        value       TEXT,
        FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_tags_scope_key
        ON tags(COALESCE(document_id, ''), key);
    CREATE INDEX IF NOT EXISTS idx_tags_key_value ON tags(key, value);

    CREATE TABLE IF NOT EXISTS schema_migrations (
        version     INTEGER PRIMARY KEY,
        description TEXT NOT NULL,
        applied_utc TEXT NOT NULL
    );
"#;

/// Connection tuning applied to every connection, readers included.
pub const PRAGMAS: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA cache_size = -65536;
    PRAGMA temp_store = MEMORY;
    PRAGMA mmap_size = 268435456;
    PRAGMA busy_timeout = 5000;
    PRAGMA foreign_keys = ON;
"#;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(PRAGMAS)?;
    Ok(())
}

/// Bring the database up to the current schema version. Idempotent; each
/// pending migration commits atomically along with its version row.
pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_utc TEXT NOT NULL
        );",
    )?;

    let applied: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, description, applied_utc) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.description,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        tracing::debug!(version = migration.version, "applied schema migration");
    }

    Ok(())
}
