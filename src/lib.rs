pub mod analysis;
pub mod core;
pub mod index;
pub mod search;
pub mod storage;

/*
┌──────────────────────────────────────────────────────────────────────────┐
│                          VERBEX ARCHITECTURE                             │
│                                                                          │
│  text ──► analysis::Analyzer ──► index::ingest::Indexer ──┐              │
│                                                           ▼              │
│  IndexManager ──► Index (facade) ──► storage::Repository ──► backend     │
│                      │                                   (memory|sqlite) │
│  query ──► search::QueryExecutor ◄───────────────────────────┘           │
│              (candidates ► scoring ► ranking ► truncation)               │
└──────────────────────────────────────────────────────────────────────────┘
*/

pub use crate::analysis::analyzer::Analyzer;
pub use crate::analysis::filter::StopWordRemover;
pub use crate::analysis::filters::lemmatizer::{BasicLemmatizer, Lemmatizer, SnowballLemmatizer};
pub use crate::analysis::filters::stopword::BasicStopWordRemover;
pub use crate::analysis::tokenizer::{StandardTokenizer, Tokenizer, WhitespaceTokenizer};
pub use crate::core::cancel::CancellationToken;
pub use crate::core::config::{IndexConfig, StorageMode};
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{
    DocumentRecord, DocumentWithMetadata, IndexMetadata, IndexStatistics, TagRecord, TermRecord,
    TermStatistics,
};
pub use crate::index::facade::Index;
pub use crate::index::manager::IndexManager;
pub use crate::search::query::SearchOptions;
pub use crate::search::results::{ScoredDocument, SearchResults};
