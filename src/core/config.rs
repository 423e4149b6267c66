use std::path::PathBuf;
use std::sync::Arc;

use crate::analysis::filter::StopWordRemover;
use crate::analysis::filters::lemmatizer::Lemmatizer;
use crate::analysis::tokenizer::Tokenizer;
use crate::core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    InMemory,
    OnDisk,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::InMemory => "in_memory",
            StorageMode::OnDisk => "on_disk",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "in_memory" => Ok(StorageMode::InMemory),
            "on_disk" => Ok(StorageMode::OnDisk),
            other => Err(Error::invalid_argument(format!(
                "unknown storage mode '{other}'"
            ))),
        }
    }
}

/// Per-index configuration. Construct with [`IndexConfig::new`], adjust
/// fields, then hand to the index or manager; validation runs on open.
#[derive(Clone)]
pub struct IndexConfig {
    pub name: String,
    pub storage_mode: StorageMode,
    pub storage_directory: PathBuf,
    pub database_filename: String,
    pub default_max_search_results: usize,
    pub phrase_search_bonus: f64,
    pub sigmoid_normalization_divisor: f64,
    /// 0 = no lower bound on token length.
    pub min_token_length: usize,
    /// 0 = no upper bound on token length.
    pub max_token_length: usize,
    /// Reader connection pool capacity for the persistent backend.
    pub max_concurrent_ops: usize,

    pub tokenizer: Option<Arc<dyn Tokenizer>>,
    pub lemmatizer: Option<Arc<dyn Lemmatizer>>,
    pub stop_word_remover: Option<Arc<dyn StopWordRemover>>,
}

impl IndexConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let storage_directory = default_storage_root().join(&name);
        IndexConfig {
            name,
            storage_mode: StorageMode::InMemory,
            storage_directory,
            database_filename: "index.db".to_string(),
            default_max_search_results: 100,
            phrase_search_bonus: 2.0,
            sigmoid_normalization_divisor: 10.0,
            min_token_length: 0,
            max_token_length: 0,
            max_concurrent_ops: 4,
            tokenizer: None,
            lemmatizer: None,
            stop_word_remover: None,
        }
    }

    pub fn on_disk(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        let mut config = IndexConfig::new(name);
        config.storage_mode = StorageMode::OnDisk;
        config.storage_directory = directory.into();
        config
    }

    /// Full path of the database file for the persistent backend.
    pub fn database_path(&self) -> PathBuf {
        self.storage_directory.join(&self.database_filename)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_argument("index name must not be empty"));
        }
        if self.database_filename.trim().is_empty() {
            return Err(Error::invalid_argument(
                "database filename must not be empty",
            ));
        }
        if self.default_max_search_results == 0 {
            return Err(Error::invalid_argument(
                "default_max_search_results must be positive",
            ));
        }
        if self.phrase_search_bonus <= 0.0 {
            return Err(Error::invalid_argument(
                "phrase_search_bonus must be greater than zero",
            ));
        }
        if self.sigmoid_normalization_divisor <= 0.0 {
            return Err(Error::invalid_argument(
                "sigmoid_normalization_divisor must be greater than zero",
            ));
        }
        if self.max_token_length > 0 && self.min_token_length > self.max_token_length {
            return Err(Error::invalid_argument(
                "min_token_length must not exceed max_token_length",
            ));
        }
        if self.max_concurrent_ops == 0 {
            return Err(Error::invalid_argument(
                "max_concurrent_ops must be positive",
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for IndexConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexConfig")
            .field("name", &self.name)
            .field("storage_mode", &self.storage_mode)
            .field("storage_directory", &self.storage_directory)
            .field("database_filename", &self.database_filename)
            .field(
                "default_max_search_results",
                &self.default_max_search_results,
            )
            .field("phrase_search_bonus", &self.phrase_search_bonus)
            .field(
                "sigmoid_normalization_divisor",
                &self.sigmoid_normalization_divisor,
            )
            .field("min_token_length", &self.min_token_length)
            .field("max_token_length", &self.max_token_length)
            .field("max_concurrent_ops", &self.max_concurrent_ops)
            .field("has_tokenizer", &self.tokenizer.is_some())
            .field("has_lemmatizer", &self.lemmatizer.is_some())
            .field("has_stop_word_remover", &self.stop_word_remover.is_some())
            .finish()
    }
}

fn default_storage_root() -> PathBuf {
    std::env::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vbx")
        .join("indices")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::new("notes");
        assert_eq!(config.storage_mode, StorageMode::InMemory);
        assert_eq!(config.database_filename, "index.db");
        assert_eq!(config.default_max_search_results, 100);
        assert_eq!(config.phrase_search_bonus, 2.0);
        assert_eq!(config.sigmoid_normalization_divisor, 10.0);
        assert_eq!(config.min_token_length, 0);
        assert_eq!(config.max_token_length, 0);
        assert_eq!(config.max_concurrent_ops, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = IndexConfig::new("notes");
        config.default_max_search_results = 0;
        assert!(config.validate().is_err());

        let mut config = IndexConfig::new("notes");
        config.phrase_search_bonus = 0.0;
        assert!(config.validate().is_err());

        let mut config = IndexConfig::new("notes");
        config.sigmoid_normalization_divisor = -1.0;
        assert!(config.validate().is_err());

        let mut config = IndexConfig::new("notes");
        config.min_token_length = 10;
        config.max_token_length = 2;
        assert!(config.validate().is_err());

        let config = IndexConfig::new("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_mode_parse() {
        assert_eq!(
            StorageMode::parse("in_memory").unwrap(),
            StorageMode::InMemory
        );
        assert_eq!(StorageMode::parse("on_disk").unwrap(), StorageMode::OnDisk);
        assert!(StorageMode::parse("cloud").is_err());
    }

    #[test]
    fn test_database_path() {
        let config = IndexConfig::on_disk("notes", "/tmp/vbx/notes");
        assert_eq!(
            config.database_path(),
            PathBuf::from("/tmp/vbx/notes/index.db")
        );
    }
}
