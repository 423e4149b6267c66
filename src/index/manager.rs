use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::analysis::filters::lemmatizer::BasicLemmatizer;
use crate::analysis::filters::stopword::BasicStopWordRemover;
use crate::core::config::{IndexConfig, StorageMode};
use crate::core::error::{Error, Result};
use crate::index::facade::Index;

pub const CONFIG_FILENAME: &str = "index-config.json";

/// Sidecar written next to each persistent database so indices can be
/// rediscovered after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfigFile {
    #[serde(default)]
    pub description: String,
    pub storage_mode: String,
    pub min_token_length: usize,
    pub max_token_length: usize,
    pub has_lemmatizer: bool,
    pub has_stop_word_remover: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl IndexConfigFile {
    fn from_config(config: &IndexConfig, created_at: DateTime<Utc>) -> Self {
        IndexConfigFile {
            description: String::new(),
            storage_mode: config.storage_mode.as_str().to_string(),
            min_token_length: config.min_token_length,
            max_token_length: config.max_token_length,
            has_lemmatizer: config.lemmatizer.is_some(),
            has_stop_word_remover: config.stop_word_remover.is_some(),
            created_at,
            last_accessed_at: created_at,
        }
    }
}

struct ManagedIndex {
    config: IndexConfig,
    handle: Option<Arc<Index>>,
}

/// Catalog of named indices. Owns creation, lazy opening, discovery of
/// persistent indices on disk, reload and shutdown.
pub struct IndexManager {
    indices: Mutex<HashMap<String, ManagedIndex>>,
}

impl IndexManager {
    pub fn new() -> Self {
        IndexManager {
            indices: Mutex::new(HashMap::new()),
        }
    }

    /// Create and open a new index. For persistent indices the storage
    /// directory and a config sidecar are written.
    pub async fn create(&self, config: IndexConfig) -> Result<Arc<Index>> {
        config.validate()?;
        let mut indices = self.indices.lock().await;
        if indices.contains_key(&config.name) {
            return Err(Error::duplicate(format!(
                "index '{}' already exists",
                config.name
            )));
        }

        if config.storage_mode == StorageMode::OnDisk {
            std::fs::create_dir_all(&config.storage_directory)?;
            write_config_file(&config, Utc::now())?;
        }

        let index = Arc::new(Index::new(config.clone())?);
        index.open().await?;
        indices.insert(
            config.name.clone(),
            ManagedIndex {
                config,
                handle: Some(Arc::clone(&index)),
            },
        );
        Ok(index)
    }

    /// Fetch an index by name, opening it on first access.
    pub async fn get(&self, name: &str) -> Result<Arc<Index>> {
        let mut indices = self.indices.lock().await;
        let entry = indices
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("index '{name}' not found")))?;

        if let Some(handle) = &entry.handle {
            return Ok(Arc::clone(handle));
        }

        let index = Arc::new(Index::new(entry.config.clone())?);
        index.open().await?;
        if entry.config.storage_mode == StorageMode::OnDisk {
            touch_config_file(&entry.config);
        }
        entry.handle = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Dispose an index and drop it from the catalog; persistent storage
    /// is deleted from disk.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut indices = self.indices.lock().await;
        let entry = indices
            .remove(name)
            .ok_or_else(|| Error::not_found(format!("index '{name}' not found")))?;

        if let Some(handle) = entry.handle {
            handle.close().await?;
        }
        if entry.config.storage_mode == StorageMode::OnDisk
            && entry.config.storage_directory.exists()
        {
            std::fs::remove_dir_all(&entry.config.storage_directory)?;
        }
        Ok(())
    }

    pub async fn list_configurations(&self) -> Vec<IndexConfig> {
        let indices = self.indices.lock().await;
        let mut configs: Vec<IndexConfig> =
            indices.values().map(|entry| entry.config.clone()).collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.indices.lock().await.contains_key(name)
    }

    /// Scan each subdirectory of `root` for a recognized index (config
    /// sidecar or database file) and register it unopened. Returns the
    /// names of newly registered indices.
    pub async fn discover(&self, root: &Path) -> Result<Vec<String>> {
        let mut registered = Vec::new();
        if !root.is_dir() {
            return Ok(registered);
        }

        let mut indices = self.indices.lock().await;
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if indices.contains_key(name) {
                continue;
            }

            let sidecar = path.join(CONFIG_FILENAME);
            let config = if sidecar.is_file() {
                match read_config_file(&sidecar, name, &path) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!(index = name, error = %e, "skipping unreadable index config");
                        continue;
                    }
                }
            } else if path.join("index.db").is_file() {
                IndexConfig::on_disk(name, &path)
            } else {
                continue;
            };

            indices.insert(
                name.to_string(),
                ManagedIndex {
                    config,
                    handle: None,
                },
            );
            registered.push(name.to_string());
        }
        registered.sort();
        Ok(registered)
    }

    /// Dispose and reopen an index in place.
    pub async fn reload(&self, name: &str) -> Result<Arc<Index>> {
        let mut indices = self.indices.lock().await;
        let entry = indices
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("index '{name}' not found")))?;

        if let Some(handle) = entry.handle.take() {
            handle.close().await?;
        }
        let index = Arc::new(Index::new(entry.config.clone())?);
        index.open().await?;
        entry.handle = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Flush every open persistent index, then dispose all handles. The
    /// catalog keeps the configurations for later reopening.
    pub async fn close_all(&self) -> Result<()> {
        let mut indices = self.indices.lock().await;
        for entry in indices.values_mut() {
            if let Some(handle) = entry.handle.take() {
                if entry.config.storage_mode == StorageMode::OnDisk {
                    handle.flush(None).await?;
                }
                handle.close().await?;
            }
        }
        Ok(())
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        IndexManager::new()
    }
}

fn write_config_file(config: &IndexConfig, created_at: DateTime<Utc>) -> Result<()> {
    let sidecar = config.storage_directory.join(CONFIG_FILENAME);
    let file = IndexConfigFile::from_config(config, created_at);
    std::fs::write(&sidecar, serde_json::to_string_pretty(&file)?)?;
    Ok(())
}

fn touch_config_file(config: &IndexConfig) {
    let sidecar = config.storage_directory.join(CONFIG_FILENAME);
    let Ok(raw) = std::fs::read_to_string(&sidecar) else {
        return;
    };
    let Ok(mut file) = serde_json::from_str::<IndexConfigFile>(&raw) else {
        return;
    };
    file.last_accessed_at = Utc::now();
    if let Ok(serialized) = serde_json::to_string_pretty(&file) {
        let _ = std::fs::write(&sidecar, serialized);
    }
}

fn read_config_file(sidecar: &Path, name: &str, directory: &Path) -> Result<IndexConfig> {
    let raw = std::fs::read_to_string(sidecar)?;
    let file: IndexConfigFile = serde_json::from_str(&raw)?;

    let mut config = IndexConfig::on_disk(name, directory);
    config.storage_mode = StorageMode::parse(&file.storage_mode)?;
    config.min_token_length = file.min_token_length;
    config.max_token_length = file.max_token_length;
    if file.has_lemmatizer {
        config.lemmatizer = Some(Arc::new(BasicLemmatizer::new()));
    }
    if file.has_stop_word_remover {
        config.stop_word_remover = Some(Arc::new(BasicStopWordRemover::english()));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancel::CancellationToken;
    use crate::core::error::ErrorKind;
    use crate::search::query::SearchOptions;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_get_delete() {
        let manager = IndexManager::new();
        let index = manager.create(IndexConfig::new("notes")).await.unwrap();
        assert!(index.is_open());

        let again = manager.get("notes").await.unwrap();
        assert!(Arc::ptr_eq(&index, &again));

        let err = manager
            .create(IndexConfig::new("notes"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Duplicate);

        manager.delete("notes").await.unwrap();
        let err = manager.get("notes").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_create_on_disk_writes_sidecar() {
        let dir = TempDir::new().unwrap();
        let manager = IndexManager::new();
        let config = IndexConfig::on_disk("notes", dir.path().join("notes"));
        manager.create(config).await.unwrap();

        let sidecar = dir.path().join("notes").join(CONFIG_FILENAME);
        assert!(sidecar.is_file());
        let parsed: IndexConfigFile =
            serde_json::from_str(&std::fs::read_to_string(sidecar).unwrap()).unwrap();
        assert_eq!(parsed.storage_mode, "on_disk");
        assert!(!parsed.has_lemmatizer);
    }

    #[tokio::test]
    async fn test_discover_and_lazy_open() {
        let dir = TempDir::new().unwrap();
        let token = CancellationToken::new();

        {
            let manager = IndexManager::new();
            let config = IndexConfig::on_disk("found", dir.path().join("found"));
            let index = manager.create(config).await.unwrap();
            index
                .add_document("doc", "discoverable content", &token)
                .await
                .unwrap();
            manager.close_all().await.unwrap();
        }
        // A bare directory without index files is ignored.
        std::fs::create_dir_all(dir.path().join("not-an-index")).unwrap();

        let manager = IndexManager::new();
        let registered = manager.discover(dir.path()).await.unwrap();
        assert_eq!(registered, vec!["found"]);

        let index = manager.get("found").await.unwrap();
        let results = index
            .search("discoverable", &SearchOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(results.hits.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_replaces_handle() {
        let manager = IndexManager::new();
        let first = manager.create(IndexConfig::new("notes")).await.unwrap();
        let second = manager.reload("notes").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!first.is_open());
        assert!(second.is_open());
    }

    #[tokio::test]
    async fn test_close_all_keeps_configurations() {
        let dir = TempDir::new().unwrap();
        let manager = IndexManager::new();
        manager
            .create(IndexConfig::on_disk("a", dir.path().join("a")))
            .await
            .unwrap();
        manager.create(IndexConfig::new("b")).await.unwrap();

        manager.close_all().await.unwrap();
        assert_eq!(manager.list_configurations().await.len(), 2);

        // Persistent index reopens from its files.
        let reopened = manager.get("a").await.unwrap();
        assert!(reopened.is_open());
    }

    #[tokio::test]
    async fn test_discover_restores_pipeline_flags() {
        let dir = TempDir::new().unwrap();
        {
            let manager = IndexManager::new();
            let mut config = IndexConfig::on_disk("lemma", dir.path().join("lemma"));
            config.lemmatizer = Some(Arc::new(BasicLemmatizer::new()));
            config.min_token_length = 2;
            manager.create(config).await.unwrap();
            manager.close_all().await.unwrap();
        }

        let manager = IndexManager::new();
        manager.discover(dir.path()).await.unwrap();
        let configs = manager.list_configurations().await;
        assert_eq!(configs.len(), 1);
        assert!(configs[0].lemmatizer.is_some());
        assert_eq!(configs[0].min_token_length, 2);
    }
}
