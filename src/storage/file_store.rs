use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{ChangeOrigin, LocalStore, StorageChange};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Stores each key as `<base_dir>/<key>.json`.
///
/// Each write goes to its own `.<key>.*.json.tmp` file and is renamed into
/// place, so readers in other processes never see a half-written value.
pub struct FileLocalStore {
    base_dir: PathBuf,
    changes_tx: broadcast::Sender<StorageChange>,
    /// Last content this instance wrote per key, used to tell our own
    /// writes apart from other processes' when the watcher fires.
    last_written: Mutex<HashMap<String, String>>,
}

impl FileLocalStore {
    pub fn new(base_dir: PathBuf) -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            base_dir,
            changes_tx,
            last_written: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn key_file(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }

    /// Called by the watcher when `<key>.json` changed on disk. Emits an
    /// `External` change unless the file still holds what we last wrote.
    pub fn reload_key(&self, key: &str) -> Option<StorageChange> {
        let path = self.key_file(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read changed key");
                return None;
            }
        };

        {
            let last = self
                .last_written
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if content.is_some() && last.get(key) == content.as_ref() {
                tracing::trace!(key, "skipping self-write");
                return None;
            }
        }

        let value = match content {
            Some(content) => match serde_json::from_str::<Value>(&content) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable external write");
                    return None;
                }
            },
            None => None,
        };

        let change = StorageChange {
            key: key.to_string(),
            value,
            origin: ChangeOrigin::External,
        };
        // No subscribers is fine.
        let _ = self.changes_tx.send(change.clone());
        Some(change)
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        bail!("invalid storage key: {key:?}");
    }
    Ok(())
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;
        let path = self.key_file(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read storage file: {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse storage file: {}", path.display()))?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        validate_key(key)?;
        std::fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("failed to create data dir: {}", self.base_dir.display())
        })?;

        let path = self.key_file(key);
        let content = serde_json::to_string_pretty(&value)
            .with_context(|| format!("failed to serialize {key}"))?;

        // Unique temp file per write; concurrent writers never share one.
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{key}."))
            .suffix(".json.tmp")
            .tempfile_in(&self.base_dir)
            .with_context(|| format!("failed to create temp file in {}", self.base_dir.display()))?;
        tmp.write_all(content.as_bytes())
            .with_context(|| format!("failed to write temp file: {}", tmp.path().display()))?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .with_context(|| format!("failed to replace storage file: {}", path.display()))?;

        // Only content that reached disk counts as our own write.
        self.last_written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), content.clone());

        tracing::debug!(key, bytes = content.len(), "stored key");
        let _ = self.changes_tx.send(StorageChange {
            key: key.to_string(),
            value: Some(value),
            origin: ChangeOrigin::Local,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes_tx.subscribe()
    }
}
