pub mod file_store;
pub mod watcher;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::PromptError;
use crate::prompts::Prompt;
use crate::settings::Settings;

pub const PROMPTS_KEY: &str = "prompts";
pub const SETTINGS_KEY: &str = "settings";

/// Where a storage change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Written through this store instance.
    Local,
    /// Observed on disk, written by another surface.
    External,
}

#[derive(Debug, Clone)]
pub struct StorageChange {
    pub key: String,
    /// `None` when the key was removed.
    pub value: Option<Value>,
    pub origin: ChangeOrigin,
}

/// A persistent key-value namespace. No transactions: each `set` replaces
/// the whole value and the last writer wins.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

pub async fn load_prompts(store: &dyn LocalStore) -> Result<Vec<Prompt>, PromptError> {
    match store.get(PROMPTS_KEY).await.map_err(|e| PromptError::storage(format!("{e:#}")))? {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| PromptError::storage(format!("malformed prompts record: {e}"))),
        None => Ok(Vec::new()),
    }
}

pub async fn save_prompts(store: &dyn LocalStore, prompts: &[Prompt]) -> Result<(), PromptError> {
    let value = serde_json::to_value(prompts).map_err(PromptError::storage)?;
    store
        .set(PROMPTS_KEY, value)
        .await
        .map_err(|e| PromptError::storage(format!("{e:#}")))
}

pub async fn load_settings(store: &dyn LocalStore) -> Result<Option<Settings>, PromptError> {
    match store.get(SETTINGS_KEY).await.map_err(|e| PromptError::storage(format!("{e:#}")))? {
        Some(value) => settings_from_value(value).map(Some),
        None => Ok(None),
    }
}

pub async fn save_settings(store: &dyn LocalStore, settings: &Settings) -> Result<(), PromptError> {
    let value = serde_json::to_value(settings).map_err(PromptError::storage)?;
    store
        .set(SETTINGS_KEY, value)
        .await
        .map_err(|e| PromptError::storage(format!("{e:#}")))
}

pub fn settings_from_value(value: Value) -> Result<Settings, PromptError> {
    serde_json::from_value(value)
        .map_err(|e| PromptError::storage(format!("malformed settings record: {e}")))
}
