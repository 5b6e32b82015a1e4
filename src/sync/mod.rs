pub mod connectivity;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::PromptError;
use crate::prompts::{Prompt, PromptDraft, derive_tags};
use crate::remote::RemoteClient;
use crate::settings::Settings;
use crate::storage::{self, LocalStore};

/// Delay before the single retry that follows a failed reconciliation.
pub const SYNC_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncStatus {
    #[default]
    Synced,
    Syncing,
    Failed,
    Disabled,
}

/// How a create/update/delete ended up being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPath {
    /// Cloud sync off or device offline; only the local store was touched.
    LocalOnly,
    /// The remote accepted the mutation and its result was applied.
    CloudSuccess,
    /// The remote attempt failed and the mutation was applied locally.
    CloudFallback,
}

/// What the status indicator shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncIndicator {
    pub status: SyncStatus,
    pub cloud_sync_enabled: bool,
    pub online: bool,
}

impl SyncIndicator {
    pub fn label(&self) -> &'static str {
        if !self.cloud_sync_enabled {
            "Cloud sync disabled"
        } else if !self.online {
            "Offline - changes saved locally"
        } else {
            match self.status {
                SyncStatus::Syncing => "Syncing to cloud...",
                SyncStatus::Failed => "Sync failed - will retry",
                SyncStatus::Disabled => "Cloud sync disabled",
                SyncStatus::Synced => "All changes synced",
            }
        }
    }
}

/// Owns one surface's copy of the prompt list and decides, per mutation,
/// whether it goes to the remote first or only to the local store.
///
/// There is no locking: two surfaces each hold their own coordinator and
/// persist the entire list, so the last one to write wins.
pub struct SyncCoordinator {
    store: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteClient>>,
    prompts: Vec<Prompt>,
    tags: BTreeSet<String>,
    status: SyncStatus,
    cloud_sync_enabled: bool,
    online: bool,
    retry_at: Option<Instant>,
    retry_delay: Duration,
    indicator_tx: watch::Sender<SyncIndicator>,
}

impl SyncCoordinator {
    /// `remote: None` makes a local-only coordinator regardless of settings.
    pub fn new(store: Arc<dyn LocalStore>, remote: Option<Arc<dyn RemoteClient>>) -> Self {
        let status = SyncStatus::default();
        let (indicator_tx, _) = watch::channel(SyncIndicator {
            status,
            cloud_sync_enabled: false,
            online: true,
        });
        Self {
            store,
            remote,
            prompts: Vec::new(),
            tags: BTreeSet::new(),
            status,
            cloud_sync_enabled: false,
            online: true,
            retry_at: None,
            retry_delay: SYNC_RETRY_DELAY,
            indicator_tx,
        }
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    #[cfg(test)]
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn cloud_sync_enabled(&self) -> bool {
        self.cloud_sync_enabled
    }

    pub fn get(&self, id: &str) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.id == id)
    }

    pub fn indicator(&self) -> SyncIndicator {
        SyncIndicator {
            status: self.status,
            cloud_sync_enabled: self.cloud_sync_enabled,
            online: self.online,
        }
    }

    pub fn subscribe_indicator(&self) -> watch::Receiver<SyncIndicator> {
        self.indicator_tx.subscribe()
    }

    /// When the pending retry should run, if one is scheduled.
    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Read settings and the prompt list from the local store.
    pub async fn load(&mut self) -> Result<(), PromptError> {
        let enabled = match storage::load_settings(self.store.as_ref()).await {
            Ok(settings) => settings.unwrap_or_default().cloud_sync.enabled,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load settings, cloud sync off");
                false
            }
        };
        self.cloud_sync_enabled = self.remote.is_some() && enabled;
        self.prompts = storage::load_prompts(self.store.as_ref()).await?;
        self.refresh_tags();
        tracing::debug!(count = self.prompts.len(), cloud = self.cloud_sync_enabled, "loaded prompts");
        Ok(())
    }

    /// Startup: reconcile when cloud sync is on and we are online, otherwise
    /// mark sync disabled.
    pub async fn start(&mut self) {
        if self.cloud_sync_enabled && self.online {
            self.sync_with_remote().await;
        } else if !self.cloud_sync_enabled {
            self.status = SyncStatus::Disabled;
            self.publish();
        }
    }

    fn cloud_remote(&self) -> Option<Arc<dyn RemoteClient>> {
        if self.online && self.cloud_sync_enabled {
            self.remote.clone()
        } else {
            None
        }
    }

    fn refresh_tags(&mut self) {
        self.tags = derive_tags(&self.prompts);
    }

    fn position(&self, id: &str) -> Result<usize, PromptError> {
        self.prompts
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| PromptError::NotFound(id.to_string()))
    }

    /// Millisecond timestamp id, bumped until it is unused.
    fn next_local_id(&self, now: DateTime<Utc>) -> String {
        let mut millis = now.timestamp_millis();
        loop {
            let id = millis.to_string();
            if self.get(&id).is_none() {
                return id;
            }
            millis += 1;
        }
    }

    pub async fn create_prompt(&mut self, draft: PromptDraft) -> Result<MutationPath, PromptError> {
        let now = Utc::now();
        let (prompt, path) = match self.cloud_remote() {
            Some(remote) => {
                tracing::debug!("cloud attempt: create");
                match remote.create(&draft).await {
                    Ok(prompt) => (prompt, MutationPath::CloudSuccess),
                    Err(e) => {
                        tracing::warn!(error = %format!("{e:#}"), "failed to create prompt in cloud, saving locally");
                        let id = self.next_local_id(now);
                        (Prompt::local(id, draft, now), MutationPath::CloudFallback)
                    }
                }
            }
            None => {
                let id = self.next_local_id(now);
                (Prompt::local(id, draft, now), MutationPath::LocalOnly)
            }
        };

        tracing::info!(id = %prompt.id, ?path, "prompt created");
        self.prompts.insert(0, prompt);
        self.refresh_tags();
        self.save_prompts().await?;
        Ok(path)
    }

    pub async fn update_prompt(&mut self, id: &str, draft: PromptDraft) -> Result<MutationPath, PromptError> {
        let index = self.position(id)?;
        let path = match self.cloud_remote() {
            Some(remote) => {
                tracing::debug!(id, "cloud attempt: update");
                match remote.update(id, &draft).await {
                    Ok(updated) => {
                        self.prompts[index] = updated;
                        MutationPath::CloudSuccess
                    }
                    Err(e) => {
                        tracing::warn!(id, error = %format!("{e:#}"), "failed to update prompt in cloud, saving locally");
                        self.prompts[index].apply_local_edit(draft, Utc::now());
                        MutationPath::CloudFallback
                    }
                }
            }
            None => {
                self.prompts[index].apply_local_edit(draft, Utc::now());
                MutationPath::LocalOnly
            }
        };

        tracing::info!(id, ?path, "prompt updated");
        self.refresh_tags();
        self.save_prompts().await?;
        Ok(path)
    }

    /// Remove exactly the entry with `id`; the rest keep their order.
    pub async fn delete_prompt(&mut self, id: &str) -> Result<MutationPath, PromptError> {
        let index = self.position(id)?;
        let path = match self.cloud_remote() {
            Some(remote) => {
                tracing::debug!(id, "cloud attempt: delete");
                match remote.delete(id).await {
                    Ok(()) => MutationPath::CloudSuccess,
                    Err(e) => {
                        tracing::warn!(id, error = %format!("{e:#}"), "failed to delete prompt from cloud, deleting locally");
                        MutationPath::CloudFallback
                    }
                }
            }
            None => MutationPath::LocalOnly,
        };

        self.prompts.remove(index);
        tracing::info!(id, ?path, "prompt deleted");
        self.refresh_tags();
        self.save_prompts().await?;
        Ok(path)
    }

    /// Store a text selection as a new local prompt. Only the local store is
    /// written; the next reconciliation pushes it.
    pub async fn capture_selection(&mut self, selection: &str) -> Result<Prompt, PromptError> {
        let now = Utc::now();
        let prompt = Prompt::from_selection(self.next_local_id(now), selection, now)?;
        self.prompts.insert(0, prompt.clone());
        self.refresh_tags();
        storage::save_prompts(self.store.as_ref(), &self.prompts).await?;
        tracing::info!(id = %prompt.id, "selection saved as prompt");
        Ok(prompt)
    }

    /// Persist the whole list, then reconcile when online with cloud sync on.
    pub async fn save_prompts(&mut self) -> Result<(), PromptError> {
        storage::save_prompts(self.store.as_ref(), &self.prompts).await?;
        if self.online && self.cloud_sync_enabled {
            self.sync_with_remote().await;
        }
        Ok(())
    }

    /// Push local prompts the remote does not know, then replace the local
    /// list with the remote one. Failures end in `Failed` plus one scheduled
    /// retry; they are never returned to the caller.
    pub async fn sync_with_remote(&mut self) -> SyncStatus {
        if !self.online || !self.cloud_sync_enabled {
            return self.status;
        }
        let Some(remote) = self.remote.clone() else {
            return self.status;
        };

        if let Err(e) = self.reconcile(remote.as_ref()).await {
            tracing::error!(error = %e, "sync failed");
            self.status = SyncStatus::Failed;
            self.schedule_retry();
        }

        self.publish();
        self.status
    }

    async fn reconcile(&mut self, remote: &dyn RemoteClient) -> Result<(), PromptError> {
        if !remote.is_available().await {
            tracing::info!("cloud sync is disabled in settings");
            self.status = SyncStatus::Disabled;
            return Ok(());
        }

        self.status = SyncStatus::Syncing;
        self.publish();

        // Push. Pushed prompts get fresh server ids; the local copies keep
        // their ids until the pull below replaces the list.
        let remote_ids: HashSet<String> = remote
            .list_ids()
            .await
            .map_err(PromptError::remote)?
            .into_iter()
            .collect();
        let mut pushed = 0usize;
        for prompt in &self.prompts {
            if remote_ids.contains(&prompt.id) {
                continue;
            }
            remote
                .create(&PromptDraft::from(prompt))
                .await
                .map_err(PromptError::remote)?;
            pushed += 1;
        }

        // Pull.
        let pulled = remote.list_all().await.map_err(PromptError::remote)?;
        let pulled_count = pulled.len();
        if !pulled.is_empty() {
            storage::save_prompts(self.store.as_ref(), &pulled).await?;
            self.prompts = pulled;
            self.refresh_tags();
        }

        self.status = SyncStatus::Synced;
        tracing::info!(pushed, pulled = pulled_count, "sync complete");
        Ok(())
    }

    fn schedule_retry(&mut self) {
        let deadline = Instant::now() + self.retry_delay;
        self.retry_at = Some(deadline);
        tracing::info!(delay_secs = self.retry_delay.as_secs(), "sync retry scheduled");
    }

    /// Run the pending retry. The driving loop calls this once
    /// `retry_deadline()` has passed.
    pub async fn run_scheduled_retry(&mut self) -> SyncStatus {
        self.retry_at = None;
        tracing::info!("retrying sync");
        self.sync_with_remote().await
    }

    /// React to the device going online or offline.
    pub async fn handle_connection_change(&mut self, online: bool) {
        if self.online == online {
            return;
        }
        self.online = online;
        tracing::info!(online, "connectivity changed");

        if online && self.status != SyncStatus::Synced && self.cloud_sync_enabled {
            self.sync_with_remote().await;
        }
        self.publish();
    }

    /// Apply new settings. `remote` is the client rebuilt from them; when the
    /// enabled flag flips, reconcile or mark sync disabled.
    pub async fn handle_settings_change(
        &mut self,
        settings: &Settings,
        remote: Option<Arc<dyn RemoteClient>>,
    ) {
        self.remote = remote;
        let was_enabled = self.cloud_sync_enabled;
        self.cloud_sync_enabled = self.remote.is_some() && settings.cloud_sync.enabled;

        if was_enabled == self.cloud_sync_enabled {
            return;
        }
        tracing::info!(enabled = self.cloud_sync_enabled, "cloud sync setting changed");

        if self.cloud_sync_enabled && self.online {
            self.sync_with_remote().await;
        } else if !self.cloud_sync_enabled {
            self.status = SyncStatus::Disabled;
            self.publish();
        }
    }

    fn publish(&self) {
        self.indicator_tx.send_replace(self.indicator());
    }
}
