use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use crate::error::PromptError;
use crate::prompts::{Prompt, PromptDraft, parse_tags};
use crate::remote::RemoteClient;
use crate::remote::supabase::SupabaseClient;
use crate::settings::Settings;
use crate::storage::file_store::FileLocalStore;
use crate::storage::watcher::StoreWatcher;
use crate::storage::{self, ChangeOrigin, LocalStore, SETTINGS_KEY, StorageChange};
use crate::sync::connectivity;
use crate::sync::{MutationPath, SyncCoordinator, SyncStatus};
use crate::view::{self, PromptQuery, ViewVariant};

/// One open surface: its own coordinator, its own copy of the list and
/// its own filter state. Two surfaces never share memory.
pub struct Surface {
    variant: ViewVariant,
    http: Client,
    store: Arc<FileLocalStore>,
    settings: Settings,
    coordinator: SyncCoordinator,
    query: PromptQuery,
}

/// Field changes for `edit`; `None` keeps the current value.
#[derive(Debug, Default)]
pub struct PromptEdit {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<String>,
}

impl Surface {
    /// Load state from the store. The manager gets a remote client and an
    /// initial connectivity probe; the popup only ever works locally.
    pub async fn open(
        variant: ViewVariant,
        store: Arc<FileLocalStore>,
        http: Client,
    ) -> Result<Self, PromptError> {
        let settings = storage::load_settings(store.as_ref())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to load settings, using defaults");
                None
            })
            .unwrap_or_default();

        let (remote, online) = match variant {
            ViewVariant::Manager => {
                let online = connectivity::probe(&http, &settings.cloud_sync.supabase.url).await;
                (Some(remote_for(&http, &settings)), online)
            }
            ViewVariant::Popup => (None, true),
        };

        let mut coordinator = SyncCoordinator::new(store.clone(), remote).with_online(online);
        coordinator.load().await?;

        Ok(Self {
            variant,
            http,
            store,
            settings,
            coordinator,
            query: PromptQuery::default(),
        })
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn set_query(&mut self, query: PromptQuery) {
        self.query = query;
    }

    /// Tag facets followed by the filtered list.
    pub fn render(&self) -> String {
        let facets = view::tag_facets(self.coordinator.tags(), self.query.active_tag.as_deref());
        format!(
            "{}\n\n{}",
            view::render_facets(&facets),
            view::render_prompts(self.coordinator.prompts(), &self.query, self.variant)
        )
    }

    pub fn indicator_label(&self) -> &'static str {
        self.coordinator.indicator().label()
    }

    /// Initial reconciliation, as when the manager page opens.
    pub async fn start(&mut self) {
        self.coordinator.start().await;
    }

    pub async fn add(&mut self, draft: PromptDraft) -> Result<MutationPath, PromptError> {
        self.coordinator.create_prompt(draft).await
    }

    pub async fn edit(&mut self, id: &str, edit: PromptEdit) -> Result<MutationPath, PromptError> {
        let current = self
            .coordinator
            .get(id)
            .ok_or_else(|| PromptError::NotFound(id.to_string()))?;

        let draft = PromptDraft::new(
            edit.title.as_deref().unwrap_or(&current.title),
            edit.content.as_deref().unwrap_or(&current.content),
            edit.tags
                .as_deref()
                .map(parse_tags)
                .unwrap_or_else(|| current.tags.clone()),
        )?;

        self.coordinator.update_prompt(id, draft).await
    }

    pub async fn delete(&mut self, id: &str) -> Result<MutationPath, PromptError> {
        self.coordinator.delete_prompt(id).await
    }

    /// Put a prompt's content on the system clipboard.
    pub fn copy(&self, id: &str) -> anyhow::Result<()> {
        let prompt = self
            .coordinator
            .get(id)
            .ok_or_else(|| PromptError::NotFound(id.to_string()))?;

        let mut clipboard = arboard::Clipboard::new().context("failed to open clipboard")?;
        clipboard
            .set_text(prompt.content.clone())
            .context("failed to copy to clipboard")?;
        tracing::info!(id, "prompt copied to clipboard");
        Ok(())
    }

    pub async fn capture(&mut self, selection: &str) -> Result<Prompt, PromptError> {
        self.coordinator.capture_selection(selection).await
    }

    pub async fn sync(&mut self) -> SyncStatus {
        self.coordinator.sync_with_remote().await
    }

    /// Run the manager session until Ctrl-C: initial reconciliation, then
    /// connectivity polling, the scheduled retry and external settings
    /// changes, printing the indicator whenever it changes.
    pub async fn watch(self, poll_interval: Duration) -> anyhow::Result<()> {
        self.watch_until(poll_interval, tokio::signal::ctrl_c()).await
    }

    /// The watch loop, ending when `shutdown` completes. `shutdown` is polled
    /// across loop passes, so it fires even while a branch is busy syncing.
    async fn watch_until<F: Future>(mut self, poll_interval: Duration, shutdown: F) -> anyhow::Result<()> {
        let _watcher = StoreWatcher::start(self.store.clone())?;
        let mut changes = self.store.subscribe();
        let mut indicator = self.coordinator.subscribe_indicator();
        let mut poll = tokio::time::interval(poll_interval);
        poll.tick().await;
        tokio::pin!(shutdown);

        self.coordinator.start().await;
        println!("{}", self.indicator_label());
        indicator.borrow_and_update();

        loop {
            let retry_at = self.coordinator.retry_deadline();
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("watch stopped");
                    break;
                }
                _ = sleep_until_deadline(retry_at) => {
                    self.coordinator.run_scheduled_retry().await;
                }
                _ = poll.tick() => {
                    let online =
                        connectivity::probe(&self.http, &self.settings.cloud_sync.supabase.url).await;
                    self.coordinator.handle_connection_change(online).await;
                }
                change = changes.recv() => match change {
                    Ok(change) if change.origin == ChangeOrigin::External => {
                        self.apply_external_change(change).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "storage change receiver lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                Ok(()) = indicator.changed() => {
                    let shown = *indicator.borrow_and_update();
                    println!("{}", shown.label());
                }
            }
        }

        Ok(())
    }

    /// Another surface wrote to the store. Settings changes re-create the
    /// remote client; prompt list changes are only logged, the in-memory
    /// copy stays as it is.
    async fn apply_external_change(&mut self, change: StorageChange) {
        if change.key != SETTINGS_KEY {
            tracing::debug!(key = %change.key, "ignoring external change");
            return;
        }
        let Some(value) = change.value else {
            return;
        };

        let settings = match storage::settings_from_value(value) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed settings change");
                return;
            }
        };

        let remote = match self.variant {
            ViewVariant::Manager => Some(remote_for(&self.http, &settings)),
            ViewVariant::Popup => None,
        };
        self.coordinator.handle_settings_change(&settings, remote).await;
        self.settings = settings;
    }
}

/// Build the remote client for `settings`. It reports itself unavailable
/// when sync is off or credentials are missing.
pub fn remote_for(http: &Client, settings: &Settings) -> Arc<dyn RemoteClient> {
    Arc::new(SupabaseClient::new(http.clone(), settings.cloud_sync.clone()))
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn popup(dir: &std::path::Path) -> Surface {
        let store = Arc::new(FileLocalStore::new(dir.to_path_buf()));
        Surface::open(ViewVariant::Popup, store, Client::new()).await.unwrap()
    }

    #[tokio::test]
    async fn popup_is_local_only_even_when_sync_enabled() {
        let dir = tempdir().unwrap();
        let store = FileLocalStore::new(dir.path().to_path_buf());
        let mut settings = Settings::default();
        settings.cloud_sync.enabled = true;
        settings.cloud_sync.supabase.url = "http://127.0.0.1:1".into();
        settings.cloud_sync.supabase.anon_key = "key".into();
        storage::save_settings(&store, &settings).await.unwrap();

        let mut surface = popup(dir.path()).await;
        let draft = PromptDraft::from_form("Title", "Body", "a").unwrap();
        assert_eq!(surface.add(draft).await.unwrap(), MutationPath::LocalOnly);
        assert_eq!(surface.indicator_label(), "Cloud sync disabled");
    }

    #[tokio::test]
    async fn manager_without_settings_reports_disabled() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileLocalStore::new(dir.path().to_path_buf()));
        let mut surface = Surface::open(ViewVariant::Manager, store, Client::new()).await.unwrap();
        surface.start().await;
        assert_eq!(surface.coordinator().status(), SyncStatus::Disabled);
    }

    #[tokio::test]
    async fn edit_keeps_unspecified_fields() {
        let dir = tempdir().unwrap();
        let mut surface = popup(dir.path()).await;
        surface
            .add(PromptDraft::from_form("Title", "Body", "a, b").unwrap())
            .await
            .unwrap();
        let id = surface.coordinator().prompts()[0].id.clone();

        let edit = PromptEdit {
            title: Some("Renamed".into()),
            ..Default::default()
        };
        surface.edit(&id, edit).await.unwrap();

        let prompt = surface.coordinator().get(&id).unwrap();
        assert_eq!(prompt.title, "Renamed");
        assert_eq!(prompt.content, "Body");
        assert_eq!(prompt.tags, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn edit_rejects_blanked_title_without_change() {
        let dir = tempdir().unwrap();
        let mut surface = popup(dir.path()).await;
        surface
            .add(PromptDraft::from_form("Title", "Body", "").unwrap())
            .await
            .unwrap();
        let id = surface.coordinator().prompts()[0].id.clone();

        let edit = PromptEdit {
            title: Some("  ".into()),
            ..Default::default()
        };
        let err = surface.edit(&id, edit).await.unwrap_err();

        assert!(matches!(err, PromptError::Validation { .. }));
        assert_eq!(surface.coordinator().get(&id).unwrap().title, "Title");
    }

    #[tokio::test]
    async fn copy_unknown_id_is_not_found() {
        let dir = tempdir().unwrap();
        let surface = popup(dir.path()).await;
        let err = surface.copy("missing").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PromptError>(),
            Some(PromptError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn render_applies_query_and_facets() {
        let dir = tempdir().unwrap();
        let mut surface = popup(dir.path()).await;
        surface
            .add(PromptDraft::from_form("Alpha", "first", "x").unwrap())
            .await
            .unwrap();
        surface
            .add(PromptDraft::from_form("Beta", "second", "y").unwrap())
            .await
            .unwrap();

        surface.set_query(PromptQuery::new(Some("x".into()), None));
        let out = surface.render();

        assert!(out.starts_with("All  [x]  y"));
        assert!(out.contains("Alpha"));
        assert!(!out.contains("Beta"));
    }

    #[tokio::test]
    async fn second_surface_sees_persisted_list() {
        let dir = tempdir().unwrap();
        let mut first = popup(dir.path()).await;
        first.capture("captured selection").await.unwrap();

        let second = popup(dir.path()).await;
        assert_eq!(second.coordinator().prompts().len(), 1);
        assert_eq!(second.coordinator().prompts()[0].title, "captured selection");
    }

    #[tokio::test]
    async fn external_settings_change_disables_sync() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileLocalStore::new(dir.path().to_path_buf()));
        let mut settings = Settings::default();
        settings.cloud_sync.enabled = true;
        storage::save_settings(store.as_ref(), &settings).await.unwrap();
        let mut surface = Surface::open(ViewVariant::Manager, store.clone(), Client::new())
            .await
            .unwrap();
        assert!(surface.coordinator().cloud_sync_enabled());

        settings.cloud_sync.enabled = false;
        surface
            .apply_external_change(StorageChange {
                key: SETTINGS_KEY.to_string(),
                value: Some(serde_json::to_value(&settings).unwrap()),
                origin: ChangeOrigin::External,
            })
            .await;

        assert!(!surface.coordinator().cloud_sync_enabled());
        assert_eq!(surface.coordinator().status(), SyncStatus::Disabled);
        assert!(store.get(SETTINGS_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn watch_stops_on_shutdown_across_loop_passes() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileLocalStore::new(dir.path().to_path_buf()));
        let surface = Surface::open(ViewVariant::Manager, store, Client::new()).await.unwrap();

        // The poll tick wakes the loop several times before shutdown is due.
        let shutdown = tokio::time::sleep(Duration::from_millis(100));
        let finished = tokio::time::timeout(
            Duration::from_secs(5),
            surface.watch_until(Duration::from_millis(10), shutdown),
        )
        .await;

        assert!(finished.expect("watch did not stop").is_ok());
    }

    #[tokio::test]
    async fn missing_deadline_never_fires() {
        let fired = tokio::time::timeout(Duration::from_millis(20), sleep_until_deadline(None)).await;
        assert!(fired.is_err());
        let past = Instant::now();
        assert!(
            tokio::time::timeout(Duration::from_millis(20), sleep_until_deadline(Some(past)))
                .await
                .is_ok()
        );
    }
}
