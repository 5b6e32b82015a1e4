use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};

use super::file_store::FileLocalStore;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches the data directory for writes made by other surfaces and turns
/// them into `External` storage changes on the store's channel.
pub struct StoreWatcher {
    /// Dropping the debouncer stops the watcher.
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

impl StoreWatcher {
    pub fn start(store: Arc<FileLocalStore>) -> anyhow::Result<Self> {
        let data_dir = store.base_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let handler_store = store.clone();
        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |events: Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "fs watcher error");
                        return;
                    }
                };

                for event in events {
                    if event.kind != DebouncedEventKind::Any {
                        continue;
                    }

                    let Some(key) = key_for_file(&event.path) else {
                        continue;
                    };

                    if let Some(change) = handler_store.reload_key(&key) {
                        tracing::info!(
                            key = %change.key,
                            removed = change.value.is_none(),
                            "external storage change detected"
                        );
                    }
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&data_dir, RecursiveMode::NonRecursive)?;

        tracing::info!(dir = %data_dir.display(), "storage watcher started");

        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

/// `prompts.json` -> `prompts`. Temp files and anything else are ignored.
fn key_for_file(path: &std::path::Path) -> Option<String> {
    let filename = path.file_name()?.to_str()?;
    if filename.ends_with(".json.tmp") {
        return None;
    }
    filename.strip_suffix(".json").map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn maps_json_files_to_keys() {
        assert_eq!(key_for_file(Path::new("/d/prompts.json")).as_deref(), Some("prompts"));
        assert_eq!(key_for_file(Path::new("/d/settings.json")).as_deref(), Some("settings"));
    }

    #[test]
    fn ignores_temp_and_foreign_files() {
        assert!(key_for_file(Path::new("/d/prompts.json.tmp")).is_none());
        assert!(key_for_file(Path::new("/d/notes.txt")).is_none());
        assert!(key_for_file(Path::new("/")).is_none());
    }
}
