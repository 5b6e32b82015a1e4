use serde::{Deserialize, Serialize};

pub const DEFAULT_PROVIDER: &str = "supabase";
pub const DEFAULT_AUTO_SAVE_INTERVAL: u32 = 30;

/// User settings persisted under the `settings` key. Always saved whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub cloud_sync: CloudSyncSettings,
    pub auto_save_interval: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSyncSettings {
    pub enabled: bool,
    pub provider: String,
    pub supabase: SupabaseSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupabaseSettings {
    pub url: String,
    pub anon_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cloud_sync: CloudSyncSettings::default(),
            auto_save_interval: DEFAULT_AUTO_SAVE_INTERVAL,
        }
    }
}

impl Default for CloudSyncSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: DEFAULT_PROVIDER.to_string(),
            supabase: SupabaseSettings::default(),
        }
    }
}

impl SupabaseSettings {
    pub fn has_credentials(&self) -> bool {
        !self.url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }
}

impl CloudSyncSettings {
    /// Enabled and carrying both URL and key.
    pub fn is_usable(&self) -> bool {
        self.enabled && self.supabase.has_credentials()
    }
}

/// Changes requested on the settings page. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub enabled: Option<bool>,
    pub provider: Option<String>,
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub auto_save_interval: Option<u32>,
}

impl Settings {
    /// Apply a form submission. An auto-save interval of zero falls back to
    /// the default.
    pub fn apply(&mut self, update: SettingsUpdate) {
        if let Some(enabled) = update.enabled {
            self.cloud_sync.enabled = enabled;
        }
        if let Some(provider) = update.provider {
            self.cloud_sync.provider = provider;
        }
        if let Some(url) = update.url {
            self.cloud_sync.supabase.url = url;
        }
        if let Some(anon_key) = update.anon_key {
            self.cloud_sync.supabase.anon_key = anon_key;
        }
        if let Some(interval) = update.auto_save_interval {
            self.auto_save_interval = if interval == 0 {
                DEFAULT_AUTO_SAVE_INTERVAL
            } else {
                interval
            };
        }
    }
}
