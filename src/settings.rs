use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::store::KvStore;

pub const SETTINGS_KEY: &str = "local:systemSettings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ru,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemSettings {
    pub notifications: bool,
    pub sync_interval: u32,
    pub enabled: bool,
    pub smurf_detection: bool,
    pub hide_campaigns: bool,
    pub language: Language,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            notifications: true,
            sync_interval: 15,
            enabled: true,
            smurf_detection: true,
            hide_campaigns: false,
            language: Language::En,
        }
    }
}

impl SystemSettings {
    pub fn detection_active(&self) -> bool {
        self.enabled && self.smurf_detection
    }

    pub fn campaigns_hidden(&self) -> bool {
        self.enabled && self.hide_campaigns
    }
}

/// Stored settings, or the defaults when nothing (or something unreadable) is stored.
pub fn load(store: &dyn KvStore) -> SystemSettings {
    match store.get(SETTINGS_KEY) {
        Ok(Some(raw)) => serde_json::from_value(raw).unwrap_or_else(|err| {
            warn!(error = %err, "stored settings unreadable, using defaults");
            SystemSettings::default()
        }),
        Ok(None) => SystemSettings::default(),
        Err(err) => {
            warn!(error = %err, "failed to read settings, using defaults");
            SystemSettings::default()
        }
    }
}

pub fn save(store: &dyn KvStore, settings: &SystemSettings) -> Result<()> {
    let raw = serde_json::to_value(settings).context("encode settings")?;
    store.set(SETTINGS_KEY, raw)
}

/// Persists the extension toggle. Any change drops every cached player result.
pub fn set_enabled(
    store: &dyn KvStore,
    cache: &ResultCache,
    enabled: bool,
) -> Result<SystemSettings> {
    let mut settings = load(store);
    settings.enabled = enabled;
    save(store, &settings)?;
    cache.clear();
    info!(enabled, "extension toggled, cache cleared");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn missing_settings_fall_back_to_defaults() {
        let store = MemoryStore::new();
        let settings = load(&store);
        assert_eq!(settings, SystemSettings::default());
        assert!(settings.detection_active());
        assert!(!settings.campaigns_hidden());
    }

    #[test]
    fn partial_settings_keep_other_defaults() {
        let store = MemoryStore::new();
        store
            .set(SETTINGS_KEY, json!({"hideCampaigns": true, "language": "ru"}))
            .unwrap();
        let settings = load(&store);
        assert!(settings.hide_campaigns);
        assert_eq!(settings.language, Language::Ru);
        assert_eq!(settings.sync_interval, 15);
    }

    #[test]
    fn toggling_clears_cache() {
        let store = Arc::new(MemoryStore::new());
        let cache = ResultCache::new(store.clone(), Duration::from_secs(600));
        cache.set_value("player:x", json!({"player_id": "1"}));

        let settings = set_enabled(store.as_ref(), &cache, false).unwrap();
        assert!(!settings.enabled);
        assert!(!settings.detection_active());
        assert_eq!(cache.get_value("player:x"), None);
        assert!(!load(store.as_ref()).enabled);
    }
}
