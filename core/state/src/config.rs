//! Engine configuration persistence through the `Config` partition.

use crate::store::{Partition, StateStore};
use strongroom_common::{EngineConfig, Error, Result};

/// Key the engine configuration lives under.
const CONFIG_KEY: &str = "engine";

/// Load the persisted configuration, if any.
pub async fn load_config(store: &dyn StateStore) -> Result<Option<EngineConfig>> {
    match store.get(Partition::Config, CONFIG_KEY).await? {
        Some(bytes) => {
            let json = std::str::from_utf8(&bytes)
                .map_err(|e| Error::Serialization(format!("config is not valid UTF-8: {}", e)))?;
            Ok(Some(EngineConfig::from_json(json)?))
        }
        None => Ok(None),
    }
}

/// Load the persisted configuration, falling back to defaults.
pub async fn load_config_or_default(store: &dyn StateStore) -> Result<EngineConfig> {
    Ok(load_config(store).await?.unwrap_or_default())
}

/// Validate and persist the configuration.
pub async fn save_config(store: &dyn StateStore, config: &EngineConfig) -> Result<()> {
    config.validate()?;
    store
        .put(Partition::Config, CONFIG_KEY, config.to_json()?.into_bytes())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStateStore;

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = MemoryStateStore::new();
        let config = EngineConfig {
            max_active_keys: 5,
            ..Default::default()
        };

        save_config(&store, &config).await.unwrap();
        let loaded = load_config(&store).await.unwrap();

        assert_eq!(loaded, Some(config));
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let store = MemoryStateStore::new();
        assert_eq!(load_config(&store).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_or_default() {
        let store = MemoryStateStore::new();
        let config = load_config_or_default(&store).await.unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_on_save() {
        let store = MemoryStateStore::new();
        let config = EngineConfig {
            max_active_keys: 0,
            ..Default::default()
        };

        assert!(save_config(&store, &config).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_config_rejected_on_load() {
        let store = MemoryStateStore::new();
        store
            .put(Partition::Config, "engine", b"{not json".to_vec())
            .await
            .unwrap();

        assert!(load_config(&store).await.is_err());
    }
}
