//! Asset registry.
//!
//! Assets are stored with their full configuration document so a dispatcher
//! tick can decide which fetches apply from the registry snapshot alone.
//! `upsert` validates before it writes and rejects with the offending path;
//! concurrent upserts of the same symbol are serialized.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::asset::{AssetConfig, ConfigError};
use crate::storage::{AssetRow, StorageBackend, StorageError};

/// One registered asset with its parsed configuration.
#[derive(Debug, Clone)]
pub struct RegisteredAsset {
    pub symbol: String,
    pub name: String,
    pub config: AssetConfig,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegisteredAsset {
    fn from_row(row: AssetRow) -> Result<Self, RegistryError> {
        let config: AssetConfig = serde_json::from_value(row.config)
            .map_err(|e| RegistryError::Config(ConfigError::Malformed(e.to_string())))?;
        Ok(Self {
            symbol: row.symbol,
            name: row.name,
            config,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
pub enum RegistryError {
    Config(ConfigError),
    Storage(StorageError),
    UnknownAsset(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Config(err) => write!(f, "{err}"),
            RegistryError::Storage(err) => write!(f, "{err}"),
            RegistryError::UnknownAsset(symbol) => write!(f, "unknown asset: {symbol}"),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Config(err) => Some(err),
            RegistryError::Storage(err) => Some(err),
            RegistryError::UnknownAsset(_) => None,
        }
    }
}

impl From<ConfigError> for RegistryError {
    fn from(err: ConfigError) -> Self {
        RegistryError::Config(err)
    }
}

impl From<StorageError> for RegistryError {
    fn from(err: StorageError) -> Self {
        RegistryError::Storage(err)
    }
}

pub struct AssetRegistry {
    backend: Arc<dyn StorageBackend>,
    upsert_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AssetRegistry {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            upsert_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.upsert_locks.lock().await;
        locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Validate and store an asset configuration. Creates the asset or
    /// replaces its config; `created_at` is preserved across updates.
    #[instrument(skip(self, config), fields(symbol))]
    pub async fn upsert(
        &self,
        symbol: &str,
        name: &str,
        config: AssetConfig,
        enabled: bool,
    ) -> Result<(), RegistryError> {
        config.validate()?;

        let lock = self.lock_for(symbol).await;
        let _guard = lock.lock().await;

        let now = Utc::now();
        let created_at = match self.backend.get_asset(symbol).await? {
            Some(existing) => existing.created_at,
            None => now,
        };

        let config = serde_json::to_value(&config)
            .map_err(|e| RegistryError::Config(ConfigError::Malformed(e.to_string())))?;

        self.backend
            .upsert_asset(AssetRow {
                symbol: symbol.to_string(),
                name: name.to_string(),
                config,
                enabled,
                created_at,
                updated_at: now,
            })
            .await?;

        debug!("asset {symbol} upserted");
        Ok(())
    }

    pub async fn get(&self, symbol: &str) -> Result<Option<RegisteredAsset>, RegistryError> {
        match self.backend.get_asset(symbol).await? {
            Some(row) => Ok(Some(RegisteredAsset::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Enabled assets, parsed. A row whose stored config no longer parses is
    /// a registry bug; surfacing it beats silently skipping the asset.
    pub async fn list_enabled(&self) -> Result<Vec<RegisteredAsset>, RegistryError> {
        self.backend
            .list_assets(true)
            .await?
            .into_iter()
            .map(RegisteredAsset::from_row)
            .collect()
    }

    pub async fn disable(&self, symbol: &str) -> Result<(), RegistryError> {
        if self.backend.set_asset_enabled(symbol, false).await? {
            Ok(())
        } else {
            Err(RegistryError::UnknownAsset(symbol.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Chain, DexPool, DexProtocol, TokenAddress};
    use crate::storage::memory::MemoryBackend;

    fn valid_config() -> AssetConfig {
        AssetConfig {
            token_addresses: vec![TokenAddress {
                chain: Chain::Ethereum,
                address: "0xc02a".to_string(),
            }],
            ..AssetConfig::default()
        }
    }

    fn registry() -> AssetRegistry {
        AssetRegistry::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips_config() {
        let registry = registry();
        registry
            .upsert("WBTC", "Wrapped Bitcoin", valid_config(), true)
            .await
            .unwrap();

        let asset = registry.get("WBTC").await.unwrap().unwrap();
        assert_eq!(asset.name, "Wrapped Bitcoin");
        assert_eq!(asset.config, valid_config());
        assert!(asset.enabled);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_write() {
        let registry = registry();

        let mut config = valid_config();
        config.dex_pools.push(DexPool {
            protocol: DexProtocol::Curve,
            chain: Chain::Base,
            pool_address: "0xpool".to_string(),
            pool_name: None,
            extra: serde_json::Map::new(),
        });

        let err = registry.upsert("BAD", "Bad Asset", config, true).await;
        assert!(matches!(err, Err(RegistryError::Config(_))));
        assert!(registry.get("BAD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disable_removes_from_enabled_listing() {
        let registry = registry();
        registry
            .upsert("WBTC", "Wrapped Bitcoin", valid_config(), true)
            .await
            .unwrap();
        registry
            .upsert("TBTC", "Threshold BTC", valid_config(), true)
            .await
            .unwrap();

        registry.disable("WBTC").await.unwrap();

        let enabled = registry.list_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].symbol, "TBTC");
    }

    #[tokio::test]
    async fn disable_unknown_asset_errors() {
        let registry = registry();
        assert!(matches!(
            registry.disable("NOPE").await,
            Err(RegistryError::UnknownAsset(_))
        ));
    }

    #[tokio::test]
    async fn upsert_is_idempotent_for_unchanged_config() {
        let registry = registry();
        registry
            .upsert("WBTC", "Wrapped Bitcoin", valid_config(), true)
            .await
            .unwrap();
        let first = registry.get("WBTC").await.unwrap().unwrap();

        registry
            .upsert("WBTC", "Wrapped Bitcoin", valid_config(), true)
            .await
            .unwrap();
        let second = registry.get("WBTC").await.unwrap().unwrap();

        assert_eq!(first.config, second.config);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn concurrent_upserts_of_same_symbol_serialize() {
        let registry = Arc::new(registry());

        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .upsert("WBTC", &format!("Wrapped Bitcoin v{i}"), valid_config(), true)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(registry.get("WBTC").await.unwrap().is_some());
    }
}
