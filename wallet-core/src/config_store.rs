use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confirm::ConfirmationPolicy;
use crate::crypto::KdfParameters;
use crate::errors::{WalletError, WalletResult};
use crate::quote::FeePolicy;
use crate::storage::kv::write_atomic;
use crate::storage::WalletPaths;

const CONFIG_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    pub rpc_endpoint: String,
    pub price_endpoint: String,
    pub swap_endpoint: String,
    pub request_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: "https://api.mainnet-beta.solana.com".to_string(),
            price_endpoint: "https://api.coingecko.com/api/v3".to_string(),
            swap_endpoint: "https://api.jup.ag".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    pub balance_refresh_secs: u64,
    pub price_cache_ttl_secs: u64,
    pub confirmation_interval_ms: u64,
    pub confirmation_max_attempts: u32,
    pub confirmation_resubmit_every: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            balance_refresh_secs: 15,
            price_cache_ttl_secs: 30,
            confirmation_interval_ms: 2_000,
            confirmation_max_attempts: 30,
            confirmation_resubmit_every: 5,
        }
    }
}

impl PollingConfig {
    pub fn balance_interval(&self) -> Duration {
        Duration::from_secs(self.balance_refresh_secs.max(1))
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_cache_ttl_secs)
    }

    pub fn confirmation(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            interval: Duration::from_millis(self.confirmation_interval_ms),
            max_attempts: self.confirmation_max_attempts.max(1),
            resubmit_every: self.confirmation_resubmit_every,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub auto_lock_minutes: u32,
    pub max_failed_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_lock_minutes: 15,
            max_failed_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletConfig {
    pub network: NetworkConfig,
    #[serde(default)]
    pub fees: FeePolicy,
    #[serde(default)]
    pub polling: PollingConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub kdf: KdfParameters,
    #[serde(default = "default_quote_ttl_secs")]
    pub quote_ttl_secs: u64,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

fn default_quote_ttl_secs() -> u64 {
    120
}

impl WalletConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            network: NetworkConfig::default(),
            fees: FeePolicy::default(),
            polling: PollingConfig::default(),
            session: SessionConfig::default(),
            kdf: KdfParameters::default(),
            quote_ttl_secs: default_quote_ttl_secs(),
            environment: environment.into(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn quote_ttl(&self) -> Duration {
        Duration::from_secs(self.quote_ttl_secs)
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: WalletConfig,
    modified_at_unix: i64,
}

/// Handles persistence of wallet configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_paths(paths: &WalletPaths) -> Self {
        Self {
            path: paths.config_file().to_path_buf(),
        }
    }

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> WalletResult<WalletConfig> {
        if !self.path.exists() {
            let config = WalletConfig::new(environment);
            self.save(&config)?;
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(WalletError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &WalletConfig) -> WalletResult<()> {
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| WalletError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        write_atomic(&self.path, &serialized)?;
        log::debug!("Saved wallet config to {}", self.path.display());
        Ok(())
    }

    pub fn update<F>(
        &self,
        environment: impl Into<String>,
        updater: F,
    ) -> WalletResult<WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &WalletConfig) -> WalletResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    hasher.update(&serde_json::to_vec(config)?);
    Ok(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_and_load_config_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wallet.config");
        let store = ConfigStore::new(&path);

        let mut config = WalletConfig::new("development");
        config.network.rpc_endpoint = "http://localhost:8899".into();
        config.fees.relayer_fee_rate = 0.01;
        store.save(&config).unwrap();

        let loaded = store.load_or_default("development").unwrap();
        assert_eq!(loaded.network.rpc_endpoint, "http://localhost:8899");
        assert_eq!(loaded.fees.relayer_fee_rate, 0.01);
        assert_eq!(loaded.quote_ttl(), Duration::from_secs(120));
    }

    #[test]
    fn missing_file_writes_defaults() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("nested").join("wallet.config"));

        let config = store.load_or_default("test").unwrap();
        assert_eq!(config.environment, "test");
        assert_eq!(config.fees, FeePolicy::default());
        assert!(store.path().exists());
    }

    #[test]
    fn tampered_config_detected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wallet.config");
        let store = ConfigStore::new(&path);
        store.save(&WalletConfig::new("test")).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        if let Some(byte) = bytes.iter_mut().find(|b| **b != 0) {
            *byte ^= 0xAA;
        }
        fs::write(&path, bytes).unwrap();

        let result = store.load_or_default("test");
        assert!(matches!(result, Err(WalletError::ValidationError(_))));
    }

    #[test]
    fn edited_payload_fails_checksum() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wallet.config");
        let store = ConfigStore::new(&path);
        store.save(&WalletConfig::new("test")).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        fs::write(&path, raw.replace("\"quote_ttl_secs\": 120", "\"quote_ttl_secs\": 9999"))
            .unwrap();

        assert!(matches!(
            store.load_or_default("test"),
            Err(WalletError::ValidationError(msg)) if msg.contains("integrity")
        ));
    }

    #[test]
    fn update_persists_changes() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("wallet.config"));
        store
            .update("test", |config| {
                config.polling.balance_refresh_secs = 60;
                Ok(())
            })
            .unwrap();

        let loaded = store.load_or_default("test").unwrap();
        assert_eq!(loaded.polling.balance_interval(), Duration::from_secs(60));
        assert_eq!(loaded.polling.confirmation().max_attempts, 30);
    }
}
