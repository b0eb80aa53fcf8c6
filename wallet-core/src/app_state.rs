use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::balance::BalanceOracle;
use crate::config_store::{ConfigStore, WalletConfig};
use crate::crypto::generate_passphrase;
use crate::dex::{SwapExecutor, SwapRouterClient};
use crate::errors::WalletResult;
use crate::prices::{HttpPriceClient, PriceOracle};
use crate::rpc_client::RpcClient;
use crate::session::{AccessGuard, Session};
use crate::storage::{BackupBundle, FileStore, KeyValueStore, WalletPaths};
use crate::transfer::TransferDesk;

const BACKUPS_TO_KEEP: usize = 10;

/// Filesystem root, configuration and shared services for one installation.
pub struct WalletContext {
    paths: WalletPaths,
    store: Arc<dyn KeyValueStore>,
    config_store: ConfigStore,
    config: WalletConfig,
    access: AccessGuard,
    environment: String,
}

impl WalletContext {
    pub fn initialize(root_dir: impl AsRef<Path>) -> WalletResult<Self> {
        let environment =
            std::env::var("WHISPR_WALLET_ENV").unwrap_or_else(|_| "development".to_string());
        let paths = WalletPaths::new(root_dir)?;
        paths.ensure_directories()?;

        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(paths.store_dir())?);
        let config_store = ConfigStore::from_paths(&paths);
        let config = config_store.load_or_default(environment.clone())?;
        let access = AccessGuard::new(config.session.max_failed_attempts);
        log::info!(
            "Initialized wallet context at {} ({})",
            paths.root_dir().display(),
            environment
        );

        Ok(Self {
            paths,
            store,
            config_store,
            config,
            access,
            environment,
        })
    }

    pub fn paths(&self) -> &WalletPaths {
        &self.paths
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn access_guard(&self) -> &AccessGuard {
        &self.access
    }

    pub fn update_config<F>(&mut self, updater: F) -> WalletResult<&WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        let updated = self
            .config_store
            .update(self.environment.clone(), updater)?;
        if updated.session.max_failed_attempts != self.config.session.max_failed_attempts {
            self.access = AccessGuard::new(updated.session.max_failed_attempts);
        }
        self.config = updated;
        Ok(&self.config)
    }

    /// A fresh 12-word passphrase for a new account.
    pub fn generate_passphrase(&self) -> WalletResult<SecretString> {
        generate_passphrase()
    }

    pub fn create_account(&self, passphrase: &str, username: &str) -> WalletResult<Session> {
        Session::create(
            self.store.clone(),
            passphrase,
            username,
            &self.config.kdf,
            self.session_timeout(),
        )
    }

    pub fn open_session(&self, passphrase: &str) -> WalletResult<Session> {
        Session::open(
            self.store.clone(),
            passphrase,
            &self.config.kdf,
            self.session_timeout(),
            &self.access,
        )
    }

    /// Write a timestamped backup of the session's account.
    pub fn write_backup(&self, session: &Session) -> WalletResult<PathBuf> {
        let bundle = session.export_backup()?;
        let path = self.paths.write_backup(&bundle.to_json()?)?;
        let pruned = self.paths.prune_old_backups(BACKUPS_TO_KEEP)?;
        if pruned > 0 {
            log::debug!("Pruned {} old backup(s)", pruned);
        }
        log::info!("Wrote backup to {}", path.display());
        Ok(path)
    }

    pub fn restore_backup(
        &self,
        passphrase: &str,
        backup_path: impl AsRef<Path>,
    ) -> WalletResult<Session> {
        let raw = self.paths.read_backup(backup_path)?;
        let bundle = BackupBundle::parse(&raw)?;
        Session::restore(
            self.store.clone(),
            passphrase,
            &bundle,
            &self.config.kdf,
            self.session_timeout(),
        )
    }

    pub fn transfer_desk(&self) -> TransferDesk {
        TransferDesk::new(self.config.fees.clone(), self.config.quote_ttl())
    }

    pub fn rpc_client(&self) -> WalletResult<Arc<RpcClient>> {
        Ok(Arc::new(RpcClient::new(
            &self.config.network.rpc_endpoint,
            self.config.network.request_timeout(),
        )?))
    }

    pub fn balance_oracle(&self) -> WalletResult<BalanceOracle> {
        Ok(BalanceOracle::new(self.rpc_client()?))
    }

    pub fn price_oracle(&self) -> WalletResult<PriceOracle> {
        let client = HttpPriceClient::new(
            &self.config.network.price_endpoint,
            self.config.network.request_timeout(),
        )?;
        Ok(PriceOracle::new(
            Arc::new(client),
            self.config.polling.price_ttl(),
        ))
    }

    pub fn swap_executor(&self) -> WalletResult<SwapExecutor> {
        let dex = SwapRouterClient::new(
            &self.config.network.swap_endpoint,
            self.config.network.request_timeout(),
        )?;
        Ok(SwapExecutor::new(
            Arc::new(dex),
            self.rpc_client()?,
            self.config.polling.confirmation(),
        ))
    }

    fn session_timeout(&self) -> Duration {
        duration_from_minutes(self.config.session.auto_lock_minutes)
    }
}

impl std::fmt::Debug for WalletContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletContext")
            .field("root", &self.paths.root_dir())
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

fn duration_from_minutes(minutes: u32) -> Duration {
    let clamped = minutes.max(1) as u64;
    Duration::from_secs(clamped.saturating_mul(60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn initialize_creates_layout_and_config() {
        let temp = TempDir::new().unwrap();
        let context = WalletContext::initialize(temp.path()).unwrap();

        assert!(context.paths().store_dir().exists());
        assert!(context.paths().backup_dir().exists());
        assert!(context.config_store().path().exists());
        assert_eq!(context.config().quote_ttl(), Duration::from_secs(120));
        assert_eq!(context.access_guard().remaining_attempts(), 5);
    }

    #[test]
    fn update_config_rebuilds_guard() {
        let temp = TempDir::new().unwrap();
        let mut context = WalletContext::initialize(temp.path()).unwrap();
        context
            .update_config(|config| {
                config.session.max_failed_attempts = 3;
                Ok(())
            })
            .unwrap();

        assert_eq!(context.access_guard().remaining_attempts(), 3);
        let reloaded = WalletContext::initialize(temp.path()).unwrap();
        assert_eq!(reloaded.config().session.max_failed_attempts, 3);
    }

    #[test]
    fn clamps_minutes() {
        assert_eq!(duration_from_minutes(0), Duration::from_secs(60));
        assert_eq!(duration_from_minutes(15), Duration::from_secs(900));
    }

    #[test]
    fn desk_uses_configured_fees() {
        let temp = TempDir::new().unwrap();
        let mut context = WalletContext::initialize(temp.path()).unwrap();
        context
            .update_config(|config| {
                config.fees.relayer_fee_rate = 0.01;
                Ok(())
            })
            .unwrap();
        assert_eq!(context.transfer_desk().policy().relayer_fee_rate, 0.01);
    }
}
