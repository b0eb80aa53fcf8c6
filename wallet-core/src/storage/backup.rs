use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::vault::{Vault, VaultRecord};
use crate::account::Profile;
use crate::errors::{WalletError, WalletResult};

pub const BACKUP_FORMAT: &str = "whispr-backup";
pub const BACKUP_VERSION: u32 = 1;

/// Portable export of one passphrase scope. Blobs are carried verbatim and
/// stay encrypted under the original passphrase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupBundle {
    pub version: u32,
    pub format: String,
    pub exported_at: DateTime<Utc>,
    pub profile: Option<String>,
    pub wallets: Option<String>,
    #[serde(default)]
    pub swap_history: Option<String>,
}

impl BackupBundle {
    pub fn export(vault: &Vault) -> WalletResult<Self> {
        let profile = vault.raw_blob(VaultRecord::Profile)?;
        if profile.is_none() {
            return Err(WalletError::NotFound(
                "No account exists for this passphrase".to_string(),
            ));
        }

        Ok(Self {
            version: BACKUP_VERSION,
            format: BACKUP_FORMAT.to_string(),
            exported_at: Utc::now(),
            profile,
            wallets: vault.raw_blob(VaultRecord::Wallets)?,
            swap_history: vault.raw_blob(VaultRecord::SwapHistory)?,
        })
    }

    pub fn to_json(&self) -> WalletResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn parse(raw: &str) -> WalletResult<Self> {
        let bundle: BackupBundle = serde_json::from_str(raw)
            .map_err(|_| WalletError::ValidationError("Invalid backup file format".to_string()))?;

        if bundle.format != BACKUP_FORMAT {
            return Err(WalletError::ValidationError(
                "Not a valid Whispr backup file".to_string(),
            ));
        }
        if bundle.version != BACKUP_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported backup version: {}",
                bundle.version
            )));
        }
        Ok(bundle)
    }

    /// Write the bundle into `vault`'s scope after proving the vault's
    /// passphrase can read it. Nothing is written if any blob fails to decrypt.
    pub fn restore_into(&self, vault: &Vault) -> WalletResult<Profile> {
        let profile_blob = self.profile.as_deref().ok_or_else(|| {
            WalletError::ValidationError("Backup does not contain a profile".to_string())
        })?;
        let profile: Profile = vault.decrypt_blob(profile_blob)?;

        if let Some(wallets) = &self.wallets {
            vault.decrypt_blob::<serde_json::Value>(wallets)?;
        }
        if let Some(history) = &self.swap_history {
            vault.decrypt_blob::<serde_json::Value>(history)?;
        }

        vault.put_raw_blob(VaultRecord::Profile, profile_blob)?;
        if let Some(wallets) = &self.wallets {
            vault.put_raw_blob(VaultRecord::Wallets, wallets)?;
        }
        if let Some(history) = &self.swap_history {
            vault.put_raw_blob(VaultRecord::SwapHistory, history)?;
        }

        log::info!("Restored backup exported at {}", self.exported_at);
        Ok(profile)
    }
}
