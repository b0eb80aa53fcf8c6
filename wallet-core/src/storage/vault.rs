use std::sync::Arc;

use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::Serialize;
use zeroize::Zeroizing;

use super::kv::KeyValueStore;
use crate::crypto::{passphrase_scope, Envelope, KdfParameters, VaultCipher};
use crate::errors::{WalletError, WalletResult};
use crate::wallet_store::WalletRecord;

const KEY_PREFIX: &str = "whispr";

/// The three records persisted per passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultRecord {
    Profile,
    Wallets,
    SwapHistory,
}

impl VaultRecord {
    pub const ALL: [VaultRecord; 3] = [
        VaultRecord::Profile,
        VaultRecord::Wallets,
        VaultRecord::SwapHistory,
    ];

    /// Storage key for this record within a passphrase scope.
    pub fn storage_key(&self, scope: &str) -> String {
        match self {
            VaultRecord::Profile => format!("{KEY_PREFIX}_{scope}"),
            VaultRecord::Wallets => format!("{KEY_PREFIX}_wallets_{scope}"),
            VaultRecord::SwapHistory => format!("{KEY_PREFIX}_swaps_{scope}"),
        }
    }
}

/// Passphrase-scoped encrypted record store.
///
/// The key is derived once in [`Vault::open`] and lives until the vault is
/// dropped. Routine reads fail closed: anything that cannot be decrypted and
/// parsed reads as absent.
pub struct Vault {
    store: Arc<dyn KeyValueStore>,
    cipher: VaultCipher,
    scope: String,
}

impl Vault {
    pub fn open(
        store: Arc<dyn KeyValueStore>,
        passphrase: &SecretString,
        kdf: &KdfParameters,
    ) -> WalletResult<Self> {
        let cipher = VaultCipher::derive(passphrase, kdf)?;
        Ok(Self {
            store,
            cipher,
            scope: passphrase_scope(passphrase),
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn store<T: Serialize + ?Sized>(&self, record: VaultRecord, value: &T) -> WalletResult<()> {
        let plaintext = Zeroizing::new(serde_json::to_vec(value)?);
        let envelope = self.cipher.seal(&plaintext)?;
        self.store
            .put(&record.storage_key(&self.scope), &envelope.to_json()?)
    }

    pub fn load<T: DeserializeOwned>(&self, record: VaultRecord) -> Option<T> {
        match self.load_strict(record) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("Discarding unreadable {:?} record: {}", record, err);
                None
            }
        }
    }

    /// Like [`Vault::load`], but decryption failure is an error rather than absence.
    pub fn load_strict<T: DeserializeOwned>(&self, record: VaultRecord) -> WalletResult<Option<T>> {
        let Some(raw) = self.raw_blob(record)? else {
            return Ok(None);
        };

        let envelope = Envelope::from_json(&raw).map_err(|_| WalletError::AuthenticationFailed)?;
        let plaintext = self
            .cipher
            .open(&envelope)
            .map_err(|_| WalletError::AuthenticationFailed)?;
        let value = serde_json::from_slice(&plaintext)?;
        Ok(Some(value))
    }

    pub fn save_wallets(&self, wallets: &[WalletRecord]) -> WalletResult<()> {
        self.store(VaultRecord::Wallets, wallets)
    }

    /// The stored wallet list. An unreadable list is an error, never empty,
    /// so it cannot be replaced by a later save.
    pub fn load_wallets(&self) -> WalletResult<Vec<WalletRecord>> {
        Ok(self
            .load_strict(VaultRecord::Wallets)?
            .unwrap_or_default())
    }

    pub fn exists(&self, record: VaultRecord) -> WalletResult<bool> {
        Ok(self.raw_blob(record)?.is_some())
    }

    /// Ciphertext exactly as stored, for portable backups.
    pub fn raw_blob(&self, record: VaultRecord) -> WalletResult<Option<String>> {
        self.store.get(&record.storage_key(&self.scope))
    }

    pub fn put_raw_blob(&self, record: VaultRecord, blob: &str) -> WalletResult<()> {
        self.store.put(&record.storage_key(&self.scope), blob)
    }

    /// Decrypt a foreign blob with this vault's key without storing it.
    pub fn decrypt_blob<T: DeserializeOwned>(&self, blob: &str) -> WalletResult<T> {
        let envelope = Envelope::from_json(blob).map_err(|_| WalletError::AuthenticationFailed)?;
        let plaintext = self
            .cipher
            .open(&envelope)
            .map_err(|_| WalletError::AuthenticationFailed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
