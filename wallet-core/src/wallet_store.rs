//! In-memory wallet collection. Callers persist the full record list through
//! [`crate::storage::Vault::save_wallets`] after every mutation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::balance::BalanceUpdate;
use crate::errors::{WalletError, WalletResult};
use crate::keys::{Keypair, SecretKeyBytes};

pub const DEFAULT_IMPORT_NAME: &str = "Imported";

/// Secret-bearing wallet record. Only ever persisted inside the encrypted vault.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub id: String,
    pub name: String,
    pub address: String,
    pub secret_key: SecretKeyBytes,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub holdings: usize,
    #[serde(default)]
    pub archived: bool,
}

impl WalletRecord {
    fn from_keypair(name: String, keypair: &Keypair) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            address: keypair.address(),
            secret_key: keypair.secret_bytes(),
            balance: 0.0,
            holdings: 0,
            archived: false,
        }
    }

    pub fn keypair(&self) -> WalletResult<Keypair> {
        Keypair::from_secret_bytes(&self.secret_key)
    }

    pub fn public(&self) -> PublicWallet {
        PublicWallet {
            id: self.id.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            balance: self.balance,
            holdings: self.holdings,
            archived: self.archived,
        }
    }
}

/// Display projection of a wallet without its secret key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicWallet {
    pub id: String,
    pub name: String,
    pub address: String,
    pub balance: f64,
    pub holdings: usize,
    pub archived: bool,
}

pub fn public_view(records: &[WalletRecord]) -> Vec<PublicWallet> {
    records.iter().map(WalletRecord::public).collect()
}

/// Base58 export of a wallet's secret key.
pub fn reveal_secret(records: &[WalletRecord], id: &str) -> Option<Zeroizing<String>> {
    let record = records.iter().find(|w| w.id == id)?;
    match record.keypair() {
        Ok(keypair) => Some(keypair.to_base58()),
        Err(err) => {
            log::warn!("Stored key for wallet {} is unusable: {}", record.id, err);
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WalletStore {
    wallets: Vec<WalletRecord>,
}

impl WalletStore {
    pub fn new(wallets: Vec<WalletRecord>) -> Self {
        Self { wallets }
    }

    pub fn records(&self) -> &[WalletRecord] {
        &self.wallets
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&WalletRecord> {
        self.wallets.iter().find(|w| w.id == id)
    }

    pub fn find_by_address(&self, address: &str) -> Option<&WalletRecord> {
        self.wallets.iter().find(|w| w.address == address)
    }

    /// Generate a new wallet. A blank name becomes "Wallet N".
    pub fn create(&mut self, name: &str) -> WalletResult<&WalletRecord> {
        let keypair = Keypair::generate()?;
        let name = match name.trim() {
            "" => format!("Wallet {}", self.wallets.len() + 1),
            trimmed => trimmed.to_string(),
        };
        self.push(WalletRecord::from_keypair(name, &keypair))
    }

    /// Import a base58 keypair. Duplicates are rejected before anything changes.
    pub fn import(&mut self, name: &str, base58_secret: &str) -> WalletResult<&WalletRecord> {
        let keypair = Keypair::from_base58(base58_secret)?;
        let address = keypair.address();
        if self.find_by_address(&address).is_some() {
            return Err(WalletError::DuplicateAddress(address));
        }

        let name = match name.trim() {
            "" => DEFAULT_IMPORT_NAME.to_string(),
            trimmed => trimmed.to_string(),
        };
        self.push(WalletRecord::from_keypair(name, &keypair))
    }

    fn push(&mut self, record: WalletRecord) -> WalletResult<&WalletRecord> {
        log::info!("Added wallet {} ({})", record.id, record.address);
        self.wallets.push(record);
        self.wallets
            .last()
            .ok_or_else(|| WalletError::StorageError("Wallet list unexpectedly empty".to_string()))
    }

    pub fn public_view(&self) -> Vec<PublicWallet> {
        public_view(&self.wallets)
    }

    pub fn reveal_secret(&self, id: &str) -> Option<Zeroizing<String>> {
        reveal_secret(&self.wallets, id)
    }

    /// Move `dragged_id` into `target_id`'s position. Returns whether the order changed.
    pub fn reorder(&mut self, dragged_id: &str, target_id: &str) -> bool {
        if dragged_id == target_id {
            return false;
        }
        let from = self.wallets.iter().position(|w| w.id == dragged_id);
        let to = self.wallets.iter().position(|w| w.id == target_id);
        let (Some(from), Some(to)) = (from, to) else {
            return false;
        };

        let moved = self.wallets.remove(from);
        self.wallets.insert(to, moved);
        true
    }

    /// Flip the archived flag and return its new value.
    pub fn toggle_archive(&mut self, id: &str) -> WalletResult<bool> {
        let wallet = self.get_mut(id)?;
        wallet.archived = !wallet.archived;
        Ok(wallet.archived)
    }

    pub fn rename(&mut self, id: &str, name: &str) -> WalletResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WalletError::ValidationError(
                "Wallet name cannot be empty".to_string(),
            ));
        }
        self.get_mut(id)?.name = name.to_string();
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> WalletResult<WalletRecord> {
        let index = self
            .wallets
            .iter()
            .position(|w| w.id == id)
            .ok_or_else(|| WalletError::NotFound(format!("Wallet {}", id)))?;
        let removed = self.wallets.remove(index);
        log::info!("Deleted wallet {} ({})", removed.id, removed.address);
        Ok(removed)
    }

    /// Apply refreshed balances by address. Returns how many wallets changed.
    pub fn apply_balances(&mut self, updates: &[BalanceUpdate]) -> usize {
        let mut changed = 0;
        for update in updates {
            for wallet in self.wallets.iter_mut().filter(|w| w.address == update.address) {
                if wallet.balance != update.balance || wallet.holdings != update.holdings {
                    wallet.balance = update.balance;
                    wallet.holdings = update.holdings;
                    changed += 1;
                }
            }
        }
        changed
    }

    fn get_mut(&mut self, id: &str) -> WalletResult<&mut WalletRecord> {
        self.wallets
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| WalletError::NotFound(format!("Wallet {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(store: &WalletStore) -> Vec<String> {
        store.records().iter().map(|w| w.name.clone()).collect()
    }

    fn store_with(names: &[&str]) -> WalletStore {
        let mut store = WalletStore::default();
        for name in names {
            store.create(name).unwrap();
        }
        store
    }

    #[test]
    fn create_assigns_defaults() {
        let mut store = WalletStore::default();
        let first = store.create("  ").unwrap().clone();
        assert_eq!(first.name, "Wallet 1");
        assert_eq!(first.balance, 0.0);
        assert!(!first.archived);
        assert_eq!(first.keypair().unwrap().address(), first.address);
        assert_eq!(store.create("Savings").unwrap().name, "Savings");
    }

    #[test]
    fn import_round_trips_revealed_secret() {
        let mut source = store_with(&["Main"]);
        let id = source.records()[0].id.clone();
        let secret = source.reveal_secret(&id).unwrap();

        let mut other = WalletStore::default();
        let imported = other.import("", &secret).unwrap();
        assert_eq!(imported.name, "Imported");
        assert_eq!(imported.address, source.records()[0].address);
        assert_ne!(imported.id, id);

        assert!(source.reveal_secret("missing").is_none());
        source.delete(&id).unwrap();
    }

    #[test]
    fn duplicate_import_leaves_store_untouched() {
        let mut store = store_with(&["Main"]);
        let secret = store.reveal_secret(&store.records()[0].id.clone()).unwrap();
        let before = store.records().to_vec();

        let err = store.import("Again", &secret).unwrap_err();
        assert!(matches!(err, WalletError::DuplicateAddress(_)));
        assert_eq!(store.records(), before.as_slice());
    }

    #[test]
    fn public_view_has_no_secret_field() {
        let store = store_with(&["Main"]);
        let json = serde_json::to_value(store.public_view()).unwrap();
        assert!(json[0].get("secretKey").is_none());
        assert_eq!(json[0]["name"], "Main");
    }

    #[test]
    fn reorder_moves_into_target_slot() {
        let mut store = store_with(&["A", "B", "C"]);
        let a = store.records()[0].id.clone();
        let c = store.records()[2].id.clone();

        assert!(store.reorder(&a, &c));
        assert_eq!(ids(&store), ["B", "C", "A"]);
        assert!(!store.reorder(&a, &a));
        assert!(!store.reorder(&a, "missing"));
        assert_eq!(ids(&store), ["B", "C", "A"]);
    }

    #[test]
    fn archive_rename_delete() {
        let mut store = store_with(&["A"]);
        let id = store.records()[0].id.clone();

        assert!(store.toggle_archive(&id).unwrap());
        assert!(!store.toggle_archive(&id).unwrap());
        store.rename(&id, " Vault ").unwrap();
        assert_eq!(store.get(&id).unwrap().name, "Vault");
        assert!(store.rename(&id, "").is_err());

        store.delete(&id).unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.delete(&id), Err(WalletError::NotFound(_))));
    }

    #[test]
    fn apply_balances_matches_by_address() {
        let mut store = store_with(&["A", "B"]);
        let address = store.records()[1].address.clone();
        let updates = vec![
            BalanceUpdate {
                address: address.clone(),
                balance: 1.25,
                holdings: 3,
            },
            BalanceUpdate {
                address: "unknown".into(),
                balance: 9.0,
                holdings: 0,
            },
        ];

        assert_eq!(store.apply_balances(&updates), 1);
        let wallet = store.find_by_address(&address).unwrap();
        assert_eq!((wallet.balance, wallet.holdings), (1.25, 3));
        assert_eq!(store.apply_balances(&updates), 0);
    }
}
