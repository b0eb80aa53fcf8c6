use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};

use zeroize::Zeroizing;

use crate::account::{access_account, create_account, normalize_passphrase, Profile};
use crate::balance::{BalanceOracle, BalanceUpdate};
use crate::crypto::KdfParameters;
use crate::errors::{WalletError, WalletResult};
use crate::history::{SwapHistoryRecord, SwapLedger};
use crate::keys::decode_address;
use crate::quote::{Destination, QuoteSource};
use crate::storage::{BackupBundle, KeyValueStore, Vault};
use crate::transfer::TransferDesk;
use crate::validation::InputValidator;
use crate::wallet_store::{PublicWallet, WalletRecord, WalletStore};

/// Default duration before an open session automatically locks.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Default)]
struct GuardState {
    failed_attempts: u32,
    next_allowed_attempt: Option<Instant>,
    backoff_exponent: u32,
}

/// Throttles passphrase attempts with exponential backoff and a hard limit.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    state: Arc<RwLock<GuardState>>,
    max_failed_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    max_backoff_exponent: u32,
}

impl AccessGuard {
    pub fn new(max_failed_attempts: u32) -> Self {
        Self::with_backoff(
            max_failed_attempts,
            Duration::from_secs(1),
            Duration::from_secs(32),
        )
    }

    pub fn with_backoff(
        max_failed_attempts: u32,
        backoff_base: Duration,
        backoff_cap: Duration,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(GuardState::default())),
            max_failed_attempts: max_failed_attempts.max(1),
            backoff_base,
            backoff_cap,
            max_backoff_exponent: 8,
        }
    }

    /// Fails while a backoff window is open or the attempt limit is spent.
    pub fn check_allowed(&self) -> WalletResult<()> {
        let state = self.state.read();
        if state.failed_attempts >= self.max_failed_attempts {
            return Err(WalletError::PermissionDenied(
                "Maximum unlock attempts exceeded".to_string(),
            ));
        }

        let now = Instant::now();
        if let Some(until) = state.next_allowed_attempt {
            if now < until {
                let remaining = until.saturating_duration_since(now);
                return Err(WalletError::PermissionDenied(format!(
                    "Unlock temporarily disabled. Retry in {}.{:03} seconds",
                    remaining.as_secs(),
                    remaining.subsec_millis()
                )));
            }
        }
        Ok(())
    }

    /// Record a failed attempt and return remaining attempts.
    pub fn register_failed_attempt(&self) -> WalletResult<u32> {
        let mut state = self.state.write();
        let now = Instant::now();

        state.failed_attempts += 1;
        if state.failed_attempts >= self.max_failed_attempts {
            state.next_allowed_attempt = None;
            state.backoff_exponent = 0;
            log::warn!("Passphrase attempt limit reached");
            return Err(WalletError::PermissionDenied(
                "Maximum unlock attempts exceeded".to_string(),
            ));
        }
        state.backoff_exponent = (state.backoff_exponent + 1).min(self.max_backoff_exponent);
        let multiplier = 1_u32 << state.backoff_exponent.saturating_sub(1);
        let mut delay = if multiplier <= 1 {
            self.backoff_base
        } else {
            self.backoff_base
                .checked_mul(multiplier)
                .unwrap_or(self.backoff_cap)
        };
        if delay > self.backoff_cap {
            delay = self.backoff_cap;
        }
        state.next_allowed_attempt = Some(now + delay);

        Ok(self.max_failed_attempts - state.failed_attempts)
    }

    pub fn register_success(&self) {
        let mut state = self.state.write();
        *state = GuardState::default();
    }

    pub fn remaining_attempts(&self) -> u32 {
        let state = self.state.read();
        self.max_failed_attempts
            .saturating_sub(state.failed_attempts)
    }
}

/// An opened account: its vault, profile, wallets and history.
///
/// Every wallet mutation is written through to the vault before it becomes
/// visible. Operations refuse to run once the auto-lock deadline passes.
#[derive(Debug)]
pub struct Session {
    vault: Arc<Vault>,
    profile: Profile,
    wallets: RwLock<WalletStore>,
    ledger: SwapLedger,
    timeout: Duration,
    expires_at: Mutex<Instant>,
}

impl Session {
    /// Create an account for `passphrase` and open it.
    pub fn create(
        store: Arc<dyn KeyValueStore>,
        passphrase: &str,
        username: &str,
        kdf: &KdfParameters,
        timeout: Duration,
    ) -> WalletResult<Self> {
        let validator = InputValidator::new()?;
        let normalized = normalize_passphrase(passphrase);
        validator.validate_passphrase(secrecy::ExposeSecret::expose_secret(&normalized))?;
        if !username.trim().is_empty() {
            validator.validate_username(username.trim())?;
        }

        let vault = Vault::open(store, &normalized, kdf)?;
        let profile = create_account(&vault, username)?;
        Self::from_parts(vault, profile, timeout)
    }

    /// Open the account behind `passphrase`. Unknown and undecryptable
    /// passphrases both count against `guard`.
    pub fn open(
        store: Arc<dyn KeyValueStore>,
        passphrase: &str,
        kdf: &KdfParameters,
        timeout: Duration,
        guard: &AccessGuard,
    ) -> WalletResult<Self> {
        guard.check_allowed()?;

        let vault = Vault::open(store, &normalize_passphrase(passphrase), kdf)?;
        let failure = match access_account(&vault) {
            Ok(Some(profile)) => {
                guard.register_success();
                log::info!("Opened account {} ({})", profile.username, vault.scope());
                return Self::from_parts(vault, profile, timeout);
            }
            Ok(None) => WalletError::NotFound("No account found for this passphrase".to_string()),
            Err(err) => err,
        };

        let remaining = guard.register_failed_attempt()?;
        log::warn!("Passphrase rejected, {} attempt(s) left", remaining);
        Err(failure)
    }

    /// Import a portable backup under `passphrase` and open it.
    pub fn restore(
        store: Arc<dyn KeyValueStore>,
        passphrase: &str,
        bundle: &BackupBundle,
        kdf: &KdfParameters,
        timeout: Duration,
    ) -> WalletResult<Self> {
        let vault = Vault::open(store, &normalize_passphrase(passphrase), kdf)?;
        let profile = bundle.restore_into(&vault)?;
        log::info!("Restored backup into scope {}", vault.scope());
        Self::from_parts(vault, profile, timeout)
    }

    fn from_parts(vault: Vault, profile: Profile, timeout: Duration) -> WalletResult<Self> {
        let wallets = match vault.load_wallets() {
            Ok(wallets) => WalletStore::new(wallets),
            Err(err) => {
                log::error!("Wallet list in scope {} is unreadable: {}", vault.scope(), err);
                return Err(err);
            }
        };
        let vault = Arc::new(vault);
        Ok(Self {
            ledger: SwapLedger::new(vault.clone()),
            vault,
            profile,
            wallets: RwLock::new(wallets),
            timeout,
            expires_at: Mutex::new(Instant::now() + timeout),
        })
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn ledger(&self) -> WalletResult<&SwapLedger> {
        self.ensure_active()?;
        Ok(&self.ledger)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= *self.expires_at.lock()
    }

    pub fn wallets(&self) -> WalletResult<Vec<PublicWallet>> {
        self.ensure_active()?;
        Ok(self.wallets.read().public_view())
    }

    /// The full secret-bearing wallet set, for transfer execution.
    pub fn wallet_records(&self) -> WalletResult<Vec<WalletRecord>> {
        self.ensure_active()?;
        Ok(self.wallets.read().records().to_vec())
    }

    pub fn create_wallet(&self, name: &str) -> WalletResult<PublicWallet> {
        self.validate_name(name)?;
        let wallet = self.mutate(|store| store.create(name).map(WalletRecord::public))?;
        log::info!("Created wallet {} ({})", wallet.name, wallet.address);
        Ok(wallet)
    }

    pub fn import_wallet(&self, name: &str, base58_secret: &str) -> WalletResult<PublicWallet> {
        self.validate_name(name)?;
        let wallet = self.mutate(|store| {
            store
                .import(name, base58_secret.trim())
                .map(WalletRecord::public)
        })?;
        log::info!("Imported wallet {} ({})", wallet.name, wallet.address);
        Ok(wallet)
    }

    pub fn reveal_secret(&self, wallet_id: &str) -> WalletResult<Zeroizing<String>> {
        self.ensure_active()?;
        self.wallets
            .read()
            .reveal_secret(wallet_id)
            .ok_or_else(|| WalletError::NotFound(format!("Wallet {}", wallet_id)))
    }

    pub fn rename_wallet(&self, wallet_id: &str, name: &str) -> WalletResult<()> {
        self.validate_name(name)?;
        self.mutate(|store| store.rename(wallet_id, name))
    }

    /// Returns the new archived flag.
    pub fn toggle_archive(&self, wallet_id: &str) -> WalletResult<bool> {
        self.mutate(|store| store.toggle_archive(wallet_id))
    }

    pub fn reorder_wallets(&self, dragged_id: &str, target_id: &str) -> WalletResult<bool> {
        self.mutate(|store| Ok(store.reorder(dragged_id, target_id)))
    }

    /// Delete an archived wallet and drop it from any pending transfer.
    pub fn delete_wallet(&self, wallet_id: &str, desk: Option<&TransferDesk>) -> WalletResult<()> {
        let removed = self.mutate(|store| {
            let wallet = store
                .get(wallet_id)
                .ok_or_else(|| WalletError::NotFound(format!("Wallet {}", wallet_id)))?;
            if !wallet.archived {
                return Err(WalletError::PermissionDenied(
                    "Archive the wallet before deleting it".to_string(),
                ));
            }
            store.delete(wallet_id)
        })?;

        if let Some(desk) = desk {
            desk.forget_wallet(wallet_id);
        }
        log::info!("Deleted wallet {} ({})", removed.name, removed.address);
        Ok(())
    }

    pub fn apply_balances(&self, updates: &[BalanceUpdate]) -> WalletResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }
        self.mutate(|store| Ok(store.apply_balances(updates)))
    }

    /// Query fresh balances for every active wallet and persist them.
    pub async fn refresh_balances(&self, oracle: &BalanceOracle) -> WalletResult<Vec<BalanceUpdate>> {
        let wallets = self.wallets()?;
        let updates = oracle.refresh_wallets(&wallets).await;
        self.apply_balances(&updates)?;
        Ok(updates)
    }

    /// Transfer sources for the given wallet ids, in the given order.
    pub fn quote_sources(&self, wallet_ids: &[String]) -> WalletResult<Vec<QuoteSource>> {
        self.ensure_active()?;
        let store = self.wallets.read();
        wallet_ids
            .iter()
            .map(|id| {
                let wallet = store
                    .get(id)
                    .ok_or_else(|| WalletError::NotFound(format!("Wallet {}", id)))?;
                Ok(QuoteSource {
                    id: wallet.id.clone(),
                    name: wallet.name.clone(),
                    address: wallet.address.clone(),
                    balance: wallet.balance,
                })
            })
            .collect()
    }

    /// Destinations with an optional manual address first, then managed wallets.
    pub fn destinations(
        &self,
        manual_address: Option<&str>,
        wallet_ids: &[String],
    ) -> WalletResult<Vec<Destination>> {
        self.ensure_active()?;
        let mut destinations = Vec::with_capacity(wallet_ids.len() + 1);

        if let Some(address) = manual_address.map(str::trim).filter(|a| !a.is_empty()) {
            decode_address(address)?;
            destinations.push(Destination::manual(address));
        }

        let store = self.wallets.read();
        for id in wallet_ids {
            let wallet = store
                .get(id)
                .ok_or_else(|| WalletError::NotFound(format!("Wallet {}", id)))?;
            if destinations.iter().any(|d| d.address == wallet.address) {
                continue;
            }
            destinations.push(Destination {
                address: wallet.address.clone(),
                name: wallet.name.clone(),
                wallet_id: Some(wallet.id.clone()),
            });
        }
        Ok(destinations)
    }

    pub fn history(&self) -> WalletResult<Vec<SwapHistoryRecord>> {
        Ok(self.ledger()?.list())
    }

    pub fn export_history_csv(&self) -> WalletResult<String> {
        Ok(self.ledger()?.export_csv())
    }

    pub fn export_backup(&self) -> WalletResult<BackupBundle> {
        self.ensure_active()?;
        BackupBundle::export(&self.vault)
    }

    fn ensure_active(&self) -> WalletResult<()> {
        let mut expires_at = self.expires_at.lock();
        let now = Instant::now();
        if now >= *expires_at {
            return Err(WalletError::PermissionDenied(
                "Wallet session expired".to_string(),
            ));
        }
        *expires_at = now + self.timeout;
        Ok(())
    }

    fn validate_name(&self, name: &str) -> WalletResult<()> {
        if name.trim().is_empty() {
            return Ok(());
        }
        InputValidator::new()?.validate_wallet_name(name.trim())
    }

    // Apply to a copy, persist, then publish; a failed write changes nothing.
    fn mutate<T>(&self, change: impl FnOnce(&mut WalletStore) -> WalletResult<T>) -> WalletResult<T> {
        self.ensure_active()?;
        let mut current = self.wallets.write();
        let mut next = current.clone();
        let output = change(&mut next)?;
        self.vault.save_wallets(next.records())?;
        *current = next;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Envelope;
    use crate::storage::{MemoryStore, VaultRecord};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    const PHRASE: &str = "legal winner thank year wave sausage worth useful legal winner thank yellow";

    fn store() -> Arc<dyn KeyValueStore> {
        Arc::new(MemoryStore::new())
    }

    fn kdf() -> KdfParameters {
        KdfParameters::low_memory()
    }

    #[test]
    fn create_then_open_round_trip() {
        let store = store();
        let session =
            Session::create(store.clone(), PHRASE, "Mira", &kdf(), DEFAULT_SESSION_TIMEOUT).unwrap();
        let wallet = session.create_wallet("Main").unwrap();

        let guard = AccessGuard::new(5);
        let reopened = Session::open(
            store,
            &PHRASE.to_uppercase(),
            &kdf(),
            DEFAULT_SESSION_TIMEOUT,
            &guard,
        )
        .unwrap();
        assert_eq!(reopened.profile().username, "Mira");
        assert_eq!(reopened.wallets().unwrap(), vec![wallet]);
    }

    #[test]
    fn unknown_passphrase_counts_as_failure() {
        let store = store();
        Session::create(store.clone(), PHRASE, "", &kdf(), DEFAULT_SESSION_TIMEOUT).unwrap();

        let guard = AccessGuard::with_backoff(3, Duration::ZERO, Duration::ZERO);
        let err = Session::open(store, "wrong words", &kdf(), DEFAULT_SESSION_TIMEOUT, &guard)
            .unwrap_err();
        assert!(matches!(err, WalletError::NotFound(_)));
        assert_eq!(guard.remaining_attempts(), 2);
    }

    #[test]
    fn create_rejects_invalid_passphrase() {
        let err = Session::create(store(), "not a mnemonic", "Mira", &kdf(), DEFAULT_SESSION_TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, WalletError::ValidationError(_)));
    }

    #[test]
    fn delete_requires_archive() {
        let session =
            Session::create(store(), PHRASE, "Mira", &kdf(), DEFAULT_SESSION_TIMEOUT).unwrap();
        let wallet = session.create_wallet("Spare").unwrap();

        assert!(matches!(
            session.delete_wallet(&wallet.id, None),
            Err(WalletError::PermissionDenied(_))
        ));
        assert!(session.toggle_archive(&wallet.id).unwrap());
        session.delete_wallet(&wallet.id, None).unwrap();
        assert!(session.wallets().unwrap().is_empty());
    }

    #[test]
    fn failed_mutation_changes_nothing() {
        let session =
            Session::create(store(), PHRASE, "Mira", &kdf(), DEFAULT_SESSION_TIMEOUT).unwrap();
        let wallet = session.create_wallet("Main").unwrap();
        let secret = session.reveal_secret(&wallet.id).unwrap();

        let err = session.import_wallet("Copy", &secret).unwrap_err();
        assert!(matches!(err, WalletError::DuplicateAddress(_)));
        assert_eq!(session.wallets().unwrap().len(), 1);
    }

    #[test]
    fn expired_session_refuses_operations() {
        let session =
            Session::create(store(), PHRASE, "Mira", &kdf(), Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(session.is_expired());
        assert!(matches!(
            session.wallets(),
            Err(WalletError::PermissionDenied(_))
        ));
        assert!(session.create_wallet("Late").is_err());
    }

    #[test]
    fn destinations_put_manual_address_first() {
        let session =
            Session::create(store(), PHRASE, "Mira", &kdf(), DEFAULT_SESSION_TIMEOUT).unwrap();
        let wallet = session.create_wallet("Savings").unwrap();
        let manual = crate::keys::Keypair::generate().unwrap().address();

        let destinations = session
            .destinations(Some(&manual), &[wallet.id.clone()])
            .unwrap();
        assert_eq!(destinations.len(), 2);
        assert_eq!(destinations[0].name, "Manual Address");
        assert!(!destinations[0].is_managed());
        assert_eq!(destinations[1].wallet_id.as_deref(), Some(wallet.id.as_str()));

        assert!(session.destinations(Some("not-an-address"), &[]).is_err());
    }

    #[test]
    fn balances_are_persisted() {
        let store = store();
        let session =
            Session::create(store.clone(), PHRASE, "Mira", &kdf(), DEFAULT_SESSION_TIMEOUT).unwrap();
        let wallet = session.create_wallet("Main").unwrap();
        session
            .apply_balances(&[BalanceUpdate {
                address: wallet.address.clone(),
                balance: 1.25,
                holdings: 3,
            }])
            .unwrap();

        let reopened = Session::open(
            store,
            PHRASE,
            &kdf(),
            DEFAULT_SESSION_TIMEOUT,
            &AccessGuard::new(5),
        )
        .unwrap();
        let wallets = reopened.wallets().unwrap();
        assert_eq!(wallets[0].balance, 1.25);
        assert_eq!(wallets[0].holdings, 3);
    }

    #[test]
    fn unreadable_wallet_list_fails_open_and_is_kept() {
        let store = store();
        let session =
            Session::create(store.clone(), PHRASE, "Mira", &kdf(), DEFAULT_SESSION_TIMEOUT).unwrap();
        session.create_wallet("Main").unwrap();
        drop(session);

        let vault = Vault::open(store.clone(), &normalize_passphrase(PHRASE), &kdf()).unwrap();
        let blob = vault.raw_blob(VaultRecord::Wallets).unwrap().unwrap();
        let mut envelope = Envelope::from_json(&blob).unwrap();
        let mut data = BASE64.decode(&envelope.data).unwrap();
        data[0] ^= 0x01;
        envelope.data = BASE64.encode(&data);
        let corrupted = envelope.to_json().unwrap();
        vault.put_raw_blob(VaultRecord::Wallets, &corrupted).unwrap();

        let guard = AccessGuard::new(5);
        let err = Session::open(store, PHRASE, &kdf(), DEFAULT_SESSION_TIMEOUT, &guard).unwrap_err();
        assert_eq!(err, WalletError::AuthenticationFailed);
        assert_eq!(guard.remaining_attempts(), 5);
        assert_eq!(
            vault.raw_blob(VaultRecord::Wallets).unwrap().as_deref(),
            Some(corrupted.as_str())
        );
    }

    #[test]
    fn failed_attempts_limit() {
        let guard = AccessGuard::with_backoff(2, Duration::from_millis(10), Duration::from_millis(80));
        assert_eq!(guard.remaining_attempts(), 2);
        assert_eq!(guard.register_failed_attempt().unwrap(), 1);
        std::thread::sleep(Duration::from_millis(15));
        let err = guard.register_failed_attempt().unwrap_err();
        assert!(matches!(err, WalletError::PermissionDenied(_)));
        assert_eq!(guard.remaining_attempts(), 0);
        assert!(guard.check_allowed().is_err());
    }

    #[test]
    fn backoff_blocks_until_window_passes() {
        let guard =
            AccessGuard::with_backoff(5, Duration::from_millis(10), Duration::from_millis(160));
        assert_eq!(guard.register_failed_attempt().unwrap(), 4);
        let err = guard.check_allowed().unwrap_err();
        assert!(matches!(err, WalletError::PermissionDenied(msg) if msg.contains("Retry")));
        std::thread::sleep(Duration::from_millis(15));
        guard.check_allowed().unwrap();
        guard.register_success();
        assert_eq!(guard.remaining_attempts(), 5);
    }
}
