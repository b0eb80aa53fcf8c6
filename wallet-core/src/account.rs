use chrono::Utc;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::storage::{Vault, VaultRecord};

pub const DEFAULT_USERNAME: &str = "Anon";

/// Decrypted account profile. Reading it back successfully is what proves a
/// passphrase is correct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub username: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    #[serde(default = "empty_settings")]
    pub settings: serde_json::Value,
}

fn empty_settings() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl Profile {
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        let username = if username.trim().is_empty() {
            DEFAULT_USERNAME.to_string()
        } else {
            username.trim().to_string()
        };

        Self {
            username,
            created_at: Utc::now().timestamp_millis(),
            settings: empty_settings(),
        }
    }
}

/// Passphrases are compared case-insensitively with collapsed whitespace.
pub fn normalize_passphrase(raw: &str) -> SecretString {
    let normalized = raw
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    SecretString::from(normalized)
}

pub fn create_account(vault: &Vault, username: &str) -> WalletResult<Profile> {
    if vault.exists(VaultRecord::Profile)? {
        return Err(WalletError::AlreadyExists(
            "An account already exists for this passphrase".to_string(),
        ));
    }

    let profile = Profile::new(username);
    vault.store(VaultRecord::Profile, &profile)?;
    log::info!("Created account profile in scope {}", vault.scope());
    Ok(profile)
}

/// `Ok(None)` when no account exists; `AuthenticationFailed` when one exists
/// but cannot be decrypted.
pub fn access_account(vault: &Vault) -> WalletResult<Option<Profile>> {
    vault.load_strict(VaultRecord::Profile)
}
