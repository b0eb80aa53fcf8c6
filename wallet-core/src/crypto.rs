/// Passphrase-derived encryption for everything the wallet persists.
///
/// A single Argon2id key is derived per opened vault from the passphrase and a
/// fixed application salt, then used for AES-256-GCM with a fresh nonce on every
/// write. The passphrase is a 12-word BIP39 phrase, so the fixed salt does not
/// reduce its entropy below 128 bits.
use crate::errors::{WalletError, WalletResult};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

const APP_SALT: &[u8] = b"WHISPR_EXCHANGE_SALT_v1";
const ENVELOPE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const SCOPE_HEX_LEN: usize = 32;
const PASSPHRASE_WORDS: usize = 12;

/// Argon2id cost parameters. The salt is fixed application-wide.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParameters {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParameters {
    fn default() -> Self {
        Self {
            m_cost_kib: 19 * 1024, // 19 MiB
            t_cost: 2,
            p_cost: 1,
        }
    }
}

impl KdfParameters {
    /// Minimal-cost parameters for constrained devices and test suites.
    pub fn low_memory() -> Self {
        Self {
            m_cost_kib: 64,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

/// Serialized ciphertext as it is written to the key-value store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    #[serde(default = "default_envelope_version")]
    pub v: u8,
    pub iv: String,
    pub data: String,
}

fn default_envelope_version() -> u8 {
    ENVELOPE_VERSION
}

impl Envelope {
    pub fn to_json(&self) -> WalletResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> WalletResult<Self> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        if envelope.v != ENVELOPE_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported envelope version: {}",
                envelope.v
            )));
        }
        Ok(envelope)
    }
}

/// Symmetric cipher bound to one passphrase.
pub struct VaultCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl VaultCipher {
    pub fn derive(passphrase: &SecretString, params: &KdfParameters) -> WalletResult<Self> {
        let argon_params = Params::new(
            params.m_cost_kib,
            params.t_cost,
            params.p_cost,
            Some(KEY_LEN),
        )
        .map_err(|e| WalletError::CryptoError(format!("Invalid Argon2 params: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(
                passphrase.expose_secret().as_bytes(),
                APP_SALT,
                key.as_mut(),
            )
            .map_err(|e| WalletError::CryptoError(format!("KDF failed: {e}")))?;
        Ok(Self { key })
    }

    pub fn seal(&self, plaintext: &[u8]) -> WalletResult<Envelope> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| WalletError::CryptoError(format!("Failed to generate nonce: {e}")))?;

        let key = self.aead_key()?;
        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;

        Ok(Envelope {
            v: ENVELOPE_VERSION,
            iv: BASE64.encode(nonce_bytes),
            data: BASE64.encode(&in_out),
        })
    }

    pub fn open(&self, envelope: &Envelope) -> WalletResult<Zeroizing<Vec<u8>>> {
        let iv = BASE64
            .decode(&envelope.iv)
            .map_err(|e| WalletError::CryptoError(format!("Invalid nonce encoding: {e}")))?;
        let nonce_bytes: [u8; NONCE_LEN] = iv
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::CryptoError("Invalid nonce length".to_string()))?;
        let ciphertext = BASE64
            .decode(&envelope.data)
            .map_err(|e| WalletError::CryptoError(format!("Invalid ciphertext encoding: {e}")))?;

        if ciphertext.len() < aead::AES_256_GCM.tag_len() {
            return Err(WalletError::CryptoError(
                "Ciphertext shorter than authentication tag".to_string(),
            ));
        }

        let key = self.aead_key()?;
        let mut in_out = Zeroizing::new(ciphertext);
        let plaintext_len = key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| WalletError::CryptoError("Decryption failure".to_string()))?
            .len();
        in_out.truncate(plaintext_len);
        Ok(in_out)
    }

    fn aead_key(&self) -> WalletResult<LessSafeKey> {
        let unbound_key = UnboundKey::new(&aead::AES_256_GCM, self.key.as_ref())
            .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
        Ok(LessSafeKey::new(unbound_key))
    }
}

impl std::fmt::Debug for VaultCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultCipher")
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Storage scope for a passphrase: the first 32 hex chars of its SHA-256.
pub fn passphrase_scope(passphrase: &SecretString) -> String {
    let digest = Sha256::digest(passphrase.expose_secret().as_bytes());
    let mut scope = hex::encode(digest);
    scope.truncate(SCOPE_HEX_LEN);
    scope
}

/// Generate a fresh 12-word BIP39 passphrase.
pub fn generate_passphrase() -> WalletResult<SecretString> {
    use bip39::Mnemonic;

    let mut entropy = Zeroizing::new([0u8; 16]);
    OsRng
        .try_fill_bytes(entropy.as_mut())
        .map_err(|e| WalletError::CryptoError(format!("Failed to generate entropy: {}", e)))?;

    let mnemonic = Mnemonic::from_entropy(entropy.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Failed to create mnemonic: {}", e)))?;

    let phrase = mnemonic.to_string();
    debug_assert_eq!(phrase.split_whitespace().count(), PASSPHRASE_WORDS);
    Ok(SecretString::from(phrase))
}
