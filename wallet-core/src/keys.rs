use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::errors::{WalletError, WalletResult};

pub const SECRET_KEY_LEN: usize = 64;
pub const PUBLIC_KEY_LEN: usize = 32;
const SEED_LEN: usize = 32;

/// 64-byte keypair encoding: 32-byte seed followed by the 32-byte public key.
///
/// Serialized as an array of byte numbers. Never printed.
#[derive(Clone)]
pub struct SecretKeyBytes(Zeroizing<[u8; SECRET_KEY_LEN]>);

impl SecretKeyBytes {
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.0
    }
}

impl PartialEq for SecretKeyBytes {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice() == other.0.as_slice()
    }
}

impl Eq for SecretKeyBytes {}

impl std::fmt::Debug for SecretKeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKeyBytes(<redacted>)")
    }
}

impl Serialize for SecretKeyBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for SecretKeyBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Zeroizing::new(Vec::<u8>::deserialize(deserializer)?);
        let array: [u8; SECRET_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            D::Error::custom(format!(
                "expected {} secret key bytes, got {}",
                SECRET_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(Zeroizing::new(array)))
    }
}

/// An ed25519 signing keypair addressed by its base58 public key.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Fresh keypair from OS entropy.
    pub fn generate() -> WalletResult<Self> {
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        OsRng
            .try_fill_bytes(seed.as_mut())
            .map_err(|e| WalletError::CryptoError(format!("Failed to gather entropy: {e}")))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    /// Parse a base58-encoded 64-byte keypair as exported by common wallets.
    pub fn from_base58(encoded: &str) -> WalletResult<Self> {
        let decoded = Zeroizing::new(
            bs58::decode(encoded.trim())
                .into_vec()
                .map_err(|e| WalletError::InvalidKeyFormat(e.to_string()))?,
        );

        if decoded.len() != SECRET_KEY_LEN {
            return Err(WalletError::InvalidKeyLength {
                expected: SECRET_KEY_LEN,
                actual: decoded.len(),
            });
        }

        let mut bytes = Zeroizing::new([0u8; SECRET_KEY_LEN]);
        bytes.copy_from_slice(&decoded);
        Self::from_secret_bytes(&SecretKeyBytes(bytes))
    }

    pub fn from_secret_bytes(secret: &SecretKeyBytes) -> WalletResult<Self> {
        let signing = SigningKey::from_keypair_bytes(secret.as_bytes()).map_err(|_| {
            WalletError::InvalidKey("Public key does not match the secret seed".to_string())
        })?;
        Ok(Self { signing })
    }

    pub fn pubkey_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn address(&self) -> String {
        bs58::encode(self.pubkey_bytes()).into_string()
    }

    pub fn secret_bytes(&self) -> SecretKeyBytes {
        SecretKeyBytes(Zeroizing::new(self.signing.to_keypair_bytes()))
    }

    pub fn to_base58(&self) -> Zeroizing<String> {
        let bytes = Zeroizing::new(self.signing.to_keypair_bytes());
        Zeroizing::new(bs58::encode(bytes.as_slice()).into_string())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Decode a base58 address into raw public key bytes.
pub fn decode_address(address: &str) -> WalletResult<[u8; PUBLIC_KEY_LEN]> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|e| WalletError::InvalidAddress(format!("{address}: {e}")))?;
    decoded.as_slice().try_into().map_err(|_| {
        WalletError::InvalidAddress(format!(
            "{address}: expected {} bytes, got {}",
            PUBLIC_KEY_LEN,
            decoded.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    #[test]
    fn generated_keys_are_distinct_and_addressable() {
        let a = Keypair::generate().unwrap();
        let b = Keypair::generate().unwrap();
        assert_ne!(a.address(), b.address());
        assert_eq!(decode_address(&a.address()).unwrap(), a.pubkey_bytes());
    }

    #[test]
    fn base58_export_reimports_to_same_address() {
        let original = Keypair::generate().unwrap();
        let exported = original.to_base58();
        let imported = Keypair::from_base58(&exported).unwrap();
        assert_eq!(imported.address(), original.address());
        assert_eq!(imported.secret_bytes(), original.secret_bytes());
    }

    #[test]
    fn import_rejects_non_base58() {
        let err = Keypair::from_base58("not-base58-0OIl").unwrap_err();
        assert!(matches!(err, WalletError::InvalidKeyFormat(_)));
    }

    #[test]
    fn import_rejects_wrong_length() {
        let short = bs58::encode([7u8; 32]).into_string();
        let err = Keypair::from_base58(&short).unwrap_err();
        assert_eq!(
            err,
            WalletError::InvalidKeyLength {
                expected: 64,
                actual: 32
            }
        );
    }

    #[test]
    fn import_rejects_mismatched_public_half() {
        let keypair = Keypair::generate().unwrap();
        let mut bytes = *keypair.secret_bytes().as_bytes();
        bytes[63] ^= 0x01;
        let err = Keypair::from_base58(&bs58::encode(bytes).into_string()).unwrap_err();
        assert!(matches!(err, WalletError::InvalidKey(_)));
    }

    #[test]
    fn signatures_verify_against_address() {
        let keypair = Keypair::generate().unwrap();
        let signature = Signature::from_bytes(&keypair.sign(b"message"));
        let verifying = VerifyingKey::from_bytes(&keypair.pubkey_bytes()).unwrap();
        verifying.verify(b"message", &signature).unwrap();
    }

    #[test]
    fn secret_bytes_serialize_as_number_array_and_stay_redacted() {
        let keypair = Keypair::generate().unwrap();
        let secret = keypair.secret_bytes();
        let json = serde_json::to_value(&secret).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 64);
        assert_eq!(format!("{:?}", secret), "SecretKeyBytes(<redacted>)");

        let back: SecretKeyBytes = serde_json::from_value(json).unwrap();
        assert_eq!(back, secret);
        assert!(serde_json::from_str::<SecretKeyBytes>("[1,2,3]").is_err());
    }
}
