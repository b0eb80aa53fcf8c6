use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum WalletError {
    // Cryptographic errors
    CryptoError(String),
    InvalidKey(String),
    InvalidKeyFormat(String),
    InvalidKeyLength { expected: usize, actual: usize },
    AuthenticationFailed,

    // Network errors
    NetworkError(String),
    InvalidResponse(String),
    ConfirmationTimeout(String),
    TransactionFailed(String),

    // Storage errors
    StorageError(String),
    FileNotFound(String),
    PermissionDenied(String),

    // Validation errors
    ValidationError(String),
    InvalidAddress(String),
    InvalidAmount(String),
    InsufficientBalance(String),
    DuplicateAddress(String),

    // Transfer errors
    QuoteExpiredOrStale(String),
    ShieldLegFailed { wallet: String, cause: String },
    UnshieldLegFailed { destination: String, cause: String },
    InvalidState(String),
    Abandoned,

    // Application errors
    NotFound(String),
    AlreadyExists(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            WalletError::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
            WalletError::InvalidKeyFormat(msg) => write!(
                f,
                "Invalid private key format. Expected base58-encoded key: {}",
                msg
            ),
            WalletError::InvalidKeyLength { expected, actual } => write!(
                f,
                "Invalid key length: expected {} bytes, got {}",
                expected, actual
            ),
            WalletError::AuthenticationFailed => {
                write!(f, "Authentication failed: wrong passphrase or corrupted data")
            }

            WalletError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            WalletError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            WalletError::ConfirmationTimeout(sig) => write!(
                f,
                "Transaction {} was not confirmed in time; check a block explorer",
                sig
            ),
            WalletError::TransactionFailed(msg) => write!(f, "Transaction failed: {}", msg),

            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            WalletError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            WalletError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),

            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            WalletError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            WalletError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),
            WalletError::InsufficientBalance(msg) => write!(f, "Insufficient balance: {}", msg),
            WalletError::DuplicateAddress(address) => {
                write!(f, "Wallet {} has already been imported", address)
            }

            WalletError::QuoteExpiredOrStale(msg) => {
                write!(f, "Quote is expired or stale: {}", msg)
            }
            WalletError::ShieldLegFailed { wallet, cause } => {
                write!(f, "Shielding from {} failed: {}", wallet, cause)
            }
            WalletError::UnshieldLegFailed { destination, cause } => {
                write!(f, "Unshielding to {} failed: {}", destination, cause)
            }
            WalletError::InvalidState(msg) => write!(f, "Invalid transfer state: {}", msg),
            WalletError::Abandoned => write!(f, "Transfer was reset while in flight"),

            WalletError::NotFound(msg) => write!(f, "Not found: {}", msg),
            WalletError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

pub type WalletResult<T> = Result<T, WalletError>;

// Helper macro for easy error creation
#[macro_export]
macro_rules! wallet_error {
    ($variant:ident, $msg:expr) => {
        $crate::errors::WalletError::$variant($msg.to_string())
    };
    ($variant:ident) => {
        $crate::errors::WalletError::$variant
    };
}

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => WalletError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                WalletError::PermissionDenied(error.to_string())
            }
            _ => WalletError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::ValidationError(format!("JSON error: {}", error))
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(error: reqwest::Error) -> Self {
        WalletError::NetworkError(error.to_string())
    }
}
