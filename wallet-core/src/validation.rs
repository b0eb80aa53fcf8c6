use crate::errors::{WalletError, WalletResult};
use regex::Regex;

const PUBKEY_LEN: usize = 32;
const PASSPHRASE_WORDS: usize = 12;

/// Input validation utilities for the wallet
pub struct InputValidator {
    // Compiled regex patterns for performance
    address_pattern: Regex,
    amount_pattern: Regex,
    name_pattern: Regex,
    passphrase_pattern: Regex,

    // Blacklisted patterns for security
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| WalletError::ValidationError(format!("Invalid regex {pattern}: {e}")))
        };

        let malicious_patterns = [
            r"<script",
            r"javascript:",
            r"data:text/html",
            r"vbscript:",
            r"onload=",
            r"onerror=",
        ]
        .iter()
        .map(|pattern| compile(pattern))
        .collect::<WalletResult<Vec<_>>>()?;

        Ok(InputValidator {
            address_pattern: compile(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$")?,
            amount_pattern: compile(r"^\d+(\.\d{1,9})?$")?,
            name_pattern: compile(r"^[\p{L}\p{N}\s\-_.']+$")?,
            passphrase_pattern: compile(r"^[a-z]+( [a-z]+)*$")?,
            malicious_patterns,
        })
    }

    /// Validate a base58 account address (32-byte public key).
    pub fn validate_address(&self, address: &str) -> WalletResult<()> {
        self.check_basic_security(address)?;

        if address.is_empty() {
            return Err(WalletError::ValidationError(
                "Address cannot be empty".to_string(),
            ));
        }

        if !self.address_pattern.is_match(address) {
            return Err(WalletError::InvalidAddress(
                "Address format is invalid".to_string(),
            ));
        }

        let decoded = bs58::decode(address)
            .into_vec()
            .map_err(|_| WalletError::InvalidAddress("Address is not valid base58".to_string()))?;
        if decoded.len() != PUBKEY_LEN {
            return Err(WalletError::InvalidAddress(format!(
                "Address decodes to {} bytes, expected {}",
                decoded.len(),
                PUBKEY_LEN
            )));
        }

        Ok(())
    }

    /// Validate an amount string and return it parsed.
    pub fn validate_amount(&self, amount: &str) -> WalletResult<f64> {
        self.check_basic_security(amount)?;

        let amount = amount.trim();
        if amount.is_empty() {
            return Err(WalletError::ValidationError(
                "Amount cannot be empty".to_string(),
            ));
        }

        if !self.amount_pattern.is_match(amount) {
            return Err(WalletError::InvalidAmount(
                "Amount format is invalid".to_string(),
            ));
        }

        let parsed: f64 = amount
            .parse()
            .map_err(|_| WalletError::InvalidAmount("Invalid number format".to_string()))?;

        if parsed <= 0.0 {
            return Err(WalletError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        if parsed > 1_000_000_000.0 {
            return Err(WalletError::InvalidAmount("Amount too large".to_string()));
        }

        Ok(parsed)
    }

    /// Validate wallet name/label
    pub fn validate_wallet_name(&self, name: &str) -> WalletResult<()> {
        self.check_basic_security(name)?;

        if name.trim().is_empty() {
            return Err(WalletError::ValidationError(
                "Wallet name cannot be empty".to_string(),
            ));
        }

        if name.chars().count() > 50 {
            return Err(WalletError::ValidationError(
                "Wallet name too long".to_string(),
            ));
        }

        if !self.name_pattern.is_match(name) {
            return Err(WalletError::ValidationError(
                "Wallet name contains invalid characters".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_username(&self, username: &str) -> WalletResult<()> {
        self.check_basic_security(username)?;

        let length = username.trim().chars().count();
        if !(2..=20).contains(&length) {
            return Err(WalletError::ValidationError(
                "Username must be 2-20 characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate a normalized 12-word BIP39 passphrase, including its checksum.
    pub fn validate_passphrase(&self, passphrase: &str) -> WalletResult<()> {
        if !self.passphrase_pattern.is_match(passphrase) {
            return Err(WalletError::ValidationError(
                "Passphrase must be lowercase words separated by single spaces".to_string(),
            ));
        }

        let words = passphrase.split(' ').count();
        if words != PASSPHRASE_WORDS {
            return Err(WalletError::ValidationError(format!(
                "Passphrase must have {} words, got {}",
                PASSPHRASE_WORDS, words
            )));
        }

        bip39::Mnemonic::parse_normalized(passphrase)
            .map_err(|e| WalletError::ValidationError(format!("Invalid passphrase: {}", e)))?;
        Ok(())
    }

    /// Sanitize input string by removing/escaping dangerous characters
    pub fn sanitize_input(&self, input: &str) -> String {
        input
            .chars()
            .filter(|c| c.is_alphanumeric() || " .-_@'".contains(*c))
            .take(1000) // Limit length
            .collect()
    }

    /// Check for basic security issues in any input
    fn check_basic_security(&self, input: &str) -> WalletResult<()> {
        if input.len() > 1000 {
            return Err(WalletError::ValidationError("Input too long".to_string()));
        }

        let lowered = input.to_lowercase();
        if self
            .malicious_patterns
            .iter()
            .any(|pattern| pattern.is_match(&lowered))
        {
            return Err(WalletError::ValidationError(
                "Input contains potentially malicious content".to_string(),
            ));
        }

        Ok(())
    }
}
