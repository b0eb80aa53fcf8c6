use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::WalletError;
use crate::prices::PriceTable;
use crate::token::Token;

/// Decimal places reported on quotes and leg amounts.
pub const QUOTE_PRECISION: i32 = 6;

const MICRO: f64 = 1_000_000.0;

pub fn round6(value: f64) -> f64 {
    (value * MICRO).round() / MICRO
}

/// Round down to 6 decimals, tolerating binary representation error.
pub fn floor6(value: f64) -> f64 {
    ((value * MICRO) + 1e-6).floor() / MICRO
}

/// Relayer fees and gas reserves applied when quoting and executing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeePolicy {
    /// Share of each withdrawn amount taken by the relayer.
    pub relayer_fee_rate: f64,
    /// Flat relayer fee per withdrawal, in SOL.
    pub fixed_relayer_fee: f64,
    /// Native balance each source keeps back on a native transfer.
    pub native_reserve_per_wallet: f64,
    /// Native balance each source needs for gas on an alternate-token transfer.
    pub gas_reserve_per_wallet: f64,
    /// Left in each source wallet when shielding.
    pub shield_gas_reserve: f64,
    /// Kept back from the withdrawn amount to pay for the swap transaction.
    pub swap_gas_reserve: f64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            relayer_fee_rate: 0.02,
            fixed_relayer_fee: 0.0035,
            native_reserve_per_wallet: 0.01,
            gas_reserve_per_wallet: 0.005,
            shield_gas_reserve: 0.005,
            swap_gas_reserve: 0.005,
        }
    }
}

impl FeePolicy {
    pub fn fee_per_leg(&self, amount: f64, legs: usize) -> f64 {
        (amount / legs as f64) * self.relayer_fee_rate + self.fixed_relayer_fee
    }

    pub fn total_fee(&self, amount: f64, legs: usize) -> f64 {
        self.fee_per_leg(amount, legs) * legs as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSource {
    pub id: String,
    pub name: String,
    pub address: String,
    pub balance: f64,
}

/// A transfer recipient. `wallet_id` is set when the address belongs to a
/// managed wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub address: String,
    pub name: String,
    #[serde(default)]
    pub wallet_id: Option<String>,
}

impl Destination {
    pub fn manual(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: "Manual Address".to_string(),
            wallet_id: None,
        }
    }

    pub fn is_managed(&self) -> bool {
        self.wallet_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub amount: f64,
    pub sources: Vec<QuoteSource>,
    pub destinations: Vec<Destination>,
    pub target: Token,
}

impl QuoteRequest {
    pub fn fingerprint(&self) -> String {
        fingerprint(
            self.amount,
            self.sources.iter().map(|s| s.id.as_str()),
            self.destinations.iter().map(|d| d.address.as_str()),
            self.target,
        )
    }

    fn source_balance(&self) -> f64 {
        self.sources.iter().map(|s| s.balance).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecord {
    pub amount_in: f64,
    pub estimated_fee: f64,
    pub amount_out: f64,
    pub per_recipient_amount: f64,
    pub per_recipient_native: f64,
    pub sources: usize,
    pub recipients: usize,
    pub token: Token,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl QuoteRecord {
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age > ttl,
            Err(_) => false,
        }
    }

    pub fn matches(&self, request: &QuoteRequest) -> bool {
        self.fingerprint == request.fingerprint()
    }
}

/// Why a quote could not be produced.
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteRejection {
    InvalidAmount,
    NoDestinations,
    NoSources,
    InsufficientBalance { available: f64, required: f64 },
    InsufficientGas { required: f64 },
    AmountTooSmall { fee: f64 },
    TransferInProgress,
}

impl fmt::Display for QuoteRejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QuoteRejection::InvalidAmount => write!(f, "Enter a valid amount"),
            QuoteRejection::NoDestinations => write!(f, "Select at least one destination"),
            QuoteRejection::NoSources => write!(f, "Select at least one source wallet"),
            QuoteRejection::InsufficientBalance {
                available,
                required,
            } => write!(
                f,
                "Insufficient balance. Available: {:.4} SOL (after fees), need {:.4} SOL",
                available, required
            ),
            QuoteRejection::InsufficientGas { required } => write!(
                f,
                "Insufficient SOL for gas fees. Need at least {:.4} SOL across source wallets",
                required
            ),
            QuoteRejection::AmountTooSmall { fee } => write!(
                f,
                "Amount too small to cover relayer fees ({:.4} SOL)",
                fee
            ),
            QuoteRejection::TransferInProgress => {
                write!(f, "A transfer is in progress; reset before quoting again")
            }
        }
    }
}

impl std::error::Error for QuoteRejection {}

impl From<QuoteRejection> for WalletError {
    fn from(rejection: QuoteRejection) -> Self {
        match rejection {
            QuoteRejection::InsufficientBalance { .. } | QuoteRejection::InsufficientGas { .. } => {
                WalletError::InsufficientBalance(rejection.to_string())
            }
            QuoteRejection::TransferInProgress => WalletError::InvalidState(rejection.to_string()),
            _ => WalletError::ValidationError(rejection.to_string()),
        }
    }
}

/// Digest of the inputs a quote was computed from.
pub fn fingerprint<'a>(
    amount: f64,
    source_ids: impl IntoIterator<Item = &'a str>,
    destination_addresses: impl IntoIterator<Item = &'a str>,
    token: Token,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"whispr-quote-v1");
    hasher.update(&amount.to_bits().to_le_bytes());

    for (tag, items) in [
        (b's', source_ids.into_iter().collect::<Vec<_>>()),
        (b'd', destination_addresses.into_iter().collect::<Vec<_>>()),
    ] {
        hasher.update(&[tag]);
        hasher.update(&(items.len() as u64).to_le_bytes());
        for item in items {
            hasher.update(&(item.len() as u64).to_le_bytes());
            hasher.update(item.as_bytes());
        }
    }

    hasher.update(token.symbol().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Price a transfer. Pure apart from the creation timestamp.
pub fn estimate(
    request: &QuoteRequest,
    prices: Option<&PriceTable>,
    policy: &FeePolicy,
) -> Result<QuoteRecord, QuoteRejection> {
    let amount = request.amount;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(QuoteRejection::InvalidAmount);
    }
    if request.destinations.is_empty() {
        return Err(QuoteRejection::NoDestinations);
    }
    if request.sources.is_empty() {
        return Err(QuoteRejection::NoSources);
    }

    let source_count = request.sources.len() as f64;
    let balance = request.source_balance();
    if request.target.is_native() {
        let available = balance - policy.native_reserve_per_wallet * source_count;
        if amount > available {
            return Err(QuoteRejection::InsufficientBalance {
                available: available.max(0.0),
                required: amount,
            });
        }
    } else {
        let required = policy.gas_reserve_per_wallet * source_count;
        if balance < required {
            return Err(QuoteRejection::InsufficientGas { required });
        }
    }

    let recipients = request.destinations.len();
    let total_fee = policy.total_fee(amount, recipients);
    let post_fee = amount - total_fee;
    if post_fee <= 0.0 {
        return Err(QuoteRejection::AmountTooSmall { fee: total_fee });
    }

    let amount_out = match convert(post_fee, request.target, prices) {
        Some(converted) => converted,
        None => post_fee,
    };

    let quote = QuoteRecord {
        amount_in: amount,
        estimated_fee: round6(total_fee),
        amount_out: round6(amount_out),
        per_recipient_amount: round6(amount_out / recipients as f64),
        per_recipient_native: round6(post_fee / recipients as f64),
        sources: request.sources.len(),
        recipients,
        token: request.target,
        fingerprint: request.fingerprint(),
        created_at: Utc::now(),
    };

    log::debug!(
        "Quoted {} SOL -> {} {} across {} recipient(s), fee {}",
        quote.amount_in,
        quote.amount_out,
        quote.token,
        quote.recipients,
        quote.estimated_fee
    );
    Ok(quote)
}

fn convert(native_amount: f64, target: Token, prices: Option<&PriceTable>) -> Option<f64> {
    if target.is_native() {
        return None;
    }
    let prices = prices?;
    let native_usd = prices.usd(Token::Sol)?;
    let target_usd = prices.usd(target)?;
    Some(native_amount * native_usd / target_usd)
}
