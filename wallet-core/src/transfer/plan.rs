use serde::Serialize;

use crate::errors::{WalletError, WalletResult};
use crate::quote::{floor6, FeePolicy, QuoteRecord, QuoteRequest};
use crate::token::{sol_to_lamports, Token};

const MICRO: f64 = 1_000_000.0;

/// One deposit into the pool from a source wallet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShieldLeg {
    pub wallet_id: String,
    pub wallet_name: String,
    pub address: String,
    /// Share of the transfer assigned to this wallet.
    pub requested: f64,
    /// What will actually be deposited after the gas reserve cap.
    pub amount: f64,
}

impl ShieldLeg {
    pub fn lamports(&self) -> u64 {
        sol_to_lamports(self.amount)
    }

    pub fn is_capped(&self) -> bool {
        self.amount < self.requested
    }
}

/// One withdrawal from the pool to a destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnshieldLeg {
    pub address: String,
    pub name: String,
    pub wallet_id: Option<String>,
    /// Native amount withdrawn for this destination.
    pub native_amount: f64,
    /// Quoted amount the destination receives, in the target token.
    pub target_amount: f64,
}

impl UnshieldLeg {
    pub fn lamports(&self) -> u64 {
        sol_to_lamports(self.native_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPlan {
    pub token: Token,
    pub shields: Vec<ShieldLeg>,
    pub unshields: Vec<UnshieldLeg>,
}

impl TransferPlan {
    /// The first source wallet signs every withdrawal.
    pub fn primary(&self) -> Option<&ShieldLeg> {
        self.shields.first()
    }
}

/// Split `amount` into `parts` shares of whole micro-units. The last share
/// absorbs the remainder so the shares always sum to `amount` at 6 decimals.
pub fn split_evenly(amount: f64, parts: usize) -> Vec<f64> {
    if parts == 0 {
        return Vec::new();
    }
    let total = (amount * MICRO).round().max(0.0) as u64;
    let share = total / parts as u64;
    let last = total - share * (parts as u64 - 1);

    let mut shares = vec![share as f64 / MICRO; parts - 1];
    shares.push(last as f64 / MICRO);
    shares
}

/// Largest deposit that leaves `reserve` in a wallet holding `balance`.
pub fn cap_to_balance(requested: f64, balance: f64, reserve: f64) -> f64 {
    let available = floor6((balance - reserve).max(0.0));
    requested.min(available)
}

/// Turn a confirmed quote into concrete legs. Source balances in `request`
/// must be current, since they decide the cap on each deposit.
pub fn build_plan(
    request: &QuoteRequest,
    quote: &QuoteRecord,
    policy: &FeePolicy,
) -> WalletResult<TransferPlan> {
    if request.sources.is_empty() || request.destinations.is_empty() {
        return Err(WalletError::InvalidState(
            "A transfer needs at least one source and one destination".to_string(),
        ));
    }

    let shares = split_evenly(quote.amount_in, request.sources.len());
    let shields = request
        .sources
        .iter()
        .zip(shares)
        .map(|(source, requested)| {
            let amount = cap_to_balance(requested, source.balance, policy.shield_gas_reserve);
            if amount < requested {
                log::warn!(
                    "Capping shield from {} to {} SOL (requested {}, balance {})",
                    source.name,
                    amount,
                    requested,
                    source.balance
                );
            }
            ShieldLeg {
                wallet_id: source.id.clone(),
                wallet_name: source.name.clone(),
                address: source.address.clone(),
                requested,
                amount,
            }
        })
        .collect();

    let unshields = request
        .destinations
        .iter()
        .map(|dest| UnshieldLeg {
            address: dest.address.clone(),
            name: dest.name.clone(),
            wallet_id: dest.wallet_id.clone(),
            native_amount: quote.per_recipient_native,
            target_amount: quote.per_recipient_amount,
        })
        .collect();

    Ok(TransferPlan {
        token: quote.token,
        shields,
        unshields,
    })
}
