use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::WalletError;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Nearest lamport; negative and non-finite amounts map to zero.
pub fn sol_to_lamports(sol: f64) -> u64 {
    if !sol.is_finite() || sol <= 0.0 {
        return 0;
    }
    (sol * LAMPORTS_PER_SOL as f64).round() as u64
}

/// Assets a transfer can deliver. `Sol` is the native asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Token {
    Sol,
    Usdc,
    Usdt,
    Zec,
    Ore,
    Store,
}

impl Token {
    pub const ALL: [Token; 6] = [
        Token::Sol,
        Token::Usdc,
        Token::Usdt,
        Token::Zec,
        Token::Ore,
        Token::Store,
    ];

    pub fn is_native(&self) -> bool {
        matches!(self, Token::Sol)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Token::Sol => "SOL",
            Token::Usdc => "USDC",
            Token::Usdt => "USDT",
            Token::Zec => "ZEC",
            Token::Ore => "ORE",
            Token::Store => "STORE",
        }
    }

    /// Mainnet mint address. Native SOL uses the wrapped-SOL mint.
    pub fn mint(&self) -> &'static str {
        match self {
            Token::Sol => "So11111111111111111111111111111111111111112",
            Token::Usdc => "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            Token::Usdt => "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB",
            Token::Zec => "A7bdiYdS5GjqGFtxf17ppRHtDKPkkRqbKtR27dxvQXaS",
            Token::Ore => "oreoU2P8bN6jkk3jbaiVxYnG1dCXcYxwhwyK9jSybcp",
            Token::Store => "sTorERYB6xAZ1SSbwpK3zoK2EEwbBrc7TZAzg1uCGiH",
        }
    }

    pub fn decimals(&self) -> u32 {
        match self {
            Token::Sol => 9,
            Token::Usdc | Token::Usdt => 6,
            Token::Zec => 8,
            Token::Ore | Token::Store => 11,
        }
    }

    /// Identifier on the price feed.
    pub fn price_id(&self) -> &'static str {
        match self {
            Token::Sol => "solana",
            Token::Usdc => "usd-coin",
            Token::Usdt => "tether",
            Token::Zec => "zcash",
            Token::Ore => "ore",
            Token::Store => "store-protocol",
        }
    }

    pub fn from_price_id(id: &str) -> Option<Token> {
        Token::ALL.into_iter().find(|t| t.price_id() == id)
    }

    /// Human amount to smallest units, rounded down.
    pub fn to_raw_amount(&self, amount: f64) -> u64 {
        if !amount.is_finite() || amount <= 0.0 {
            return 0;
        }
        (amount * 10f64.powi(self.decimals() as i32)).floor() as u64
    }

    pub fn to_human_amount(&self, raw: u64) -> f64 {
        raw as f64 / 10f64.powi(self.decimals() as i32)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Token {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Token::ALL
            .into_iter()
            .find(|t| t.symbol().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| WalletError::ValidationError(format!("Unsupported token: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lamport_conversions() {
        assert_eq!(sol_to_lamports(1.5), 1_500_000_000);
        assert_eq!(sol_to_lamports(0.0000000004), 0);
        assert_eq!(sol_to_lamports(-1.0), 0);
        assert_eq!(sol_to_lamports(f64::NAN), 0);
        assert_eq!(lamports_to_sol(2_500_000), 0.0025);
    }

    #[test]
    fn parses_symbols_case_insensitively() {
        assert_eq!("usdc".parse::<Token>().unwrap(), Token::Usdc);
        assert_eq!(" STORE ".parse::<Token>().unwrap(), Token::Store);
        assert!("doge".parse::<Token>().is_err());
    }

    #[test]
    fn raw_amounts_respect_decimals() {
        assert_eq!(Token::Usdc.to_raw_amount(1.2345678), 1_234_567);
        assert_eq!(Token::Sol.to_raw_amount(0.5), 500_000_000);
        assert_eq!(Token::Ore.to_human_amount(100_000_000_000), 1.0);
        assert_eq!(Token::Zec.to_raw_amount(-3.0), 0);
    }

    #[test]
    fn price_ids_are_unique_and_reversible() {
        for token in Token::ALL {
            assert_eq!(Token::from_price_id(token.price_id()), Some(token));
        }
        assert!(Token::Sol.is_native());
        assert!(!Token::Usdt.is_native());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Token::Zec).unwrap(), "\"zec\"");
    }
}
