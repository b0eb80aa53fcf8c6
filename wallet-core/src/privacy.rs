use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::keys::Keypair;
use crate::token::lamports_to_sol;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub tx: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawReceipt {
    pub tx: String,
    pub recipient: String,
    pub amount_lamports: u64,
    pub fee_lamports: u64,
    /// The pool paid out less than requested.
    #[serde(default)]
    pub is_partial: bool,
}

impl WithdrawReceipt {
    pub fn fee_sol(&self) -> f64 {
        lamports_to_sol(self.fee_lamports)
    }

    /// Reject receipts that paid someone other than `recipient`.
    pub fn check_recipient(&self, recipient: &str) -> WalletResult<()> {
        if self.recipient != recipient {
            return Err(WalletError::InvalidResponse(format!(
                "Withdrawal {} paid {} instead of {}",
                self.tx, self.recipient, recipient
            )));
        }
        if self.is_partial {
            log::warn!(
                "Withdrawal {} to {} was partial ({} lamports)",
                self.tx,
                self.recipient,
                self.amount_lamports
            );
        }
        Ok(())
    }
}

/// Shielded pool the transfer legs deposit into and withdraw from.
///
/// Proof generation and relaying happen behind this trait. Each call is made
/// at most once per leg.
#[async_trait]
pub trait PrivacyPool: Send + Sync {
    async fn deposit(&self, signer: &Keypair, lamports: u64) -> WalletResult<DepositReceipt>;

    async fn withdraw(
        &self,
        signer: &Keypair,
        lamports: u64,
        recipient: &str,
    ) -> WalletResult<WithdrawReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(recipient: &str, is_partial: bool) -> WithdrawReceipt {
        WithdrawReceipt {
            tx: "tx1".into(),
            recipient: recipient.into(),
            amount_lamports: 480_000_000,
            fee_lamports: 13_500_000,
            is_partial,
        }
    }

    #[test]
    fn recipient_must_match() {
        assert!(receipt("dest", false).check_recipient("dest").is_ok());
        assert!(receipt("dest", true).check_recipient("dest").is_ok());
        assert!(matches!(
            receipt("other", false).check_recipient("dest"),
            Err(WalletError::InvalidResponse(_))
        ));
    }

    #[test]
    fn fee_converts_to_sol() {
        assert_eq!(receipt("dest", false).fee_sol(), 0.0135);
    }

    #[test]
    fn parses_camel_case_receipt() {
        let parsed: WithdrawReceipt = serde_json::from_str(
            r#"{"tx":"abc","recipient":"r","amountLamports":5,"feeLamports":1}"#,
        )
        .unwrap();
        assert!(!parsed.is_partial);
        assert_eq!(parsed.fee_lamports, 1);
    }
}
