use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};

/// Chain-side view of a submitted signature.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    pub slot: Option<u64>,
    pub confirmations: Option<u64>,
    pub err: Option<serde_json::Value>,
    pub confirmation_status: Option<String>,
}

impl SignatureStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self.confirmation_status.as_deref(),
            Some("confirmed") | Some("finalized")
        )
    }
}

#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Submit a base64 transaction, returning its signature.
    async fn send_transaction(&self, tx_base64: &str) -> WalletResult<String>;
    async fn signature_status(&self, signature: &str) -> WalletResult<Option<SignatureStatus>>;
}

/// Bounds on how long a submitted transaction is watched.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Re-send the raw transaction every this many unconfirmed polls. Zero disables.
    pub resubmit_every: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
            resubmit_every: 5,
        }
    }
}

/// Poll until `signature` is confirmed, fails on chain, or attempts run out.
///
/// Status lookup errors count as an unconfirmed poll. When `raw_tx` is given it
/// is re-submitted on the policy's cadence; re-submission errors are ignored.
pub async fn await_confirmation(
    submitter: &dyn TransactionSubmitter,
    signature: &str,
    raw_tx: Option<&str>,
    policy: &ConfirmationPolicy,
) -> WalletResult<SignatureStatus> {
    for attempt in 1..=policy.max_attempts {
        match submitter.signature_status(signature).await {
            Ok(Some(status)) if status.err.is_some() => {
                let detail = status
                    .err
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                log::warn!("Transaction {} failed on chain: {}", signature, detail);
                return Err(WalletError::TransactionFailed(format!(
                    "{} failed on chain: {}",
                    signature, detail
                )));
            }
            Ok(Some(status)) if status.is_confirmed() => {
                log::info!("Transaction {} confirmed after {} poll(s)", signature, attempt);
                return Ok(status);
            }
            Ok(_) => {}
            Err(err) => {
                log::debug!("Status poll {} for {} failed: {}", attempt, signature, err);
            }
        }

        if attempt == policy.max_attempts {
            break;
        }

        if let Some(raw) = raw_tx {
            if policy.resubmit_every > 0 && attempt % policy.resubmit_every == 0 {
                log::debug!("Re-submitting {} (poll {})", signature, attempt);
                if let Err(err) = submitter.send_transaction(raw).await {
                    log::debug!("Re-submit of {} failed: {}", signature, err);
                }
            }
        }

        tokio::time::sleep(policy.interval).await;
    }

    log::warn!(
        "Transaction {} unconfirmed after {} polls",
        signature,
        policy.max_attempts
    );
    Err(WalletError::ConfirmationTimeout(signature.to_string()))
}
