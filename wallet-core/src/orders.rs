use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::history::{HistoryPatch, SwapHistoryRecord, SwapLedger};

/// Lifecycle of an order placed with an external exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Created,
    AwaitingDeposit,
    Confirming,
    Processing,
    Anonymizing,
    Complete,
    Expired,
    Failed,
    Refunded,
    Deleted,
}

impl OrderStatus {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => OrderStatus::Created,
            0 => OrderStatus::AwaitingDeposit,
            1 => OrderStatus::Confirming,
            2 => OrderStatus::Processing,
            3 => OrderStatus::Anonymizing,
            4 => OrderStatus::Complete,
            5 => OrderStatus::Expired,
            6 => OrderStatus::Failed,
            7 => OrderStatus::Refunded,
            8 => OrderStatus::Deleted,
            _ => return None,
        })
    }

    pub fn code(&self) -> i32 {
        match self {
            OrderStatus::Created => -1,
            OrderStatus::AwaitingDeposit => 0,
            OrderStatus::Confirming => 1,
            OrderStatus::Processing => 2,
            OrderStatus::Anonymizing => 3,
            OrderStatus::Complete => 4,
            OrderStatus::Expired => 5,
            OrderStatus::Failed => 6,
            OrderStatus::Refunded => 7,
            OrderStatus::Deleted => 8,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Created",
            OrderStatus::AwaitingDeposit => "Awaiting Deposit",
            OrderStatus::Confirming => "Confirming",
            OrderStatus::Processing => "Processing",
            OrderStatus::Anonymizing => "Anonymizing",
            OrderStatus::Complete => "Complete",
            OrderStatus::Expired => "Expired",
            OrderStatus::Failed => "Failed",
            OrderStatus::Refunded => "Refunded",
            OrderStatus::Deleted => "Deleted",
        }
    }

    /// No further status changes are expected.
    pub fn is_terminal(&self) -> bool {
        self.code() >= OrderStatus::Complete.code()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        OrderStatus::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown order status {}", code)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub status: OrderStatus,
    #[serde(default)]
    pub out_amount: Option<f64>,
    #[serde(default)]
    pub tx_id: Option<String>,
}

impl OrderUpdate {
    fn to_patch(&self) -> HistoryPatch {
        HistoryPatch {
            status_label: Some(self.status.label().to_string()),
            amount_out: self.out_amount,
            tx_id: self.tx_id.clone(),
        }
    }
}

#[async_trait]
pub trait OrderTracker: Send + Sync {
    async fn order_status(&self, external_id: &str) -> WalletResult<OrderUpdate>;
}

/// Fetch the latest status of `external_id` and write it to its history record.
///
/// Returns the updated record together with the status, so callers can stop
/// polling on a terminal status.
pub async fn reconcile_order(
    ledger: &SwapLedger,
    tracker: &dyn OrderTracker,
    external_id: &str,
) -> WalletResult<(SwapHistoryRecord, OrderStatus)> {
    let update = tracker.order_status(external_id).await?;
    log::debug!("Order {} is {}", external_id, update.status);

    let record = ledger
        .update_by_external_id(external_id, &update.to_patch())?
        .ok_or_else(|| {
            WalletError::NotFound(format!("No history record for order {}", external_id))
        })?;
    Ok((record, update.status))
}
