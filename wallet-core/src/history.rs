use std::sync::Arc;

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::storage::{Vault, VaultRecord};

pub const CSV_HEADER: [&str; 11] = [
    "Date",
    "External ID",
    "TX Signature",
    "Source Wallet",
    "Source Address",
    "Destination",
    "Amount Sent (SOL)",
    "Fee (SOL)",
    "Amount Received",
    "Token",
    "Status",
];

pub const STATUS_COMPLETE: &str = "Complete";
pub const STATUS_SWAP_FAILED: &str = "Swap failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    PrivateTransfer,
    ExternalSwap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRef {
    pub name: String,
    pub address: String,
}

/// One persisted transfer leg or external order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapHistoryRecord {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    #[serde(rename = "type")]
    pub kind: TransferKind,
    pub source_wallet: WalletRef,
    pub dest_address: String,
    #[serde(default)]
    pub dest_name: String,
    #[serde(rename = "amountSOL")]
    pub amount_sol: f64,
    #[serde(rename = "feeSOL", default)]
    pub fee_sol: f64,
    pub status_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_out: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_tx_id: Option<String>,
}

impl SwapHistoryRecord {
    /// A record with a fresh id and the current time.
    pub fn new(
        kind: TransferKind,
        source_wallet: WalletRef,
        dest_address: impl Into<String>,
        dest_name: impl Into<String>,
        amount_sol: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now().timestamp_millis(),
            kind,
            source_wallet,
            dest_address: dest_address.into(),
            dest_name: dest_name.into(),
            amount_sol,
            fee_sol: 0.0,
            status_label: STATUS_COMPLETE.to_string(),
            tx_id: None,
            external_id: None,
            amount_out: None,
            token: None,
            swap_tx_id: None,
        }
    }

    fn csv_row(&self) -> [String; 11] {
        let date = Utc
            .timestamp_millis_opt(self.created_at)
            .single()
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();

        [
            date,
            self.external_id.clone().unwrap_or_default(),
            self.tx_id.clone().unwrap_or_default(),
            self.source_wallet.name.clone(),
            self.source_wallet.address.clone(),
            self.dest_address.clone(),
            self.amount_sol.to_string(),
            self.fee_sol.to_string(),
            self.amount_out.map(|v| v.to_string()).unwrap_or_default(),
            self.token.clone().unwrap_or_default(),
            self.status_label.clone(),
        ]
    }
}

/// Fields an external status update may overwrite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryPatch {
    pub status_label: Option<String>,
    pub amount_out: Option<f64>,
    pub tx_id: Option<String>,
}

impl HistoryPatch {
    fn apply(&self, record: &mut SwapHistoryRecord) {
        if let Some(label) = &self.status_label {
            record.status_label = label.clone();
        }
        if let Some(amount) = self.amount_out {
            record.amount_out = Some(amount);
        }
        if let Some(tx) = &self.tx_id {
            record.tx_id = Some(tx.clone());
        }
    }
}

/// Encrypted, newest-first history of completed transfer legs.
#[derive(Debug, Clone)]
pub struct SwapLedger {
    vault: Arc<Vault>,
}

impl SwapLedger {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }

    /// All records, newest first. Unreadable history reads as empty.
    pub fn list(&self) -> Vec<SwapHistoryRecord> {
        let mut records: Vec<SwapHistoryRecord> =
            self.vault.load(VaultRecord::SwapHistory).unwrap_or_default();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn append(&self, record: SwapHistoryRecord) -> WalletResult<SwapHistoryRecord> {
        let mut records = self.load_for_write()?;
        records.insert(0, record.clone());
        self.vault.store(VaultRecord::SwapHistory, &records)?;
        log::debug!("Recorded history entry {}", record.id);
        Ok(record)
    }

    pub fn update_by_external_id(
        &self,
        external_id: &str,
        patch: &HistoryPatch,
    ) -> WalletResult<Option<SwapHistoryRecord>> {
        let mut records = self.load_for_write()?;
        let Some(record) = records
            .iter_mut()
            .find(|r| r.external_id.as_deref() == Some(external_id))
        else {
            return Ok(None);
        };

        patch.apply(record);
        let updated = record.clone();
        self.vault.store(VaultRecord::SwapHistory, &records)?;
        Ok(Some(updated))
    }

    pub fn export_csv(&self) -> String {
        let mut lines = Vec::new();
        lines.push(csv_line(CSV_HEADER.iter().map(|h| h.to_string())));
        for record in self.list() {
            lines.push(csv_line(record.csv_row()));
        }
        lines.join("\n")
    }

    // A history blob that exists but cannot be read must not be overwritten.
    fn load_for_write(&self) -> WalletResult<Vec<SwapHistoryRecord>> {
        let mut records: Vec<SwapHistoryRecord> = self
            .vault
            .load_strict(VaultRecord::SwapHistory)
            .map_err(|err| {
                WalletError::StorageError(format!("Swap history is unreadable: {}", err))
            })?
            .unwrap_or_default();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

fn csv_cell(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn csv_line(cells: impl IntoIterator<Item = String>) -> String {
    cells
        .into_iter()
        .map(|c| csv_cell(&c))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::normalize_passphrase;
    use crate::crypto::KdfParameters;
    use crate::storage::{KeyValueStore, MemoryStore};

    fn vault(store: &Arc<MemoryStore>, passphrase: &str) -> Arc<Vault> {
        let store: Arc<dyn KeyValueStore> = store.clone();
        Arc::new(
            Vault::open(
                store,
                &normalize_passphrase(passphrase),
                &KdfParameters::low_memory(),
            )
            .unwrap(),
        )
    }

    fn record(created_at: i64, external_id: Option<&str>) -> SwapHistoryRecord {
        let mut record = SwapHistoryRecord::new(
            TransferKind::PrivateTransfer,
            WalletRef {
                name: "Main".into(),
                address: "SrcAddr".into(),
            },
            "DestAddr",
            "Savings",
            0.4865,
        );
        record.created_at = created_at;
        record.external_id = external_id.map(String::from);
        record.tx_id = Some(format!("tx-{}", created_at));
        record
    }

    #[test]
    fn append_keeps_newest_first() {
        let store = Arc::new(MemoryStore::new());
        let ledger = SwapLedger::new(vault(&store, "alpha"));

        ledger.append(record(1_000, None)).unwrap();
        ledger.append(record(3_000, None)).unwrap();
        ledger.append(record(2_000, None)).unwrap();

        let listed: Vec<i64> = ledger.list().iter().map(|r| r.created_at).collect();
        assert_eq!(listed, vec![3_000, 2_000, 1_000]);
    }

    #[test]
    fn wrong_passphrase_lists_empty() {
        let store = Arc::new(MemoryStore::new());
        SwapLedger::new(vault(&store, "alpha"))
            .append(record(1_000, None))
            .unwrap();

        let intruder = vault(&store, "beta");
        assert!(SwapLedger::new(intruder).list().is_empty());
    }

    #[test]
    fn corrupt_history_is_not_overwritten() {
        let store = Arc::new(MemoryStore::new());
        let v = vault(&store, "alpha");
        v.put_raw_blob(VaultRecord::SwapHistory, "{\"v\":1,\"iv\":\"AAAA\",\"data\":\"AAAA\"}")
            .unwrap();

        let ledger = SwapLedger::new(v.clone());
        assert!(ledger.list().is_empty());
        assert!(matches!(
            ledger.append(record(1, None)),
            Err(WalletError::StorageError(_))
        ));
        assert!(v.raw_blob(VaultRecord::SwapHistory).unwrap().unwrap().contains("AAAA"));
    }

    #[test]
    fn update_merges_patch_by_external_id() {
        let store = Arc::new(MemoryStore::new());
        let ledger = SwapLedger::new(vault(&store, "alpha"));
        ledger.append(record(1_000, Some("order-1"))).unwrap();

        let patch = HistoryPatch {
            status_label: Some("Complete".into()),
            amount_out: Some(0.48),
            tx_id: None,
        };
        let updated = ledger
            .update_by_external_id("order-1", &patch)
            .unwrap()
            .unwrap();
        assert_eq!(updated.amount_out, Some(0.48));
        assert_eq!(updated.tx_id.as_deref(), Some("tx-1000"));
        assert_eq!(ledger.list()[0], updated);

        assert_eq!(ledger.update_by_external_id("missing", &patch).unwrap(), None);
    }

    #[test]
    fn csv_quotes_every_cell() {
        let store = Arc::new(MemoryStore::new());
        let ledger = SwapLedger::new(vault(&store, "alpha"));
        let mut entry = record(0, Some("ord"));
        entry.source_wallet.name = "My \"hot\" wallet".into();
        entry.token = Some("SOL".into());
        ledger.append(entry).unwrap();

        let csv = ledger.export_csv();
        let lines: Vec<&str> = csv.split('\n').collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("\"Date\",\"External ID\",\"TX Signature\""));
        assert!(lines[0].ends_with("\"Token\",\"Status\""));
        assert_eq!(
            lines[1],
            "\"1970-01-01T00:00:00.000Z\",\"ord\",\"tx-0\",\"My \"\"hot\"\" wallet\",\"SrcAddr\",\"DestAddr\",\"0.4865\",\"0\",\"\",\"SOL\",\"Complete\""
        );
    }

    #[test]
    fn record_uses_wire_field_names() {
        let json = serde_json::to_value(record(5, None)).unwrap();
        assert_eq!(json["type"], "private_transfer");
        assert_eq!(json["amountSOL"], 0.4865);
        assert_eq!(json["feeSOL"], 0.0);
        assert_eq!(json["sourceWallet"]["name"], "Main");
        assert!(json.get("externalId").is_none());
    }
}
