use serde::Serialize;

use super::plan::{ShieldLeg, TransferPlan, UnshieldLeg};
use crate::balance::BalanceUpdate;
use crate::errors::{WalletError, WalletResult};
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Confirming,
    Shielding,
    Unshielding,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnshieldOutcome {
    Completed {
        tx: String,
        amount: f64,
        fee: f64,
        swap_tx: Option<String>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnshieldEntry {
    pub address: String,
    pub name: String,
    #[serde(flatten)]
    pub outcome: UnshieldOutcome,
}

impl UnshieldEntry {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, UnshieldOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub shield_index: Option<usize>,
    pub unshield_index: Option<usize>,
    pub shield_total: usize,
    pub unshield_total: usize,
    pub completed_unshields: Vec<UnshieldEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub token: Token,
    pub total_fee: f64,
    pub successes: usize,
    pub failures: usize,
    pub last_tx: Option<String>,
    /// Sum delivered to destinations, in the target token.
    pub received_total: f64,
    pub shield_txs: Vec<String>,
    pub unshields: Vec<UnshieldEntry>,
    /// Post-transfer balances of the wallets involved.
    pub balances: Vec<BalanceUpdate>,
}

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum LegAction {
    Shield { index: usize, leg: ShieldLeg },
    Unshield { index: usize, leg: UnshieldLeg },
    Finished,
    Halted,
}

/// Outcome of the leg named by the last [`LegAction`].
#[derive(Debug, Clone, PartialEq)]
pub enum LegResult {
    Shielded {
        tx: String,
    },
    ShieldFailed {
        cause: String,
    },
    Unshielded {
        tx: String,
        amount: f64,
        fee: f64,
        swap_tx: Option<String>,
    },
    UnshieldFailed {
        cause: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Shielding(usize),
    Unshielding(usize),
    Done,
    Failed,
}

/// Shield/unshield sequencing with no I/O.
///
/// Shield failures halt the run. Unshield failures are recorded against their
/// destination and the run moves on.
#[derive(Debug, Clone)]
pub struct TransferMachine {
    plan: TransferPlan,
    stage: Stage,
    progress: TransferProgress,
    shield_txs: Vec<String>,
    error: Option<WalletError>,
}

impl TransferMachine {
    pub fn new(plan: TransferPlan) -> Self {
        let progress = TransferProgress {
            shield_total: plan.shields.len(),
            unshield_total: plan.unshields.len(),
            ..TransferProgress::default()
        };
        let mut machine = Self {
            plan,
            stage: Stage::Done,
            progress,
            shield_txs: Vec::new(),
            error: None,
        };
        machine.enter_shield(0);
        machine
    }

    pub fn plan(&self) -> &TransferPlan {
        &self.plan
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }

    pub fn error(&self) -> Option<&WalletError> {
        self.error.as_ref()
    }

    pub fn phase(&self) -> Phase {
        match self.stage {
            Stage::Shielding(_) => Phase::Shielding,
            Stage::Unshielding(_) => Phase::Unshielding,
            Stage::Done => Phase::Done,
            Stage::Failed => Phase::Error,
        }
    }

    pub fn next_action(&self) -> LegAction {
        match self.stage {
            Stage::Shielding(index) => LegAction::Shield {
                index,
                leg: self.plan.shields[index].clone(),
            },
            Stage::Unshielding(index) => LegAction::Unshield {
                index,
                leg: self.plan.unshields[index].clone(),
            },
            Stage::Done => LegAction::Finished,
            Stage::Failed => LegAction::Halted,
        }
    }

    /// Advance on the result of the current leg. A result that does not fit
    /// the current stage is rejected and leaves the machine unchanged.
    pub fn apply(&mut self, result: LegResult) -> WalletResult<()> {
        match (self.stage, result) {
            (Stage::Shielding(index), LegResult::Shielded { tx }) => {
                self.shield_txs.push(tx);
                self.enter_shield(index + 1);
            }
            (Stage::Shielding(index), LegResult::ShieldFailed { cause }) => {
                let leg = &self.plan.shields[index];
                self.error = Some(WalletError::ShieldLegFailed {
                    wallet: leg.wallet_name.clone(),
                    cause,
                });
                self.stage = Stage::Failed;
            }
            (
                Stage::Unshielding(index),
                LegResult::Unshielded {
                    tx,
                    amount,
                    fee,
                    swap_tx,
                },
            ) => {
                self.record_unshield(
                    index,
                    UnshieldOutcome::Completed {
                        tx,
                        amount,
                        fee,
                        swap_tx,
                    },
                );
                self.enter_unshield(index + 1);
            }
            (Stage::Unshielding(index), LegResult::UnshieldFailed { cause }) => {
                self.record_unshield(index, UnshieldOutcome::Failed { error: cause });
                self.enter_unshield(index + 1);
            }
            (stage, result) => {
                return Err(WalletError::InvalidState(format!(
                    "{:?} does not apply while {:?}",
                    result, stage
                )));
            }
        }
        Ok(())
    }

    /// Totals over recorded unshields. Only available once every leg ran.
    pub fn summary(&self) -> Option<TransferSummary> {
        if self.stage != Stage::Done {
            return None;
        }

        let mut summary = TransferSummary {
            token: self.plan.token,
            total_fee: 0.0,
            successes: 0,
            failures: 0,
            last_tx: None,
            received_total: 0.0,
            shield_txs: self.shield_txs.clone(),
            unshields: self.progress.completed_unshields.clone(),
            balances: Vec::new(),
        };
        for entry in &self.progress.completed_unshields {
            match &entry.outcome {
                UnshieldOutcome::Completed {
                    tx, amount, fee, ..
                } => {
                    summary.successes += 1;
                    summary.total_fee += fee;
                    summary.received_total += amount;
                    summary.last_tx = Some(tx.clone());
                }
                UnshieldOutcome::Failed { .. } => summary.failures += 1,
            }
        }
        Some(summary)
    }

    fn enter_shield(&mut self, index: usize) {
        if index < self.plan.shields.len() {
            self.stage = Stage::Shielding(index);
            self.progress.shield_index = Some(index);
        } else {
            self.enter_unshield(0);
        }
    }

    fn enter_unshield(&mut self, index: usize) {
        if index < self.plan.unshields.len() {
            self.stage = Stage::Unshielding(index);
            self.progress.unshield_index = Some(index);
        } else {
            self.stage = Stage::Done;
        }
    }

    fn record_unshield(&mut self, index: usize, outcome: UnshieldOutcome) {
        let leg = &self.plan.unshields[index];
        self.progress.completed_unshields.push(UnshieldEntry {
            address: leg.address.clone(),
            name: leg.name.clone(),
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(sources: usize, destinations: usize) -> TransferPlan {
        TransferPlan {
            token: Token::Sol,
            shields: (0..sources)
                .map(|i| ShieldLeg {
                    wallet_id: format!("w{}", i),
                    wallet_name: format!("Wallet {}", i),
                    address: format!("src{}", i),
                    requested: 0.5,
                    amount: 0.5,
                })
                .collect(),
            unshields: (0..destinations)
                .map(|i| UnshieldLeg {
                    address: format!("dst{}", i),
                    name: format!("Dest {}", i),
                    wallet_id: None,
                    native_amount: 0.3,
                    target_amount: 0.3,
                })
                .collect(),
        }
    }

    fn unshielded(tx: &str) -> LegResult {
        LegResult::Unshielded {
            tx: tx.into(),
            amount: 0.3,
            fee: 0.0095,
            swap_tx: None,
        }
    }

    #[test]
    fn shield_index_is_recorded_before_each_leg() {
        let mut machine = TransferMachine::new(plan(2, 1));
        assert_eq!(machine.phase(), Phase::Shielding);
        assert_eq!(machine.progress().shield_index, Some(0));
        assert_eq!(machine.progress().unshield_index, None);

        machine.apply(LegResult::Shielded { tx: "s0".into() }).unwrap();
        assert_eq!(machine.progress().shield_index, Some(1));
        assert!(matches!(machine.next_action(), LegAction::Shield { index: 1, .. }));

        machine.apply(LegResult::Shielded { tx: "s1".into() }).unwrap();
        assert_eq!(machine.phase(), Phase::Unshielding);
        assert_eq!(machine.progress().unshield_index, Some(0));
    }

    #[test]
    fn middle_unshield_failure_still_reaches_done() {
        let mut machine = TransferMachine::new(plan(1, 3));
        machine.apply(LegResult::Shielded { tx: "s0".into() }).unwrap();
        machine.apply(unshielded("u0")).unwrap();
        machine
            .apply(LegResult::UnshieldFailed {
                cause: "relayer unavailable".into(),
            })
            .unwrap();
        machine.apply(unshielded("u2")).unwrap();

        assert_eq!(machine.phase(), Phase::Done);
        assert_eq!(machine.next_action(), LegAction::Finished);

        let entries = &machine.progress().completed_unshields;
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_success());
        assert_eq!(
            entries[1].outcome,
            UnshieldOutcome::Failed {
                error: "relayer unavailable".into()
            }
        );
        assert_eq!(entries[1].address, "dst1");
        assert!(entries[2].is_success());

        let summary = machine.summary().unwrap();
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.last_tx.as_deref(), Some("u2"));
        assert!((summary.total_fee - 0.019).abs() < 1e-12);
        assert!((summary.received_total - 0.6).abs() < 1e-12);
        assert_eq!(summary.shield_txs, vec!["s0".to_string()]);
    }

    #[test]
    fn shield_failure_halts_before_any_unshield() {
        let mut machine = TransferMachine::new(plan(3, 2));
        machine.apply(LegResult::Shielded { tx: "s0".into() }).unwrap();
        machine
            .apply(LegResult::ShieldFailed {
                cause: "blockhash not found".into(),
            })
            .unwrap();

        assert_eq!(machine.phase(), Phase::Error);
        assert_eq!(machine.next_action(), LegAction::Halted);
        assert_eq!(machine.progress().shield_index, Some(1));
        assert_eq!(machine.progress().unshield_index, None);
        assert!(machine.progress().completed_unshields.is_empty());
        assert_eq!(
            machine.error(),
            Some(&WalletError::ShieldLegFailed {
                wallet: "Wallet 1".into(),
                cause: "blockhash not found".into()
            })
        );
        assert!(machine.summary().is_none());
    }

    #[test]
    fn mismatched_result_is_rejected_without_change() {
        let mut machine = TransferMachine::new(plan(1, 1));
        assert!(matches!(
            machine.apply(unshielded("u0")),
            Err(WalletError::InvalidState(_))
        ));
        assert_eq!(machine.phase(), Phase::Shielding);
        assert_eq!(machine.progress().shield_index, Some(0));

        machine.apply(LegResult::Shielded { tx: "s0".into() }).unwrap();
        machine.apply(unshielded("u0")).unwrap();
        assert!(machine
            .apply(LegResult::Shielded { tx: "late".into() })
            .is_err());
        assert_eq!(machine.progress().completed_unshields.len(), 1);
    }

    #[test]
    fn entries_never_exceed_unshield_total() {
        let mut machine = TransferMachine::new(plan(1, 2));
        machine.apply(LegResult::Shielded { tx: "s0".into() }).unwrap();
        for i in 0..5 {
            let _ = machine.apply(unshielded(&format!("u{}", i)));
        }
        let progress = machine.progress();
        assert_eq!(progress.completed_unshields.len(), progress.unshield_total);
    }

    #[test]
    fn entry_serializes_flat() {
        let entry = UnshieldEntry {
            address: "a".into(),
            name: "n".into(),
            outcome: UnshieldOutcome::Failed {
                error: "boom".into(),
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["address"], "a");
    }
}
