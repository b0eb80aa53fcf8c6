use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::machine::{LegAction, LegResult, Phase, TransferMachine, TransferProgress, TransferSummary};
use super::plan::{build_plan, ShieldLeg, TransferPlan, UnshieldLeg};
use crate::balance::BalanceOracle;
use crate::dex::TokenSwapper;
use crate::errors::{WalletError, WalletResult};
use crate::history::{
    SwapHistoryRecord, SwapLedger, TransferKind, WalletRef, STATUS_COMPLETE, STATUS_SWAP_FAILED,
};
use crate::keys::Keypair;
use crate::prices::PriceTable;
use crate::privacy::{PrivacyPool, WithdrawReceipt};
use crate::quote::{self, Destination, FeePolicy, QuoteRecord, QuoteRejection, QuoteRequest, QuoteSource};
use crate::token::{lamports_to_sol, sol_to_lamports, Token};
use crate::wallet_store::WalletRecord;

pub const DEFAULT_QUOTE_TTL: Duration = Duration::from_secs(120);

/// Collaborators used by one execution.
pub struct TransferServices<'a> {
    pub pool: &'a dyn PrivacyPool,
    pub swapper: Option<&'a dyn TokenSwapper>,
    pub ledger: Option<&'a SwapLedger>,
    pub balances: Option<&'a BalanceOracle>,
    pub events: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl<'a> TransferServices<'a> {
    pub fn new(pool: &'a dyn PrivacyPool) -> Self {
        Self {
            pool,
            swapper: None,
            ledger: None,
            balances: None,
            events: None,
        }
    }

    pub fn with_swapper(mut self, swapper: &'a dyn TokenSwapper) -> Self {
        self.swapper = Some(swapper);
        self
    }

    pub fn with_ledger(mut self, ledger: &'a SwapLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_balances(mut self, balances: &'a BalanceOracle) -> Self {
        self.balances = Some(balances);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<TransferEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(events) = &self.events {
            // a closed receiver only means nobody is watching
            let _ = events.send(event);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    PhaseChanged(Phase),
    Progress(TransferProgress),
    Finished(TransferSummary),
    Failed(WalletError),
}

/// Read-only copy of the desk for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeskSnapshot {
    pub phase: Phase,
    pub amount: f64,
    pub sources: Vec<QuoteSource>,
    pub destinations: Vec<Destination>,
    pub target: Token,
    pub quote: Option<QuoteRecord>,
    pub progress: Option<TransferProgress>,
    pub summary: Option<TransferSummary>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct DeskState {
    generation: u64,
    phase: Phase,
    amount: f64,
    sources: Vec<QuoteSource>,
    destinations: Vec<Destination>,
    target: Token,
    quote: Option<QuoteRecord>,
    progress: Option<TransferProgress>,
    summary: Option<TransferSummary>,
    error: Option<WalletError>,
}

impl DeskState {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            phase: Phase::Idle,
            amount: 0.0,
            sources: Vec::new(),
            destinations: Vec::new(),
            target: Token::Sol,
            quote: None,
            progress: None,
            summary: None,
            error: None,
        }
    }

    fn request(&self) -> QuoteRequest {
        QuoteRequest {
            amount: self.amount,
            sources: self.sources.clone(),
            destinations: self.destinations.clone(),
            target: self.target,
        }
    }

    fn ensure_editable(&self) -> WalletResult<()> {
        match self.phase {
            Phase::Idle | Phase::Confirming => Ok(()),
            Phase::Shielding | Phase::Unshielding => Err(WalletError::InvalidState(
                "A transfer is in progress".to_string(),
            )),
            Phase::Done | Phase::Error => Err(WalletError::InvalidState(
                "Reset the finished transfer before starting another".to_string(),
            )),
        }
    }

    // Any input change invalidates the held quote.
    fn edited(&mut self) {
        if self.quote.take().is_some() {
            log::debug!("Transfer inputs changed, dropping quote");
        }
        self.phase = Phase::Idle;
    }
}

/// Keys resolved before any leg is issued.
struct Signers {
    sources: Vec<Keypair>,
    destinations: Vec<Option<Keypair>>,
}

/// Collects transfer inputs, holds the confirmed quote and drives execution.
///
/// Cloning yields another handle onto the same desk, so a snapshot or reset
/// can be taken while an execution is awaiting a leg.
#[derive(Clone)]
pub struct TransferDesk {
    state: Arc<Mutex<DeskState>>,
    policy: FeePolicy,
    quote_ttl: Duration,
}

impl TransferDesk {
    pub fn new(policy: FeePolicy, quote_ttl: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeskState::new(0))),
            policy,
            quote_ttl,
        }
    }

    pub fn policy(&self) -> &FeePolicy {
        &self.policy
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn snapshot(&self) -> DeskSnapshot {
        let state = self.state.lock();
        DeskSnapshot {
            phase: state.phase,
            amount: state.amount,
            sources: state.sources.clone(),
            destinations: state.destinations.clone(),
            target: state.target,
            quote: state.quote.clone(),
            progress: state.progress.clone(),
            summary: state.summary.clone(),
            error: state.error.as_ref().map(|e| e.to_string()),
        }
    }

    pub fn set_amount(&self, amount: f64) -> WalletResult<()> {
        self.edit(|state| state.amount = amount)
    }

    pub fn set_target(&self, target: Token) -> WalletResult<()> {
        self.edit(|state| state.target = target)
    }

    pub fn set_sources(&self, sources: Vec<QuoteSource>) -> WalletResult<()> {
        self.edit(|state| state.sources = sources)
    }

    pub fn set_destinations(&self, destinations: Vec<Destination>) -> WalletResult<()> {
        self.edit(|state| state.destinations = destinations)
    }

    /// Add a source wallet unless it is already selected.
    pub fn add_source(&self, source: QuoteSource) -> WalletResult<()> {
        self.edit(|state| {
            if !state.sources.iter().any(|s| s.id == source.id) {
                state.sources.push(source);
            }
        })
    }

    pub fn remove_source(&self, wallet_id: &str) -> WalletResult<()> {
        self.edit(|state| state.sources.retain(|s| s.id != wallet_id))
    }

    /// Add a destination unless its address is already selected.
    pub fn add_destination(&self, destination: Destination) -> WalletResult<()> {
        self.edit(|state| {
            if !state
                .destinations
                .iter()
                .any(|d| d.address == destination.address)
            {
                state.destinations.push(destination);
            }
        })
    }

    pub fn remove_destination(&self, address: &str) -> WalletResult<()> {
        self.edit(|state| state.destinations.retain(|d| d.address != address))
    }

    /// Drop a deleted wallet from the pending selection. Returns whether the
    /// selection changed.
    pub fn forget_wallet(&self, wallet_id: &str) -> bool {
        let mut state = self.state.lock();
        let before = (state.sources.len(), state.destinations.len());
        state.sources.retain(|s| s.id != wallet_id);
        state
            .destinations
            .retain(|d| d.wallet_id.as_deref() != Some(wallet_id));
        let changed = before != (state.sources.len(), state.destinations.len());

        if changed && matches!(state.phase, Phase::Idle | Phase::Confirming) {
            state.edited();
        }
        changed
    }

    /// Price the current inputs. On success the desk waits for confirmation;
    /// a rejection leaves it idle with no quote.
    pub fn request_quote(&self, prices: Option<&PriceTable>) -> Result<QuoteRecord, QuoteRejection> {
        let mut state = self.state.lock();
        if state.ensure_editable().is_err() {
            return Err(QuoteRejection::TransferInProgress);
        }

        match quote::estimate(&state.request(), prices, &self.policy) {
            Ok(quote) => {
                state.quote = Some(quote.clone());
                state.phase = Phase::Confirming;
                Ok(quote)
            }
            Err(rejection) => {
                log::info!("Quote rejected: {}", rejection);
                state.quote = None;
                state.phase = Phase::Idle;
                Err(rejection)
            }
        }
    }

    /// Clear every input and any outcome. A run in flight stops issuing legs
    /// once its current leg returns.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let generation = state.generation + 1;
        if matches!(state.phase, Phase::Shielding | Phase::Unshielding) {
            log::warn!("Resetting transfer desk while a transfer is in flight");
        }
        *state = DeskState::new(generation);
    }

    /// Run the confirmed quote to completion.
    ///
    /// `wallets` must be the full secret-bearing set; sources and managed
    /// destinations are resolved from it before any leg is issued.
    pub async fn execute(
        &self,
        wallets: &[WalletRecord],
        services: &TransferServices<'_>,
    ) -> WalletResult<TransferSummary> {
        let (generation, mut machine, signers) = self.preflight(wallets, services)?;

        log::info!(
            "Starting transfer: {} shield leg(s), {} unshield leg(s), token {}",
            machine.plan().shields.len(),
            machine.plan().unshields.len(),
            machine.plan().token
        );
        services.emit(TransferEvent::PhaseChanged(Phase::Shielding));
        services.emit(TransferEvent::Progress(machine.progress().clone()));

        loop {
            let result = match machine.next_action() {
                LegAction::Shield { index, leg } => {
                    self.run_shield(&leg, &signers.sources[index], services).await
                }
                LegAction::Unshield { index, leg } => {
                    self.run_unshield(
                        machine.plan(),
                        &leg,
                        &signers.sources[0],
                        signers.destinations[index].as_ref(),
                        services,
                    )
                    .await
                }
                LegAction::Finished => break,
                LegAction::Halted => {
                    let err = machine.error().cloned().unwrap_or_else(|| {
                        WalletError::InvalidState("Transfer halted".to_string())
                    });
                    log::error!("Transfer stopped: {}", err);
                    services.emit(TransferEvent::Failed(err.clone()));
                    return Err(err);
                }
            };
            self.advance(generation, &mut machine, result, services)?;
        }

        let mut summary = machine.summary().ok_or_else(|| {
            WalletError::InvalidState("Transfer finished without a summary".to_string())
        })?;

        if let Some(oracle) = services.balances {
            let addresses = involved_addresses(machine.plan());
            summary.balances = oracle.refresh_addresses(&addresses).await;
        }

        {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.summary = Some(summary.clone());
            }
        }

        log::info!(
            "Transfer complete: {} succeeded, {} failed, fee {:.6} SOL",
            summary.successes,
            summary.failures,
            summary.total_fee
        );
        services.emit(TransferEvent::Finished(summary.clone()));
        Ok(summary)
    }

    fn edit(&self, change: impl FnOnce(&mut DeskState)) -> WalletResult<()> {
        let mut state = self.state.lock();
        state.ensure_editable()?;
        change(&mut state);
        state.edited();
        Ok(())
    }

    fn preflight(
        &self,
        wallets: &[WalletRecord],
        services: &TransferServices<'_>,
    ) -> WalletResult<(u64, TransferMachine, Signers)> {
        let mut state = self.state.lock();
        if state.phase != Phase::Confirming {
            return Err(WalletError::InvalidState(
                "Request and confirm a quote before executing".to_string(),
            ));
        }

        let quote = state
            .quote
            .clone()
            .ok_or_else(|| WalletError::QuoteExpiredOrStale("No quote is held".to_string()))?;
        let mut request = state.request();
        if !quote.matches(&request) {
            return Err(WalletError::QuoteExpiredOrStale(
                "Transfer inputs changed after quoting".to_string(),
            ));
        }
        if quote.is_expired(self.quote_ttl, Utc::now()) {
            return Err(WalletError::QuoteExpiredOrStale(format!(
                "Quote is older than {} seconds",
                self.quote_ttl.as_secs()
            )));
        }

        let mut sources = Vec::with_capacity(request.sources.len());
        for source in request.sources.iter_mut() {
            let record = wallets.iter().find(|w| w.id == source.id).ok_or_else(|| {
                WalletError::NotFound(format!("Source wallet {} is not available", source.name))
            })?;
            // the cap uses the balance held now, not the one quoted
            source.balance = record.balance;
            sources.push(record.keypair()?);
        }

        let mut destinations = Vec::with_capacity(request.destinations.len());
        for dest in &request.destinations {
            let record = dest
                .wallet_id
                .as_deref()
                .and_then(|id| wallets.iter().find(|w| w.id == id));
            if !quote.token.is_native() && record.is_none() {
                return Err(WalletError::ValidationError(format!(
                    "{} must be one of your wallets to receive {}",
                    dest.name, quote.token
                )));
            }
            destinations.push(record.map(WalletRecord::keypair).transpose()?);
        }

        if !quote.token.is_native() && services.swapper.is_none() {
            return Err(WalletError::InvalidState(format!(
                "No swap service configured for {} transfers",
                quote.token
            )));
        }

        let machine = TransferMachine::new(build_plan(&request, &quote, &self.policy)?);
        state.phase = Phase::Shielding;
        state.progress = Some(machine.progress().clone());
        state.summary = None;
        state.error = None;

        Ok((
            state.generation,
            machine,
            Signers {
                sources,
                destinations,
            },
        ))
    }

    fn advance(
        &self,
        generation: u64,
        machine: &mut TransferMachine,
        result: LegResult,
        services: &TransferServices<'_>,
    ) -> WalletResult<()> {
        let mut state = self.state.lock();
        if state.generation != generation {
            log::info!("Transfer was reset, abandoning remaining legs");
            return Err(WalletError::Abandoned);
        }

        let previous = machine.phase();
        machine.apply(result)?;
        state.phase = machine.phase();
        state.progress = Some(machine.progress().clone());
        if let Some(err) = machine.error() {
            state.error = Some(err.clone());
        }

        if state.phase != previous {
            services.emit(TransferEvent::PhaseChanged(state.phase));
        }
        services.emit(TransferEvent::Progress(machine.progress().clone()));
        Ok(())
    }

    async fn run_shield(
        &self,
        leg: &ShieldLeg,
        signer: &Keypair,
        services: &TransferServices<'_>,
    ) -> LegResult {
        let lamports = leg.lamports();
        if lamports == 0 {
            return LegResult::ShieldFailed {
                cause: "Balance too low to shield after the gas reserve".to_string(),
            };
        }

        log::info!("Shielding {} SOL from {}", leg.amount, leg.address);
        match services.pool.deposit(signer, lamports).await {
            Ok(receipt) => {
                log::info!("Shield from {} confirmed: {}", leg.address, receipt.tx);
                LegResult::Shielded { tx: receipt.tx }
            }
            Err(err) => {
                log::error!("Shield from {} failed: {}", leg.address, err);
                LegResult::ShieldFailed {
                    cause: err.to_string(),
                }
            }
        }
    }

    async fn run_unshield(
        &self,
        plan: &TransferPlan,
        leg: &UnshieldLeg,
        primary: &Keypair,
        destination_key: Option<&Keypair>,
        services: &TransferServices<'_>,
    ) -> LegResult {
        match self
            .unshield_leg(plan, leg, primary, destination_key, services)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                let failure = WalletError::UnshieldLegFailed {
                    destination: leg.name.clone(),
                    cause: err.to_string(),
                };
                log::error!("{}", failure);
                LegResult::UnshieldFailed {
                    cause: err.to_string(),
                }
            }
        }
    }

    async fn unshield_leg(
        &self,
        plan: &TransferPlan,
        leg: &UnshieldLeg,
        primary: &Keypair,
        destination_key: Option<&Keypair>,
        services: &TransferServices<'_>,
    ) -> WalletResult<LegResult> {
        log::info!("Unshielding {} SOL to {}", leg.native_amount, leg.address);
        let receipt = services
            .pool
            .withdraw(primary, leg.lamports(), &leg.address)
            .await?;
        receipt.check_recipient(&leg.address)?;
        let fee = receipt.fee_sol();

        let (amount, swap_tx) = if plan.token.is_native() {
            (leg.target_amount, None)
        } else {
            let (swapper, signer) = services.swapper.zip(destination_key).ok_or_else(|| {
                WalletError::InvalidState("Swap requested without a swapper or key".to_string())
            })?;
            let swap_sol = leg.native_amount - fee - self.policy.swap_gas_reserve;
            if swap_sol <= 0.0 {
                record_unshield(
                    services,
                    plan,
                    primary,
                    leg,
                    &receipt,
                    STATUS_SWAP_FAILED,
                    None,
                    None,
                );
                return Err(WalletError::InsufficientBalance(format!(
                    "Withdrawal {} of {} SOL does not cover fees and swap gas",
                    receipt.tx, leg.native_amount
                )));
            }
            match swapper
                .swap_from_native(signer, sol_to_lamports(swap_sol), plan.token)
                .await
            {
                Ok(swap) => (plan.token.to_human_amount(swap.out_amount), Some(swap.tx)),
                Err(err) => {
                    // the SOL already reached the destination, keep its trail
                    record_unshield(
                        services,
                        plan,
                        primary,
                        leg,
                        &receipt,
                        STATUS_SWAP_FAILED,
                        None,
                        None,
                    );
                    return Err(WalletError::TransactionFailed(format!(
                        "Withdrawal {} landed but the {} swap failed: {}",
                        receipt.tx, plan.token, err
                    )));
                }
            }
        };

        record_unshield(
            services,
            plan,
            primary,
            leg,
            &receipt,
            STATUS_COMPLETE,
            Some(amount),
            swap_tx.clone(),
        );

        log::info!(
            "Unshield to {} complete: {} (fee {} SOL)",
            leg.address,
            receipt.tx,
            lamports_to_sol(receipt.fee_lamports)
        );
        Ok(LegResult::Unshielded {
            tx: receipt.tx,
            amount,
            fee,
            swap_tx,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn record_unshield(
    services: &TransferServices<'_>,
    plan: &TransferPlan,
    primary: &Keypair,
    leg: &UnshieldLeg,
    receipt: &WithdrawReceipt,
    status: &str,
    amount_out: Option<f64>,
    swap_tx: Option<String>,
) {
    let Some(ledger) = services.ledger else {
        return;
    };
    let mut record = SwapHistoryRecord::new(
        TransferKind::PrivateTransfer,
        WalletRef {
            name: plan
                .primary()
                .map(|p| p.wallet_name.clone())
                .unwrap_or_default(),
            address: primary.address(),
        },
        leg.address.clone(),
        leg.name.clone(),
        leg.native_amount,
    );
    record.fee_sol = receipt.fee_sol();
    record.status_label = status.to_string();
    record.tx_id = Some(receipt.tx.clone());
    record.token = Some(plan.token.symbol().to_string());
    record.amount_out = amount_out;
    record.swap_tx_id = swap_tx;
    if let Err(err) = ledger.append(record) {
        log::error!("Failed to record unshield {} in history: {}", receipt.tx, err);
    }
}

fn involved_addresses(plan: &TransferPlan) -> Vec<String> {
    plan.shields
        .iter()
        .map(|s| s.address.clone())
        .chain(
            plan.unshields
                .iter()
                .filter(|u| u.wallet_id.is_some())
                .map(|u| u.address.clone()),
        )
        .collect()
}
