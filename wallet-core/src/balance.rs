use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::errors::WalletResult;
use crate::token::lamports_to_sol;
use crate::wallet_store::PublicWallet;

pub const DEFAULT_BALANCE_INTERVAL: Duration = Duration::from_secs(15);

/// Read-only chain queries needed for balance display.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    async fn get_balance_lamports(&self, address: &str) -> WalletResult<u64>;
    async fn get_token_account_count(&self, address: &str) -> WalletResult<usize>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub address: String,
    pub balance: f64,
    pub holdings: usize,
}

/// Fail-soft balance lookups. A failed query reads as zero and is logged.
#[derive(Clone)]
pub struct BalanceOracle {
    chain: Arc<dyn ChainQuery>,
}

impl BalanceOracle {
    pub fn new(chain: Arc<dyn ChainQuery>) -> Self {
        Self { chain }
    }

    /// Native balances in SOL, queried one address at a time.
    pub async fn refresh(&self, addresses: &[String]) -> HashMap<String, f64> {
        let mut balances = HashMap::with_capacity(addresses.len());
        for address in addresses {
            let balance = self.balance_of(address).await;
            balances.insert(address.clone(), balance);
        }
        balances
    }

    pub async fn token_holdings_count(&self, address: &str) -> usize {
        match self.chain.get_token_account_count(address).await {
            Ok(count) => count,
            Err(err) => {
                log::warn!("Failed to fetch token holdings for {}: {}", address, err);
                0
            }
        }
    }

    /// Balance and holdings for each address, in input order, without duplicates.
    pub async fn refresh_addresses(&self, addresses: &[String]) -> Vec<BalanceUpdate> {
        let mut updates: Vec<BalanceUpdate> = Vec::with_capacity(addresses.len());
        for address in addresses {
            if updates.iter().any(|u| &u.address == address) {
                continue;
            }
            let balance = self.balance_of(address).await;
            let holdings = self.token_holdings_count(address).await;
            updates.push(BalanceUpdate {
                address: address.clone(),
                balance,
                holdings,
            });
        }
        updates
    }

    /// Refresh every non-archived wallet.
    pub async fn refresh_wallets(&self, wallets: &[PublicWallet]) -> Vec<BalanceUpdate> {
        let active = active_addresses(wallets);
        self.refresh_addresses(&active).await
    }

    async fn balance_of(&self, address: &str) -> f64 {
        match self.chain.get_balance_lamports(address).await {
            Ok(lamports) => lamports_to_sol(lamports),
            Err(err) => {
                log::warn!("Failed to fetch balance for {}: {}", address, err);
                0.0
            }
        }
    }

    /// Refresh on a fixed interval until stopped, sending each round on `sender`.
    ///
    /// The first round runs immediately. The loop also ends when the receiver
    /// is dropped.
    pub fn spawn_poller<F>(
        &self,
        interval: Duration,
        address_source: F,
        sender: mpsc::Sender<Vec<BalanceUpdate>>,
    ) -> BalancePoller
    where
        F: Fn() -> Vec<String> + Send + Sync + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let oracle = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let addresses = address_source();
                        if addresses.is_empty() {
                            continue;
                        }
                        let updates = oracle.refresh_addresses(&addresses).await;
                        if sender.send(updates).await.is_err() {
                            log::debug!("Balance receiver dropped, stopping poller");
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        log::debug!("Balance poller shutting down");
                        break;
                    }
                }
            }
        });

        log::info!("Balance poller started (interval={}s)", interval.as_secs());
        BalancePoller {
            shutdown: shutdown_tx,
            handle,
        }
    }
}

pub fn active_addresses(wallets: &[PublicWallet]) -> Vec<String> {
    wallets
        .iter()
        .filter(|w| !w.archived)
        .map(|w| w.address.clone())
        .collect()
}

/// Handle to a running balance poll loop.
pub struct BalancePoller {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BalancePoller {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.handle.await {
            log::warn!("Balance poller task ended abnormally: {}", err);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
