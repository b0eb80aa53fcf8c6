// lib.rs - Core library structure for the wallet

pub mod account;
pub mod app_state;
pub mod balance;
pub mod cache;
pub mod config_store;
pub mod confirm;
pub mod crypto;
pub mod dex;
pub mod errors;
pub mod history;
pub mod keys;
pub mod orders;
pub mod prices;
pub mod privacy;
pub mod quote;
pub mod rpc_client;
pub mod session;
pub mod storage;
pub mod token;
pub mod transfer;
pub mod validation;
pub mod wallet_store;

// Re-export common types
pub use account::Profile;
pub use app_state::WalletContext;
pub use balance::{BalanceOracle, BalanceUpdate, ChainQuery};
pub use config_store::{
    ConfigStore, NetworkConfig, PollingConfig, SessionConfig, WalletConfig,
};
pub use confirm::{ConfirmationPolicy, SignatureStatus, TransactionSubmitter};
pub use dex::{SwapExecutor, SwapRouterClient, TokenSwapper};
pub use errors::{WalletError, WalletResult};
pub use history::{SwapHistoryRecord, SwapLedger, TransferKind};
pub use keys::Keypair;
pub use orders::{reconcile_order, OrderStatus, OrderTracker};
pub use prices::{PriceOracle, PriceTable};
pub use privacy::{DepositReceipt, PrivacyPool, WithdrawReceipt};
pub use quote::{Destination, FeePolicy, QuoteRecord, QuoteRejection, QuoteRequest, QuoteSource};
pub use rpc_client::RpcClient;
pub use session::{AccessGuard, Session};
pub use storage::{BackupBundle, FileStore, KeyValueStore, MemoryStore, Vault, WalletPaths};
pub use token::Token;
pub use transfer::{Phase, TransferDesk, TransferEvent, TransferServices, TransferSummary};
pub use validation::InputValidator;
pub use wallet_store::{PublicWallet, WalletRecord, WalletStore};
