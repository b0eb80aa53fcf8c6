/// Chain RPC client
///
/// HTTP JSON-RPC 2.0 against a Solana-compatible node (or a proxy in front of
/// one). Covers exactly the calls the wallet needs: balances, token account
/// counts, raw transaction submission and signature status polling.
use crate::balance::ChainQuery;
use crate::confirm::{SignatureStatus, TransactionSubmitter};
use crate::errors::{WalletError, WalletResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SPL_TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for chain RPC communication
pub struct RpcClient {
    client: Client,
    url: String,
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, T: Serialize> {
    jsonrpc: &'a str,
    method: &'a str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// `{ context, value }` wrapper used by most read methods.
#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> WalletResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(RpcClient {
            client,
            url: url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Native balance in lamports.
    pub async fn get_balance(&self, address: &str) -> WalletResult<u64> {
        let response: WithContext<u64> = self
            .rpc_call("getBalance", serde_json::json!([address]))
            .await?;
        Ok(response.value)
    }

    /// Number of SPL token accounts owned by `address`.
    pub async fn get_token_accounts_count(&self, address: &str) -> WalletResult<usize> {
        let params = serde_json::json!([
            address,
            { "programId": SPL_TOKEN_PROGRAM_ID },
            { "encoding": "jsonParsed" }
        ]);
        let response: WithContext<Vec<serde_json::Value>> =
            self.rpc_call("getTokenAccountsByOwner", params).await?;
        Ok(response.value.len())
    }

    /// Submit a signed, base64-encoded transaction and return its signature.
    pub async fn send_raw_transaction(&self, tx_base64: &str) -> WalletResult<String> {
        let params = serde_json::json!([
            tx_base64,
            { "encoding": "base64", "skipPreflight": true, "maxRetries": 3 }
        ]);
        self.rpc_call("sendTransaction", params).await
    }

    pub async fn get_signature_status(
        &self,
        signature: &str,
    ) -> WalletResult<Option<SignatureStatus>> {
        let params = serde_json::json!([[signature], { "searchTransactionHistory": true }]);
        let response: WithContext<Vec<Option<SignatureStatus>>> =
            self.rpc_call("getSignatureStatuses", params).await?;
        Ok(response.value.into_iter().next().flatten())
    }

    /// Make a JSON-RPC call to the node
    async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> WalletResult<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| WalletError::NetworkError(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(WalletError::NetworkError(format!(
                "RPC request failed: {}",
                response.status()
            )));
        }

        let rpc_response: JsonRpcResponse<T> = response.json().await.map_err(|e| {
            WalletError::InvalidResponse(format!("Failed to parse {} response: {}", method, e))
        })?;

        unwrap_rpc_response(method, rpc_response)
    }
}

fn unwrap_rpc_response<T>(method: &str, response: JsonRpcResponse<T>) -> WalletResult<T> {
    if let Some(error) = response.error {
        return Err(WalletError::NetworkError(format!(
            "RPC error {}: {}",
            error.code, error.message
        )));
    }

    response
        .result
        .ok_or_else(|| WalletError::InvalidResponse(format!("No result in {} response", method)))
}

#[async_trait]
impl ChainQuery for RpcClient {
    async fn get_balance_lamports(&self, address: &str) -> WalletResult<u64> {
        self.get_balance(address).await
    }

    async fn get_token_account_count(&self, address: &str) -> WalletResult<usize> {
        self.get_token_accounts_count(address).await
    }
}

#[async_trait]
impl TransactionSubmitter for RpcClient {
    async fn send_transaction(&self, tx_base64: &str) -> WalletResult<String> {
        self.send_raw_transaction(tx_base64).await
    }

    async fn signature_status(&self, signature: &str) -> WalletResult<Option<SignatureStatus>> {
        self.get_signature_status(signature).await
    }
}
