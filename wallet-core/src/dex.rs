/// Token swaps through an aggregator
///
/// The aggregator quotes a route and returns an unsigned serialized
/// transaction. The transaction is signed in-process and submitted through
/// the chain RPC, so the private key never leaves the wallet.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::confirm::{await_confirmation, ConfirmationPolicy, TransactionSubmitter};
use crate::errors::{WalletError, WalletResult};
use crate::keys::Keypair;
use crate::token::Token;

pub const DEFAULT_SLIPPAGE_BPS: u16 = 100;
const MAX_DYNAMIC_SLIPPAGE_BPS: u16 = 300;
const VERSIONED_MESSAGE_PREFIX: u8 = 0x80;
const SIGNATURE_LEN: usize = 64;
const PUBKEY_LEN: usize = 32;

/// A priced route. `raw` is handed back verbatim when building the swap.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapQuote {
    pub in_amount: u64,
    pub out_amount: u64,
    pub raw: serde_json::Value,
}

impl SwapQuote {
    pub fn from_response(raw: serde_json::Value) -> WalletResult<Self> {
        if let Some(error) = raw.get("error") {
            return Err(WalletError::InvalidResponse(format!(
                "Swap quote error: {}",
                error
            )));
        }
        let in_amount = amount_field(&raw, "inAmount")?;
        let out_amount = amount_field(&raw, "outAmount")?;
        Ok(Self {
            in_amount,
            out_amount,
            raw,
        })
    }
}

fn amount_field(raw: &serde_json::Value, field: &str) -> WalletResult<u64> {
    let value = raw
        .get(field)
        .ok_or_else(|| WalletError::InvalidResponse(format!("Quote is missing {}", field)))?;
    match value {
        serde_json::Value::String(s) => s
            .parse()
            .map_err(|_| WalletError::InvalidResponse(format!("Bad {} in quote: {}", field, s))),
        other => other
            .as_u64()
            .ok_or_else(|| WalletError::InvalidResponse(format!("Bad {} in quote", field))),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedSwap {
    /// Base64 serialized transaction with an empty signature slot.
    pub swap_transaction: String,
    #[serde(default)]
    pub last_valid_block_height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapReceipt {
    pub tx: String,
    pub in_amount: u64,
    pub out_amount: u64,
}

#[async_trait]
pub trait DexService: Send + Sync {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        raw_amount: u64,
        slippage_bps: u16,
    ) -> WalletResult<SwapQuote>;

    async fn build_swap(&self, quote: &SwapQuote, user_pubkey: &str) -> WalletResult<UnsignedSwap>;
}

/// Converts withdrawn native funds into a target token.
#[async_trait]
pub trait TokenSwapper: Send + Sync {
    async fn swap_from_native(
        &self,
        signer: &Keypair,
        lamports: u64,
        output: Token,
    ) -> WalletResult<SwapReceipt>;
}

/// HTTP client for a Jupiter-style swap API.
pub struct SwapRouterClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapBuildRequest<'a> {
    quote_response: &'a serde_json::Value,
    user_public_key: &'a str,
    wrap_and_unwrap_sol: bool,
    dynamic_slippage: DynamicSlippage,
    dynamic_compute_unit_limit: bool,
    prioritization_fee_lamports: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DynamicSlippage {
    max_bps: u16,
}

impl SwapRouterClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> WalletResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
        })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DexService for SwapRouterClient {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        raw_amount: u64,
        slippage_bps: u16,
    ) -> WalletResult<SwapQuote> {
        let response = self
            .client
            .get(format!("{}/swap/v1/quote", self.base_url))
            .query(&[
                ("inputMint", input_mint.to_string()),
                ("outputMint", output_mint.to_string()),
                ("amount", raw_amount.to_string()),
                ("slippageBps", slippage_bps.to_string()),
                ("restrictIntermediateTokens", "true".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WalletError::NetworkError(format!(
                "Swap quote failed ({}): {}",
                status, body
            )));
        }

        SwapQuote::from_response(response.json().await?)
    }

    async fn build_swap(&self, quote: &SwapQuote, user_pubkey: &str) -> WalletResult<UnsignedSwap> {
        let request = SwapBuildRequest {
            quote_response: &quote.raw,
            user_public_key: user_pubkey,
            wrap_and_unwrap_sol: true,
            dynamic_slippage: DynamicSlippage {
                max_bps: MAX_DYNAMIC_SLIPPAGE_BPS,
            },
            dynamic_compute_unit_limit: true,
            prioritization_fee_lamports: "auto",
        };

        let response = self
            .client
            .post(format!("{}/swap/v1/swap", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WalletError::NetworkError(format!(
                "Swap build failed ({}): {}",
                status, body
            )));
        }

        let body: serde_json::Value = response.json().await?;
        if let Some(error) = body.get("error") {
            return Err(WalletError::InvalidResponse(format!("Swap build error: {}", error)));
        }
        Ok(serde_json::from_value(body)?)
    }
}

/// Quote, build, sign locally, submit, confirm.
pub struct SwapExecutor {
    dex: Arc<dyn DexService>,
    submitter: Arc<dyn TransactionSubmitter>,
    confirmation: ConfirmationPolicy,
    slippage_bps: u16,
}

impl SwapExecutor {
    pub fn new(
        dex: Arc<dyn DexService>,
        submitter: Arc<dyn TransactionSubmitter>,
        confirmation: ConfirmationPolicy,
    ) -> Self {
        Self {
            dex,
            submitter,
            confirmation,
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
        }
    }

    pub fn with_slippage_bps(mut self, slippage_bps: u16) -> Self {
        self.slippage_bps = slippage_bps;
        self
    }
}

#[async_trait]
impl TokenSwapper for SwapExecutor {
    async fn swap_from_native(
        &self,
        signer: &Keypair,
        lamports: u64,
        output: Token,
    ) -> WalletResult<SwapReceipt> {
        if output.is_native() {
            return Err(WalletError::ValidationError(
                "Swap output must differ from the native asset".to_string(),
            ));
        }
        if lamports == 0 {
            return Err(WalletError::InvalidAmount(
                "Nothing left to swap after fees".to_string(),
            ));
        }

        let quote = self
            .dex
            .quote(Token::Sol.mint(), output.mint(), lamports, self.slippage_bps)
            .await?;
        log::debug!(
            "Swap route {} lamports -> {} raw {}",
            quote.in_amount,
            quote.out_amount,
            output
        );

        let unsigned = self.dex.build_swap(&quote, &signer.address()).await?;
        let tx_bytes = BASE64.decode(unsigned.swap_transaction.trim()).map_err(|e| {
            WalletError::InvalidResponse(format!("Swap transaction is not base64: {}", e))
        })?;
        let signed = sign_serialized_transaction(&tx_bytes, signer)?;
        let signed_b64 = BASE64.encode(&signed);

        let signature = self.submitter.send_transaction(&signed_b64).await?;
        log::info!("Submitted swap {} to {}", signature, output);
        await_confirmation(
            self.submitter.as_ref(),
            &signature,
            Some(&signed_b64),
            &self.confirmation,
        )
        .await?;

        Ok(SwapReceipt {
            tx: signature,
            in_amount: quote.in_amount,
            out_amount: quote.out_amount,
        })
    }
}

fn decode_shortvec(bytes: &[u8], offset: usize) -> WalletResult<(usize, usize)> {
    let mut value = 0usize;
    for i in 0..3 {
        let byte = *bytes
            .get(offset + i)
            .ok_or_else(|| WalletError::InvalidResponse("Truncated transaction".to_string()))?;
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(WalletError::InvalidResponse(
        "Malformed length prefix in transaction".to_string(),
    ))
}

/// Sign a wire-format transaction as its fee payer.
///
/// Layout: compact signature count, signatures, message. The signer must be
/// account key 0 of the message; its signature goes in slot 0.
pub fn sign_serialized_transaction(tx: &[u8], signer: &Keypair) -> WalletResult<Vec<u8>> {
    let (signature_count, prefix_len) = decode_shortvec(tx, 0)?;
    if signature_count == 0 {
        return Err(WalletError::InvalidResponse(
            "Transaction has no signature slots".to_string(),
        ));
    }

    let message_start = prefix_len + signature_count * SIGNATURE_LEN;
    let message = tx.get(message_start..).ok_or_else(|| {
        WalletError::InvalidResponse("Transaction shorter than its signatures".to_string())
    })?;

    // versioned messages carry a prefix byte before the 3-byte header
    let header_start = match message.first() {
        Some(byte) if byte & VERSIONED_MESSAGE_PREFIX != 0 => 1,
        Some(_) => 0,
        None => {
            return Err(WalletError::InvalidResponse(
                "Transaction has an empty message".to_string(),
            ))
        }
    };
    let required_signatures = *message
        .get(header_start)
        .ok_or_else(|| WalletError::InvalidResponse("Truncated message header".to_string()))?;
    if required_signatures == 0 {
        return Err(WalletError::InvalidResponse(
            "Message requires no signatures".to_string(),
        ));
    }

    let keys_offset = header_start + 3;
    let (key_count, key_prefix_len) = decode_shortvec(message, keys_offset)?;
    if key_count == 0 {
        return Err(WalletError::InvalidResponse(
            "Message has no account keys".to_string(),
        ));
    }
    let fee_payer_start = keys_offset + key_prefix_len;
    let fee_payer = message
        .get(fee_payer_start..fee_payer_start + PUBKEY_LEN)
        .ok_or_else(|| WalletError::InvalidResponse("Truncated account keys".to_string()))?;

    if fee_payer != signer.pubkey_bytes().as_slice() {
        return Err(WalletError::InvalidKey(
            "Swap transaction fee payer does not match the signing wallet".to_string(),
        ));
    }

    let signature = signer.sign(message);
    let mut signed = tx.to_vec();
    signed[prefix_len..prefix_len + SIGNATURE_LEN].copy_from_slice(&signature);
    Ok(signed)
}
