//! Chain access behind a small async trait.
//!
//! The retry engine only talks to [`ChainClient`]. The production
//! implementation wraps an alloy HTTP provider; tests use
//! [`crate::testing::MockChain`].

use alloy::{
    network::ReceiptResponse,
    primitives::{Address, Bytes, TxHash, U256},
    providers::{Provider, ProviderBuilder},
    rpc::client::RpcClient,
    transports::{
        http::reqwest::{Client as HttpClient, Proxy, Url},
        RpcError, TransportErrorKind,
    },
};
use async_trait::async_trait;
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;

use crate::error::{Result, WalletError};

/// Broadcast failure categories the retry controller reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastErrorKind {
    /// The node already has a transaction at or above this nonce
    NonceTooLow,
    /// Balance does not cover value plus gas
    InsufficientFunds,
    /// Gas price below the node's minimum or a replacement was too cheap
    Underpriced,
    /// Any other rejection from the node
    Rejected,
    /// The request never got a JSON-RPC answer
    Transport,
}

impl BroadcastErrorKind {
    /// Maps a node's error message onto a kind. Node implementations share no
    /// error codes for these cases, so this is the single place that reads the
    /// message text.
    pub fn from_node_message(message: &str) -> Self {
        let message = message.to_lowercase();
        if message.contains("nonce too low") || message.contains("nonce is too low") {
            BroadcastErrorKind::NonceTooLow
        } else if message.contains("insufficient funds")
            || message.contains("insufficient balance")
            || message.contains("overshot")
        {
            BroadcastErrorKind::InsufficientFunds
        } else if message.contains("underpriced") || message.contains("fee too low") {
            BroadcastErrorKind::Underpriced
        } else {
            BroadcastErrorKind::Rejected
        }
    }
}

/// A structured broadcast failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct BroadcastError {
    pub kind: BroadcastErrorKind,
    pub message: String,
}

impl BroadcastError {
    pub fn new(kind: BroadcastErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<RpcError<TransportErrorKind>> for BroadcastError {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        let kind = match err.as_error_resp() {
            Some(payload) => BroadcastErrorKind::from_node_message(&payload.message),
            None => BroadcastErrorKind::Transport,
        };
        Self::new(kind, err.to_string())
    }
}

/// The parts of a receipt the engine cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub success: bool,
    pub block_number: Option<u64>,
}

/// Everything the engine needs from a chain endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    async fn balance(&self, address: Address) -> Result<U256>;

    /// Transaction count including transactions still in the mempool.
    async fn pending_nonce(&self, address: Address) -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    async fn send_raw_transaction(
        &self,
        raw: Bytes,
    ) -> std::result::Result<TxHash, BroadcastError>;

    async fn receipt(&self, hash: TxHash) -> Result<Option<ReceiptInfo>>;
}

/// [`ChainClient`] over an alloy HTTP provider, optionally behind a proxy.
pub struct AlloyChainClient {
    provider: Arc<dyn Provider + Send + Sync>,
    endpoint: String,
    proxy: Option<String>,
}

impl AlloyChainClient {
    /// Builds the HTTP transport. No request is made until first use.
    pub fn connect(endpoint: &str, proxy: Option<&str>, timeout: Duration) -> Result<Self> {
        let url: Url = endpoint
            .parse()
            .map_err(|e| WalletError::Config(format!("Invalid RPC URL '{}': {}", endpoint, e)))?;

        let mut builder = HttpClient::builder().timeout(timeout);
        if let Some(proxy_url) = proxy {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| WalletError::Config(format!("Invalid proxy '{}': {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| {
                WalletError::ProviderError(format!("Failed to build HTTP client: {}", e))
            })?;

        let rpc = RpcClient::builder().http_with_client(http, url);
        let provider = ProviderBuilder::new().connect_client(rpc);

        Ok(Self {
            provider: Arc::new(provider),
            endpoint: endpoint.to_string(),
            proxy: proxy.map(str::to_string),
        })
    }
}

impl fmt::Debug for AlloyChainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlloyChainClient")
            .field("endpoint", &self.endpoint)
            .field("proxied", &self.proxy.is_some())
            .finish()
    }
}

fn provider_error(what: &str, e: impl fmt::Display) -> WalletError {
    WalletError::ProviderError(format!("Failed to get {}: {}", what, e))
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| provider_error("chain ID", e))
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| provider_error("wallet balance", e))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64> {
        self.provider
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(|e| provider_error("nonce", e))
    }

    async fn gas_price(&self) -> Result<u128> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| provider_error("gas price", e))
    }

    async fn send_raw_transaction(
        &self,
        raw: Bytes,
    ) -> std::result::Result<TxHash, BroadcastError> {
        let pending = self.provider.send_raw_transaction(&raw).await?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, hash: TxHash) -> Result<Option<ReceiptInfo>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| provider_error("transaction receipt", e))?;
        Ok(receipt.map(|r| ReceiptInfo {
            success: ReceiptResponse::status(&r),
            block_number: ReceiptResponse::block_number(&r),
        }))
    }
}
