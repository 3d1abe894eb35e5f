//! In-memory chain used by the test suites.
//!
//! Broadcast responses are scripted in order; once the script runs out every
//! broadcast is accepted and confirmed.

use alloy::{
    consensus::{Transaction, TxEnvelope},
    eips::eip2718::Decodable2718,
    primitives::{keccak256, Address, Bytes, TxHash, U256},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use crate::{
    chains::ChainTarget,
    client::{BroadcastError, BroadcastErrorKind, ChainClient, ReceiptInfo},
    error::{Result, WalletError},
    pool::ConnectionPool,
    wallet::Config,
};

/// Connection pool that hands out the given mocks by RPC endpoint.
pub fn mock_pool(chains: &[(ChainTarget, Arc<MockChain>)]) -> ConnectionPool {
    let by_endpoint: HashMap<String, Arc<MockChain>> = chains
        .iter()
        .map(|(target, chain)| (target.rpc_url.clone(), chain.clone()))
        .collect();
    ConnectionPool::with_connector(Vec::new(), move |target, _| {
        by_endpoint
            .get(&target.rpc_url)
            .map(|chain| chain.clone() as Arc<dyn ChainClient>)
            .ok_or_else(|| WalletError::UnknownChain(target.name.clone()))
    })
}

/// Default configuration with every delay shortened for tests.
pub fn fast_config() -> Config {
    let mut config = Config {
        retry_delay: Duration::ZERO,
        insufficient_funds_delay: Duration::ZERO,
        inter_tx_delay: Duration::ZERO,
        receipt_poll_interval: Duration::from_millis(2),
        ..Config::default()
    };
    config.bridge.confirm_timeout = Duration::from_millis(50);
    config.collect.confirm_timeout = Duration::from_millis(50);
    config
}

/// How the mock answers one broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    /// Accepted and immediately mined successfully
    Accept,
    /// Accepted, mined, but the receipt reports failure
    Revert,
    /// Accepted, never mined
    Stall,
    /// Accepted, mined just before the n-th following broadcast arrives
    LandAfter(usize),
    /// Rejected with the given kind
    Reject(BroadcastErrorKind),
}

/// A transaction the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTx {
    pub hash: TxHash,
    pub to: Option<Address>,
    pub value: U256,
    pub nonce: u64,
    pub gas_price: u128,
    pub accepted: bool,
}

#[derive(Default)]
struct State {
    nonces: HashMap<Address, u64>,
    balances: HashMap<Address, U256>,
    gas_price: u128,
    script: VecDeque<Broadcast>,
    receipts: HashMap<TxHash, ReceiptInfo>,
    landing: Vec<(TxHash, usize)>,
    sent: Vec<SentTx>,
    nonce_queries: usize,
    fail_gas_price: bool,
}

pub struct MockChain {
    chain_id: u64,
    state: Mutex<State>,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(State {
                gas_price: 1_000_000_000,
                ..State::default()
            }),
        }
    }

    pub fn with_gas_price(self, gas_price: u128) -> Self {
        self.state.lock().gas_price = gas_price;
        self
    }

    pub fn set_pending_nonce(&self, address: Address, nonce: u64) {
        self.state.lock().nonces.insert(address, nonce);
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().balances.insert(address, balance);
    }

    pub fn set_gas_price(&self, gas_price: u128) {
        self.state.lock().gas_price = gas_price;
    }

    pub fn fail_gas_price(&self, fail: bool) {
        self.state.lock().fail_gas_price = fail;
    }

    pub fn script(&self, responses: impl IntoIterator<Item = Broadcast>) {
        self.state.lock().script.extend(responses);
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().sent.clone()
    }

    pub fn broadcast_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn nonce_queries(&self) -> usize {
        self.state.lock().nonce_queries
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self
            .state
            .lock()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64> {
        let mut state = self.state.lock();
        state.nonce_queries += 1;
        Ok(state.nonces.get(&address).copied().unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<u128> {
        let state = self.state.lock();
        if state.fail_gas_price {
            return Err(WalletError::ProviderError("gas price unavailable".to_string()));
        }
        Ok(state.gas_price)
    }

    async fn send_raw_transaction(
        &self,
        raw: Bytes,
    ) -> std::result::Result<TxHash, BroadcastError> {
        let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())
            .map_err(|e| BroadcastError::new(BroadcastErrorKind::Rejected, e.to_string()))?;
        let hash = keccak256(&raw);

        let mut state = self.state.lock();
        for (_, remaining) in state.landing.iter_mut() {
            *remaining -= 1;
        }
        let (landed, pending): (Vec<_>, Vec<_>) =
            state.landing.drain(..).partition(|(_, remaining)| *remaining == 0);
        state.landing = pending;
        for (landed_hash, _) in landed {
            state.receipts.insert(
                landed_hash,
                ReceiptInfo {
                    success: true,
                    block_number: Some(2),
                },
            );
        }

        let response = state.script.pop_front().unwrap_or(Broadcast::Accept);
        let accepted = !matches!(response, Broadcast::Reject(_));
        state.sent.push(SentTx {
            hash,
            to: envelope.to(),
            value: envelope.value(),
            nonce: envelope.nonce(),
            gas_price: envelope.gas_price().unwrap_or_default(),
            accepted,
        });

        match response {
            Broadcast::Accept => {
                state.receipts.insert(
                    hash,
                    ReceiptInfo {
                        success: true,
                        block_number: Some(1),
                    },
                );
            }
            Broadcast::Revert => {
                state.receipts.insert(
                    hash,
                    ReceiptInfo {
                        success: false,
                        block_number: Some(1),
                    },
                );
            }
            Broadcast::Stall => {}
            Broadcast::LandAfter(broadcasts) => state.landing.push((hash, broadcasts.max(1))),
            Broadcast::Reject(kind) => {
                return Err(BroadcastError::new(kind, format!("scripted {:?}", kind)));
            }
        }
        Ok(hash)
    }

    async fn receipt(&self, hash: TxHash) -> Result<Option<ReceiptInfo>> {
        Ok(self.state.lock().receipts.get(&hash).copied())
    }
}
