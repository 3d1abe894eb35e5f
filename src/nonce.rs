//! Local nonce authority per (account, chain).
//!
//! A pair is seeded from the chain's pending transaction count the first time
//! it is used and then advanced locally. Access goes through a [`NonceLease`],
//! which holds the pair's lock for a whole attempt cycle so two submissions for
//! the same pair can never be handed the same nonce.

use alloy::primitives::Address;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::{client::ChainClient, error::Result};

type NonceKey = (Address, u64);

#[derive(Debug, Default)]
struct NonceSlot {
    next: Option<u64>,
}

/// Registry of per-pair nonce state for one run.
#[derive(Default)]
pub struct NonceTracker {
    slots: Mutex<HashMap<NonceKey, Arc<AsyncMutex<NonceSlot>>>>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, address: Address, chain_id: u64) -> Arc<AsyncMutex<NonceSlot>> {
        self.slots
            .lock()
            .entry((address, chain_id))
            .or_default()
            .clone()
    }

    /// Waits until no other cycle holds the pair, then grants it.
    pub async fn lease(
        &self,
        address: Address,
        chain_id: u64,
        client: Arc<dyn ChainClient>,
    ) -> NonceLease {
        let guard = self.slot(address, chain_id).lock_owned().await;
        NonceLease {
            address,
            chain_id,
            client,
            guard,
        }
    }

    /// The working nonce for a pair, once no lease holds it.
    pub async fn current(&self, address: Address, chain_id: u64) -> Option<u64> {
        let slot = self.slots.lock().get(&(address, chain_id)).cloned()?;
        let guard = slot.lock().await;
        guard.next
    }
}

/// Exclusive hold on one (account, chain) pair.
pub struct NonceLease {
    address: Address,
    chain_id: u64,
    client: Arc<dyn ChainClient>,
    guard: OwnedMutexGuard<NonceSlot>,
}

impl NonceLease {
    /// The nonce the next submission must use.
    pub async fn acquire(&mut self) -> Result<u64> {
        if let Some(nonce) = self.guard.next {
            return Ok(nonce);
        }
        let nonce = self.client.pending_nonce(self.address).await?;
        debug!(address = %self.address, chain_id = self.chain_id, nonce, "Seeded nonce from chain");
        self.guard.next = Some(nonce);
        Ok(nonce)
    }

    /// Moves past `used`, the nonce of the transaction that was accepted.
    /// A resync that already put the working nonce further ahead is kept.
    pub fn advance(&mut self, used: u64) {
        let next = match self.guard.next {
            Some(current) => current.max(used + 1),
            None => {
                warn!(address = %self.address, used, "Marking a nonce on an unseeded pair");
                used + 1
            }
        };
        self.guard.next = Some(next);
    }

    /// Drops the local value and reloads it from the chain.
    pub async fn resync(&mut self) -> Result<u64> {
        let previous = self.guard.next.take();
        let nonce = self.client.pending_nonce(self.address).await?;
        debug!(
            address = %self.address,
            chain_id = self.chain_id,
            ?previous,
            nonce,
            "Resynced nonce from chain"
        );
        self.guard.next = Some(nonce);
        Ok(nonce)
    }

    pub fn peek(&self) -> Option<u64> {
        self.guard.next
    }

    pub fn address(&self) -> Address {
        self.address
    }
}
