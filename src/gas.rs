//! Gas price selection for submission attempts.

use crate::{client::ChainClient, error::Result};

/// 1 gwei in wei
pub const GWEI: u128 = 1_000_000_000;

/// How a logical transfer prices its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPricing {
    /// Ask the chain before every attempt, never going below `floor`.
    Suggested { floor: Option<u128> },
    /// Start at `base` and multiply by `percent / 100` after each failed
    /// attempt that was not a nonce error.
    Escalating { base: u128, percent: u32 },
}

impl GasPricing {
    pub fn suggested() -> Self {
        GasPricing::Suggested { floor: None }
    }

    pub fn escalating(base: u128, percent: u32) -> Self {
        GasPricing::Escalating { base, percent }
    }
}

/// Per-transfer pricing state. A fresh pricer starts from the base price, so
/// escalation never leaks from one transfer into the next.
#[derive(Debug, Clone)]
pub struct GasPricer {
    policy: GasPricing,
    current: u128,
    escalations: u32,
}

impl GasPricer {
    pub fn new(policy: GasPricing) -> Self {
        let current = match policy {
            GasPricing::Escalating { base, .. } => base,
            GasPricing::Suggested { floor } => floor.unwrap_or_default(),
        };
        Self {
            policy,
            current,
            escalations: 0,
        }
    }

    /// Price for the next attempt.
    pub async fn price(&mut self, client: &dyn ChainClient) -> Result<u128> {
        match self.policy {
            GasPricing::Suggested { floor } => {
                let suggested = client.gas_price().await?;
                self.current = floor.map_or(suggested, |floor| suggested.max(floor));
            }
            GasPricing::Escalating { .. } => {}
        }
        Ok(self.current)
    }

    /// Raises the price after a failed attempt. Suggested pricing re-queries
    /// the chain instead, so this is a no-op there.
    pub fn escalate(&mut self) {
        if let GasPricing::Escalating { percent, .. } = self.policy {
            self.current = self.current.saturating_mul(percent as u128) / 100;
            self.escalations += 1;
        }
    }

    pub fn current(&self) -> u128 {
        self.current
    }

    pub fn escalations(&self) -> u32 {
        self.escalations
    }
}
