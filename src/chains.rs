//! Static registry of the EVM chains the operations run against.

use std::fmt;

use crate::error::{Result, WalletError};

/// A chain the tool can submit transactions to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainTarget {
    /// Lowercase registry name, e.g. `base`
    pub name: String,
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// EIP-155 chain id
    pub chain_id: u64,
}

impl ChainTarget {
    pub fn new(name: impl Into<String>, rpc_url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            name: name.into(),
            rpc_url: rpc_url.into(),
            chain_id,
        }
    }
}

impl fmt::Display for ChainTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.chain_id)
    }
}

const DEFAULT_CHAINS: &[(&str, &str, u64)] = &[
    ("optimism", "https://optimism-mainnet.public.blastapi.io", 10),
    ("base", "https://mainnet.base.org", 8453),
    ("mode", "https://mode.drpc.org", 34443),
    ("ink", "https://rpc-qnd.inkonchain.com", 57073),
    ("soneium", "https://rpc.soneium.org", 1868),
    ("unichain", "https://unichain-rpc.publicnode.com", 130),
    ("lisk", "https://rpc.lisk.io", 1135),
];

/// Name → endpoint lookup table, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    chains: Vec<ChainTarget>,
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new(
            DEFAULT_CHAINS
                .iter()
                .map(|(name, rpc, id)| ChainTarget::new(*name, *rpc, *id))
                .collect(),
        )
    }
}

impl ChainRegistry {
    pub fn new(chains: Vec<ChainTarget>) -> Self {
        Self { chains }
    }

    /// Looks a chain up by name, ignoring case and surrounding whitespace.
    pub fn get(&self, name: &str) -> Result<&ChainTarget> {
        let wanted = name.trim();
        self.chains
            .iter()
            .find(|chain| chain.name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| WalletError::UnknownChain(wanted.to_string()))
    }

    /// Resolves a comma separated selection, or `all` for every chain.
    pub fn select(&self, selection: &str) -> Result<Vec<ChainTarget>> {
        if selection.trim().eq_ignore_ascii_case("all") {
            return Ok(self.chains.clone());
        }

        let mut selected: Vec<ChainTarget> = Vec::new();
        for name in selection.split(',').filter(|s| !s.trim().is_empty()) {
            let chain = self.get(name)?;
            if !selected.contains(chain) {
                selected.push(chain.clone());
            }
        }

        if selected.is_empty() {
            return Err(WalletError::Config("no chains selected".to_string()));
        }
        Ok(selected)
    }

    /// Every chain except `source`, used as bridge destinations for `all`.
    pub fn others(&self, source: &ChainTarget) -> Vec<ChainTarget> {
        self.chains
            .iter()
            .filter(|chain| chain.chain_id != source.chain_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = ChainRegistry::default();
        assert_eq!(registry.get("Base").unwrap().chain_id, 8453);
        assert_eq!(registry.get(" OPTIMISM ").unwrap().chain_id, 10);
    }

    #[test]
    fn unknown_chain_is_an_error() {
        let registry = ChainRegistry::default();
        let err = registry.get("solana").unwrap_err();
        assert!(matches!(err, WalletError::UnknownChain(name) if name == "solana"));
    }

    #[test]
    fn select_all_and_lists() {
        let registry = ChainRegistry::default();
        assert_eq!(registry.select("all").unwrap().len(), 7);

        let picked = registry.select("base, ink,base").unwrap();
        let names: Vec<_> = picked.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["base", "ink"]);

        assert!(registry.select(" , ").is_err());
    }

    #[test]
    fn others_excludes_source() {
        let registry = ChainRegistry::default();
        let base = registry.get("base").unwrap().clone();
        let others = registry.others(&base);
        assert_eq!(others.len(), 6);
        assert!(others.iter().all(|c| c.name != "base"));
    }
}
