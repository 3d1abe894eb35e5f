//! Utility functions for wallet input and value formatting.
//!
//! This module provides helper functions for:
//! - Loading the wallet list
//! - Loading the proxy list
//! - Formatting wei amounts

use std::path::Path;

use alloy::primitives::{utils::format_units, U256};
use tracing::{info, warn};

use crate::{
    error::{Result, WalletError},
    types::Account,
};

/// Standard gas limit for basic ETH transfer transactions
pub const GAS_LIMIT: u64 = 21000;

/// Formats a wei amount as ETH, falling back to the raw wei value.
pub fn format_eth(amount: U256) -> String {
    format_units(amount, "ether").unwrap_or_else(|_| format!("{} wei", amount))
}

/// Parses one wallet-file line.
///
/// Accepted forms are `address:private_key`, `address:private_key;proxy`
/// and a bare private key. Returns `None` for blank lines.
pub fn parse_wallet_line(line: &str) -> Option<Result<Account>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (main_part, proxy) = match line.split_once(';') {
        Some((main, proxy)) => (main, Some(proxy.trim().to_string())),
        None => (line, None),
    };

    let account = match main_part.split_once(':') {
        Some((address, key)) => Account::from_record(Some(address), key, proxy),
        None => Account::from_record(None, main_part, proxy),
    };
    Some(account)
}

/// Loads the wallet list. A missing or empty file is a configuration error,
/// malformed lines are skipped.
pub fn load_wallets(path: &Path) -> Result<Vec<Account>> {
    if !path.exists() {
        return Err(WalletError::Config(format!(
            "wallet file {} not found",
            path.display()
        )));
    }

    let contents = std::fs::read_to_string(path)?;
    let mut wallets = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        match parse_wallet_line(line) {
            Some(Ok(account)) => wallets.push(account),
            Some(Err(e)) => warn!(line = index + 1, error = %e, "Skipping malformed wallet line"),
            None => {}
        }
    }

    if wallets.is_empty() {
        return Err(WalletError::Config(format!(
            "wallet file {} contains no usable wallets",
            path.display()
        )));
    }

    info!(count = wallets.len(), path = %path.display(), "Loaded wallets");
    Ok(wallets)
}

/// Parses one proxy-file line into a proxy URL.
pub fn parse_proxy_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.contains("://") {
        return Some(line.to_string());
    }

    let parts: Vec<&str> = line.split(':').collect();
    if let [host, port, username, password] = parts.as_slice() {
        return Some(format!("http://{}:{}@{}:{}", username, password, host, port));
    }
    Some(line.to_string())
}

/// Loads the proxy list. A missing file means no proxies.
pub fn load_proxies(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        info!(path = %path.display(), "No proxy file, using direct connections");
        return Ok(Vec::new());
    }

    let contents = std::fs::read_to_string(path)?;
    let proxies: Vec<String> = contents.lines().filter_map(parse_proxy_line).collect();
    info!(count = proxies.len(), "Loaded proxies");
    Ok(proxies)
}
