//! Core type definitions for wallet operations.
//!
//! This module contains the accounts that sign, the transactions they submit,
//! and the outcomes reported back to the orchestrator.

use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, TxHash, U256},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use chrono::{DateTime, Utc};
use core::fmt;
use std::{
    collections::BTreeMap,
    fmt::{Debug, Display},
    time::Duration,
};
use tracing::warn;

use crate::error::{Result, WalletError};

/// A signing account. The address is always the one derived from the key.
#[derive(Clone)]
pub struct Account {
    signer: PrivateKeySigner,
    /// Proxy assigned to this wallet in the wallet file, if any
    pub proxy: Option<String>,
}

impl Account {
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let key = private_key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|e| WalletError::Config(format!("Invalid private key: {}", e)))?;
        Ok(Self {
            signer,
            proxy: None,
        })
    }

    /// Generates a new random account
    pub fn generate() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
            proxy: None,
        }
    }

    /// Builds an account from a wallet-file record. A declared address that
    /// does not match the key is reported and ignored.
    pub fn from_record(
        declared: Option<&str>,
        private_key: &str,
        proxy: Option<String>,
    ) -> Result<Self> {
        let mut account = Self::from_private_key(private_key)?;
        if let Some(declared) = declared {
            match declared.trim().parse::<Address>() {
                Ok(address) if address == account.address() => {}
                _ => warn!(
                    declared = declared.trim(),
                    derived = %account.address(),
                    "Declared address does not match private key, using derived address"
                ),
            }
        }
        account.proxy = proxy.filter(|p| !p.is_empty());
        Ok(account)
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn wallet(&self) -> EthereumWallet {
        EthereumWallet::new(self.signer.clone())
    }
}

impl Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address())
            .field("proxy", &self.proxy.is_some())
            .finish()
    }
}

/// What a logical transfer wants to send. Nonce and gas price are decided
/// per attempt by the retry controller.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: u64,
}

impl TransferRequest {
    pub fn native(to: Address, value: U256, gas_limit: u64) -> Self {
        Self {
            to,
            value,
            data: Bytes::new(),
            gas_limit,
        }
    }
}

/// A fully specified transaction, ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub chain_id: u64,
    pub nonce: u64,
}

impl TransactionIntent {
    pub fn to_request(&self) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.from)
            .with_to(self.to)
            .with_value(self.value)
            .with_input(self.data.clone())
            .with_gas_limit(self.gas_limit)
            .with_gas_price(self.gas_price)
            .with_chain_id(self.chain_id)
            .with_nonce(self.nonce)
    }
}

/// Why a unit of work did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NonceTooLow,
    InsufficientFunds,
    Reverted,
    Transient(String),
    Exhausted { attempts: u32, last_error: String },
    MalformedQuote(String),
    QuoteUnavailable(String),
    Error(String),
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NonceTooLow => write!(f, "nonce too low"),
            FailureReason::InsufficientFunds => write!(f, "insufficient funds"),
            FailureReason::Reverted => write!(f, "reverted"),
            FailureReason::Transient(msg) => write!(f, "transient: {}", msg),
            FailureReason::Exhausted {
                attempts,
                last_error,
            } => write!(f, "exhausted after {} attempts: {}", attempts, last_error),
            FailureReason::MalformedQuote(msg) => write!(f, "malformed quote: {}", msg),
            FailureReason::QuoteUnavailable(msg) => write!(f, "quote unavailable: {}", msg),
            FailureReason::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Terminal result of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Confirmed {
        hash: TxHash,
        block_number: Option<u64>,
    },
    SentUnconfirmed(TxHash),
    Failed(FailureReason),
    Skipped(String),
}

impl SubmissionOutcome {
    /// Confirmed, or accepted by the node when no confirmation was requested.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SubmissionOutcome::Confirmed { .. } | SubmissionOutcome::SentUnconfirmed(_)
        )
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, SubmissionOutcome::Skipped(_))
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            SubmissionOutcome::Confirmed { hash, .. }
            | SubmissionOutcome::SentUnconfirmed(hash) => Some(*hash),
            _ => None,
        }
    }

    /// Short status used in the run summary.
    pub fn status(&self) -> &'static str {
        match self {
            SubmissionOutcome::Confirmed { .. } => "Tx Successful",
            SubmissionOutcome::SentUnconfirmed(_) => "Tx Sent",
            SubmissionOutcome::Skipped(_) => "Skipped",
            SubmissionOutcome::Failed(FailureReason::InsufficientFunds) => {
                "FAILED (Insufficient funds)"
            }
            SubmissionOutcome::Failed(
                FailureReason::MalformedQuote(_) | FailureReason::QuoteUnavailable(_),
            ) => "Quote Error",
            SubmissionOutcome::Failed(_) => "Tx Error",
        }
    }
}

impl Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionOutcome::Confirmed { hash, .. } => write!(f, "{} ({})", self.status(), hash),
            SubmissionOutcome::SentUnconfirmed(hash) => write!(f, "{} ({})", self.status(), hash),
            SubmissionOutcome::Failed(reason) => write!(f, "{} ({})", self.status(), reason),
            SubmissionOutcome::Skipped(reason) => write!(f, "{} ({})", self.status(), reason),
        }
    }
}

/// Identifies one unit of work in the results mapping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkKey {
    /// The wallet the unit is reported against
    pub account: Address,
    /// Chain the unit ran on
    pub chain: String,
    /// Caller-chosen label, e.g. the destination chain or `base#12`
    pub label: String,
}

impl WorkKey {
    pub fn new(account: Address, chain: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            account,
            chain: chain.into(),
            label: label.into(),
        }
    }
}

impl Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.account, self.label)
    }
}

/// The operations the binary can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Bridge native ETH from `from` to each chain in `to` through the quote service
    Bridge {
        from: String,
        to: String,
        amount: U256,
    },
    /// First wallet funds every other wallet
    Disperse,
    /// Every other wallet sweeps into the first wallet
    Collect,
    /// Every wallet sends to itself until its nonce reaches the target
    SelfTransfer,
}

impl Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Bridge { from, to, .. } => write!(f, "bridge {} -> {}", from, to),
            Operation::Disperse => write!(f, "disperse"),
            Operation::Collect => write!(f, "collect"),
            Operation::SelfTransfer => write!(f, "self-transfer"),
        }
    }
}

/// Overall status of a wallet after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Success,
    Failed,
}

impl Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Success => write!(f, "SUCCESS"),
            AccountStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Result of running one operation across every wallet and network.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub time_elapsed: Duration,
    pub results: BTreeMap<WorkKey, SubmissionOutcome>,
}

impl ExecutionResult {
    pub fn successful_count(&self) -> usize {
        self.results.values().filter(|o| o.is_success()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.results.values().filter(|o| o.is_skipped()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .values()
            .filter(|o| matches!(o, SubmissionOutcome::Failed(_)))
            .count()
    }

    /// SUCCESS if any unit reported against the account succeeded.
    pub fn account_status(&self, account: Address) -> AccountStatus {
        let any_success = self
            .results
            .iter()
            .any(|(key, outcome)| key.account == account && outcome.is_success());
        if any_success {
            AccountStatus::Success
        } else {
            AccountStatus::Failed
        }
    }

    /// Number of successful units per chain, in chain name order.
    pub fn successes_by_chain(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (key, outcome) in &self.results {
            let entry = counts.entry(key.chain.clone()).or_insert(0);
            if outcome.is_success() {
                *entry += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANVIL_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ANVIL_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn account_derives_address_from_key() {
        let account = Account::from_private_key(&format!("0x{}", ANVIL_KEY)).unwrap();
        assert_eq!(account.address(), ANVIL_ADDRESS.parse::<Address>().unwrap());
    }

    #[test]
    fn mismatched_declared_address_is_ignored() {
        let account = Account::from_record(
            Some("0x0000000000000000000000000000000000000001"),
            ANVIL_KEY,
            Some(String::new()),
        )
        .unwrap();
        assert_eq!(account.address(), ANVIL_ADDRESS.parse::<Address>().unwrap());
        assert!(account.proxy.is_none());
    }

    #[test]
    fn debug_never_prints_the_key() {
        let account = Account::from_private_key(ANVIL_KEY).unwrap();
        let printed = format!("{:?}", account);
        assert!(!printed.contains(ANVIL_KEY));
    }

    #[test]
    fn status_vocabulary() {
        assert_eq!(
            SubmissionOutcome::Failed(FailureReason::InsufficientFunds).status(),
            "FAILED (Insufficient funds)"
        );
        assert_eq!(
            SubmissionOutcome::Failed(FailureReason::MalformedQuote("x".into())).status(),
            "Quote Error"
        );
        assert_eq!(
            SubmissionOutcome::Failed(FailureReason::Reverted).status(),
            "Tx Error"
        );
        assert_eq!(SubmissionOutcome::Skipped("full".into()).status(), "Skipped");
    }

    #[test]
    fn account_status_requires_one_success() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let mut results = BTreeMap::new();
        results.insert(
            WorkKey::new(a, "base", "ink"),
            SubmissionOutcome::Failed(FailureReason::Reverted),
        );
        results.insert(
            WorkKey::new(a, "base", "mode"),
            SubmissionOutcome::Confirmed {
                hash: TxHash::ZERO,
                block_number: Some(1),
            },
        );
        results.insert(
            WorkKey::new(b, "base", "ink"),
            SubmissionOutcome::Skipped("funded".into()),
        );
        let report = ExecutionResult {
            operation: "bridge".into(),
            started_at: Utc::now(),
            time_elapsed: Duration::ZERO,
            results,
        };
        assert_eq!(report.account_status(a), AccountStatus::Success);
        assert_eq!(report.account_status(b), AccountStatus::Failed);
        assert_eq!(report.successful_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.successes_by_chain().get("base"), Some(&1));
    }
}
