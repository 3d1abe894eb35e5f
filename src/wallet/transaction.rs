use alloy::{
    eips::eip2718::Encodable2718,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Bytes, TxHash},
};
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    client::{BroadcastErrorKind, ChainClient, ReceiptInfo},
    types::{FailureReason, SubmissionOutcome, TransactionIntent},
    utils::format_eth,
};

/// Builds, signs and broadcasts single transactions. Never retries; that is
/// the retry controller's job.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    receipt_poll_interval: Duration,
}

impl TransactionManager {
    pub fn new(receipt_poll_interval: Duration) -> Self {
        Self {
            receipt_poll_interval,
        }
    }

    /// Signs `intent` with `wallet` and broadcasts it exactly once.
    ///
    /// With a zero `confirm_timeout` the call returns as soon as the node
    /// accepts the transaction; otherwise it polls for a receipt until the
    /// timeout expires.
    pub async fn execute(
        &self,
        intent: &TransactionIntent,
        wallet: &EthereumWallet,
        client: &dyn ChainClient,
        confirm_timeout: Duration,
    ) -> SubmissionOutcome {
        let envelope = match intent.to_request().build(wallet).await {
            Ok(envelope) => envelope,
            Err(e) => {
                return SubmissionOutcome::Failed(FailureReason::Error(format!(
                    "Failed to build transaction: {}",
                    e
                )))
            }
        };
        let raw = Bytes::from(envelope.encoded_2718());

        info!(
            chain_id = intent.chain_id,
            from = %intent.from,
            to = %intent.to,
            nonce = intent.nonce,
            value_eth = %format_eth(intent.value),
            gas_price = intent.gas_price,
            gas_limit = intent.gas_limit,
            "Sending transaction"
        );

        let hash = match client.send_raw_transaction(raw).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(
                    nonce = intent.nonce,
                    kind = ?e.kind,
                    error = %e.message,
                    "Broadcast rejected"
                );
                return SubmissionOutcome::Failed(failure_for(e.kind, &e.message));
            }
        };

        if confirm_timeout.is_zero() {
            return SubmissionOutcome::SentUnconfirmed(hash);
        }

        let start = tokio::time::Instant::now();
        match self.wait_for_receipt(client, hash, confirm_timeout).await {
            Some(receipt) if receipt.success => {
                info!(
                    tx_hash = %hash,
                    block = ?receipt.block_number,
                    elapsed = ?start.elapsed(),
                    "Transaction landed"
                );
                SubmissionOutcome::Confirmed {
                    hash,
                    block_number: receipt.block_number,
                }
            }
            Some(_) => {
                warn!(tx_hash = %hash, "Transaction reverted");
                SubmissionOutcome::Failed(FailureReason::Reverted)
            }
            None => {
                warn!(tx_hash = %hash, timeout = ?confirm_timeout, "No receipt before timeout");
                SubmissionOutcome::SentUnconfirmed(hash)
            }
        }
    }

    /// Polls for a receipt until one appears or `limit` elapses. Receipt
    /// query errors are treated as "not yet".
    pub async fn wait_for_receipt(
        &self,
        client: &dyn ChainClient,
        hash: TxHash,
        limit: Duration,
    ) -> Option<ReceiptInfo> {
        let poll = async {
            let mut ticker = interval(self.receipt_poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match client.receipt(hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => debug!(tx_hash = %hash, "Transaction pending"),
                    Err(e) => debug!(tx_hash = %hash, error = %e, "Receipt query failed"),
                }
            }
        };
        timeout(limit, poll).await.ok()
    }

    /// Returns the first of `hashes` that has a successful receipt.
    pub async fn find_landed(
        &self,
        client: &dyn ChainClient,
        hashes: &[TxHash],
    ) -> Option<(TxHash, ReceiptInfo)> {
        for hash in hashes.iter().rev() {
            if let Ok(Some(receipt)) = client.receipt(*hash).await {
                if receipt.success {
                    return Some((*hash, receipt));
                }
            }
        }
        None
    }
}

fn failure_for(kind: BroadcastErrorKind, message: &str) -> FailureReason {
    match kind {
        BroadcastErrorKind::NonceTooLow => FailureReason::NonceTooLow,
        BroadcastErrorKind::InsufficientFunds => FailureReason::InsufficientFunds,
        BroadcastErrorKind::Underpriced
        | BroadcastErrorKind::Rejected
        | BroadcastErrorKind::Transport => FailureReason::Transient(message.to_string()),
    }
}
