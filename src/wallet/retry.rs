use alloy::primitives::TxHash;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    chains::ChainTarget,
    client::ChainClient,
    error::Result,
    gas::{GasPricer, GasPricing},
    nonce::{NonceLease, NonceTracker},
    types::{Account, FailureReason, SubmissionOutcome, TransactionIntent, TransferRequest},
};

use super::transaction::TransactionManager;

/// Attempt budget and delays for one logical transfer.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts charged before giving up
    pub max_attempts: u32,
    /// Free nonce resyncs after "nonce too low"
    pub max_nonce_resyncs: u32,
    /// Delay after a transient failure
    pub retry_delay: Duration,
    /// Delay after an insufficient-funds rejection
    pub insufficient_funds_delay: Duration,
    /// Receipt wait; zero means accept on broadcast
    pub confirm_timeout: Duration,
    /// Never build a transaction at or above this nonce
    pub nonce_limit: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_nonce_resyncs: 3,
            retry_delay: Duration::from_secs(3),
            insufficient_funds_delay: Duration::from_secs(3),
            confirm_timeout: Duration::ZERO,
            nonce_limit: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_confirm_timeout(mut self, confirm_timeout: Duration) -> Self {
        self.confirm_timeout = confirm_timeout;
        self
    }

    pub fn with_nonce_limit(mut self, limit: u64) -> Self {
        self.nonce_limit = Some(limit);
        self
    }

    fn accepts_unconfirmed(&self) -> bool {
        self.confirm_timeout.is_zero()
    }
}

enum RetryState {
    Building,
    Attempting(TransactionIntent),
    Recovering(FailureReason),
    /// Outcome and the nonce the successful transaction used
    Succeeded(SubmissionOutcome, u64),
    Exhausted(FailureReason),
}

/// Drives one logical transfer through attempts until it succeeds or the
/// budget runs out. Holds the (account, chain) nonce lease for the whole cycle.
pub struct RetryController {
    executor: TransactionManager,
    nonces: Arc<NonceTracker>,
}

impl RetryController {
    pub fn new(executor: TransactionManager, nonces: Arc<NonceTracker>) -> Self {
        Self { executor, nonces }
    }

    pub fn nonces(&self) -> &NonceTracker {
        &self.nonces
    }

    /// Takes the pair's lease and submits `request` under `policy`.
    pub async fn submit(
        &self,
        account: &Account,
        chain: &ChainTarget,
        client: Arc<dyn ChainClient>,
        request: &TransferRequest,
        pricing: GasPricing,
        policy: &RetryPolicy,
    ) -> SubmissionOutcome {
        let mut lease = self
            .nonces
            .lease(account.address(), chain.chain_id, client.clone())
            .await;
        self.submit_with_lease(
            &mut lease,
            account,
            chain,
            client.as_ref(),
            request,
            pricing,
            policy,
        )
        .await
    }

    /// Same as [`Self::submit`] for a caller that already holds the lease,
    /// e.g. a loop sending several transfers from one account.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_with_lease(
        &self,
        lease: &mut NonceLease,
        account: &Account,
        chain: &ChainTarget,
        client: &dyn ChainClient,
        request: &TransferRequest,
        pricing: GasPricing,
        policy: &RetryPolicy,
    ) -> SubmissionOutcome {
        let wallet = account.wallet();
        let mut gas = GasPricer::new(pricing);
        let mut attempts: u32 = 0;
        let mut resyncs: u32 = 0;
        // every accepted broadcast of this cycle with its nonce
        let mut broadcasts: Vec<(TxHash, u64)> = Vec::new();
        let mut state = RetryState::Building;

        loop {
            state = match state {
                RetryState::Building => {
                    attempts += 1;
                    let built = self
                        .build_intent(lease, &mut gas, account, chain, client, request)
                        .await;
                    match built {
                        Ok(intent) if policy.nonce_limit.is_some_and(|l| intent.nonce >= l) => {
                            if let Some((outcome, used)) =
                                self.find_landed(client, &broadcasts).await
                            {
                                RetryState::Succeeded(outcome, used)
                            } else {
                                info!(
                                    address = %account.address(),
                                    chain = %chain.name,
                                    nonce = intent.nonce,
                                    "Nonce limit reached, nothing sent"
                                );
                                return SubmissionOutcome::Skipped(format!(
                                    "nonce {} reached the limit",
                                    intent.nonce
                                ));
                            }
                        }
                        Ok(intent) => RetryState::Attempting(intent),
                        Err(e) => RetryState::Recovering(FailureReason::Transient(e.to_string())),
                    }
                }

                RetryState::Attempting(intent) => {
                    let outcome = self
                        .executor
                        .execute(&intent, &wallet, client, policy.confirm_timeout)
                        .await;
                    if let Some(hash) = outcome.tx_hash() {
                        broadcasts.push((hash, intent.nonce));
                    }
                    match outcome {
                        SubmissionOutcome::Confirmed { .. } => {
                            RetryState::Succeeded(outcome, intent.nonce)
                        }
                        SubmissionOutcome::SentUnconfirmed(_) if policy.accepts_unconfirmed() => {
                            RetryState::Succeeded(outcome, intent.nonce)
                        }
                        SubmissionOutcome::SentUnconfirmed(hash) => RetryState::Recovering(
                            FailureReason::Transient(format!("{} not confirmed in time", hash)),
                        ),
                        SubmissionOutcome::Failed(reason) => RetryState::Recovering(reason),
                        SubmissionOutcome::Skipped(reason) => {
                            RetryState::Recovering(FailureReason::Error(reason))
                        }
                    }
                }

                RetryState::Recovering(reason) => {
                    match self.landed(client, &broadcasts, &reason).await {
                        Some((outcome, used)) => RetryState::Succeeded(outcome, used),
                        None => {
                            self.recover(
                                lease,
                                &mut gas,
                                &mut attempts,
                                &mut resyncs,
                                reason,
                                policy,
                            )
                            .await
                        }
                    }
                }

                RetryState::Succeeded(outcome, used) => {
                    lease.advance(used);
                    debug!(
                        address = %account.address(),
                        chain = %chain.name,
                        attempts,
                        next_nonce = ?lease.peek(),
                        "Transfer succeeded"
                    );
                    return outcome;
                }

                // one last look before reporting failure
                RetryState::Exhausted(last) => {
                    if let Some((outcome, used)) = self.find_landed(client, &broadcasts).await {
                        info!(nonce = used, "Earlier broadcast landed after retries ran out");
                        RetryState::Succeeded(outcome, used)
                    } else {
                        warn!(
                            address = %account.address(),
                            chain = %chain.name,
                            attempts,
                            error = %last,
                            "Giving up on transfer"
                        );
                        return SubmissionOutcome::Failed(FailureReason::Exhausted {
                            attempts,
                            last_error: last.to_string(),
                        });
                    }
                }
            };
        }
    }

    async fn build_intent(
        &self,
        lease: &mut NonceLease,
        gas: &mut GasPricer,
        account: &Account,
        chain: &ChainTarget,
        client: &dyn ChainClient,
        request: &TransferRequest,
    ) -> Result<TransactionIntent> {
        let nonce = lease.acquire().await?;
        let gas_price = gas.price(client).await?;
        Ok(TransactionIntent {
            from: account.address(),
            to: request.to,
            value: request.value,
            data: request.data.clone(),
            gas_limit: request.gas_limit,
            gas_price,
            chain_id: chain.chain_id,
            nonce,
        })
    }

    /// An earlier broadcast of this cycle may have landed while we were
    /// retrying. That shows up as "nonce too low", or simply as running out
    /// of attempts.
    async fn landed(
        &self,
        client: &dyn ChainClient,
        broadcasts: &[(TxHash, u64)],
        reason: &FailureReason,
    ) -> Option<(SubmissionOutcome, u64)> {
        if broadcasts.is_empty() {
            return None;
        }
        if !matches!(reason, FailureReason::NonceTooLow | FailureReason::Transient(_)) {
            return None;
        }
        let landed = self.find_landed(client, broadcasts).await?;
        info!(nonce = landed.1, "Earlier broadcast landed");
        Some(landed)
    }

    /// Confirmed outcome and nonce of the latest broadcast with a successful
    /// receipt.
    async fn find_landed(
        &self,
        client: &dyn ChainClient,
        broadcasts: &[(TxHash, u64)],
    ) -> Option<(SubmissionOutcome, u64)> {
        let hashes: Vec<TxHash> = broadcasts.iter().map(|(hash, _)| *hash).collect();
        let (hash, receipt) = self.executor.find_landed(client, &hashes).await?;
        let used = broadcasts
            .iter()
            .find(|(sent, _)| *sent == hash)
            .map(|(_, nonce)| *nonce)?;
        Some((
            SubmissionOutcome::Confirmed {
                hash,
                block_number: receipt.block_number,
            },
            used,
        ))
    }

    async fn recover(
        &self,
        lease: &mut NonceLease,
        gas: &mut GasPricer,
        attempts: &mut u32,
        resyncs: &mut u32,
        reason: FailureReason,
        policy: &RetryPolicy,
    ) -> RetryState {
        match &reason {
            FailureReason::NonceTooLow if *resyncs < policy.max_nonce_resyncs => {
                *resyncs += 1;
                *attempts -= 1;
                return match lease.resync().await {
                    Ok(nonce) => {
                        warn!(
                            address = %lease.address(),
                            nonce,
                            "Nonce too low, resynced from chain"
                        );
                        RetryState::Building
                    }
                    Err(e) => {
                        self.charge(attempts, FailureReason::Transient(e.to_string()), policy)
                    }
                };
            }
            FailureReason::NonceTooLow => {
                if let Err(e) = lease.resync().await {
                    warn!(error = %e, "Nonce resync failed");
                }
            }
            FailureReason::InsufficientFunds => {
                if *attempts < policy.max_attempts {
                    warn!(
                        address = %lease.address(),
                        delay = ?policy.insufficient_funds_delay,
                        "Insufficient funds, waiting before retry"
                    );
                    tokio::time::sleep(policy.insufficient_funds_delay).await;
                }
                return self.charge(attempts, reason, policy);
            }
            FailureReason::Reverted => {
                // a mined revert still consumes the nonce
                if let Err(e) = lease.resync().await {
                    warn!(error = %e, "Nonce resync after revert failed");
                }
                gas.escalate();
            }
            FailureReason::Transient(_) => gas.escalate(),
            _ => return RetryState::Exhausted(reason),
        }

        if *attempts < policy.max_attempts {
            warn!(
                address = %lease.address(),
                attempt = *attempts,
                max_attempts = policy.max_attempts,
                error = %reason,
                gas_price = gas.current(),
                delay = ?policy.retry_delay,
                "Transfer attempt failed, retrying"
            );
            tokio::time::sleep(policy.retry_delay).await;
        }
        self.charge(attempts, reason, policy)
    }

    fn charge(
        &self,
        attempts: &mut u32,
        reason: FailureReason,
        policy: &RetryPolicy,
    ) -> RetryState {
        if *attempts >= policy.max_attempts {
            RetryState::Exhausted(reason)
        } else {
            RetryState::Building
        }
    }
}
