use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::{
    chains::ChainTarget,
    error::Result,
    gas::GasPricing,
    types::{Account, SubmissionOutcome, TransferRequest, WorkKey},
    wallet::{execution::JobResults, WalletManager},
};

/// Every wallet sends a small amount to itself on every chain until its
/// nonce reaches the configured target.
pub async fn run(
    manager: &WalletManager,
    accounts: &[Account],
    chains: &[ChainTarget],
) -> BTreeMap<WorkKey, SubmissionOutcome> {
    info!(
        wallets = accounts.len(),
        chains = chains.len(),
        target_nonce = manager.config.self_transfer.target_nonce,
        "Sending transactions to self"
    );
    manager
        .execution_manager()
        .fan_out(
            accounts,
            chains,
            |account, chain| WorkKey::new(account.address(), &chain.name, &chain.name),
            |account, chain| fill_to_target(manager, account, chain),
        )
        .await
}

fn label(chain: &ChainTarget, nonce: u64) -> String {
    format!("{}#{}", chain.name, nonce)
}

/// Holds the pair's nonce lease for the whole loop, so nothing else can
/// interleave transactions for this account on this chain.
async fn fill_to_target(
    manager: &WalletManager,
    account: &Account,
    chain: &ChainTarget,
) -> Result<JobResults> {
    let settings = &manager.config.self_transfer;
    let address = account.address();
    let client = manager.connection(chain)?;
    let controller = manager.retry_controller();
    let policy = manager
        .config
        .retry_policy(settings.confirm_timeout)
        .with_nonce_limit(settings.target_nonce);
    let request = TransferRequest::native(address, settings.value, manager.config.gas_limit);

    let mut lease = controller
        .nonces()
        .lease(address, chain.chain_id, client.clone())
        .await;
    let start = lease.acquire().await?;
    if start >= settings.target_nonce {
        info!(address = %address, chain = %chain.name, nonce = start, "Already at target nonce");
        return Ok(vec![(
            WorkKey::new(address, &chain.name, label(chain, start)),
            SubmissionOutcome::Skipped(format!("nonce {} already at target", start)),
        )]);
    }

    let mut results = Vec::new();
    loop {
        let nonce = lease.acquire().await?;
        if nonce >= settings.target_nonce {
            break;
        }

        let outcome = controller
            .submit_with_lease(
                &mut lease,
                account,
                chain,
                client.as_ref(),
                &request,
                GasPricing::suggested(),
                &policy,
            )
            .await;
        if outcome.is_skipped() {
            // a resync jumped to or past the target
            break;
        }
        let stop = !outcome.is_success();
        // after a resync the transaction may have used a later nonce
        let used = match (stop, lease.peek()) {
            (false, Some(next)) => next.saturating_sub(1),
            _ => nonce,
        };
        results.push((WorkKey::new(address, &chain.name, label(chain, used)), outcome));

        if stop {
            warn!(
                address = %address,
                chain = %chain.name,
                nonce,
                "Transfer failed, stopping this chain for the wallet"
            );
            break;
        }
        super::pace(manager).await;
    }

    info!(
        address = %address,
        chain = %chain.name,
        sent = results.iter().filter(|(_, o)| o.is_success()).count(),
        next_nonce = ?lease.peek(),
        "Self-transfers finished"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chains::ChainRegistry,
        client::{BroadcastErrorKind, ChainClient},
        testing::{fast_config, mock_pool, Broadcast, MockChain},
    };
    use std::sync::Arc;

    fn manager_for(
        target: &ChainTarget,
        chain: Arc<MockChain>,
        target_nonce: u64,
    ) -> WalletManager {
        let mut config = fast_config();
        config.self_transfer.target_nonce = target_nonce;
        WalletManager::with_pool(
            config,
            ChainRegistry::new(vec![target.clone()]),
            mock_pool(&[(target.clone(), chain)]),
        )
    }

    #[tokio::test]
    async fn fills_up_to_the_target_nonce() {
        let base = ChainTarget::new("base", "http://base", 8453);
        let chain = Arc::new(MockChain::new(8453));
        let manager = manager_for(&base, chain.clone(), 250);
        let account = Account::generate();
        chain.set_pending_nonce(account.address(), 247);

        let results = run(&manager, &[account.clone()], &[base]).await;

        let labels: Vec<&str> = results.keys().map(|k| k.label.as_str()).collect();
        assert_eq!(labels, vec!["base#247", "base#248", "base#249"]);
        assert!(results.values().all(SubmissionOutcome::is_success));
        let sent = chain.sent();
        assert!(sent.iter().all(|tx| tx.to == Some(account.address())));
        assert_eq!(
            sent.iter().map(|tx| tx.nonce).collect::<Vec<_>>(),
            vec![247, 248, 249]
        );
    }

    #[tokio::test]
    async fn pair_at_target_is_skipped() {
        let base = ChainTarget::new("base", "http://base", 8453);
        let chain = Arc::new(MockChain::new(8453));
        let manager = manager_for(&base, chain.clone(), 250);
        let account = Account::generate();
        chain.set_pending_nonce(account.address(), 251);

        let results = run(&manager, &[account], &[base]).await;
        assert_eq!(results.len(), 1);
        assert!(results.values().all(SubmissionOutcome::is_skipped));
        assert_eq!(chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn exhaustion_stops_the_pair_without_gaps() {
        let base = ChainTarget::new("base", "http://base", 8453);
        let chain = Arc::new(MockChain::new(8453));
        let manager = manager_for(&base, chain.clone(), 10);
        let account = Account::generate();
        chain.script([
            Broadcast::Accept,
            Broadcast::Reject(BroadcastErrorKind::Transport),
            Broadcast::Reject(BroadcastErrorKind::Transport),
            Broadcast::Reject(BroadcastErrorKind::Transport),
        ]);

        let results = run(&manager, &[account.clone()], &[base]).await;

        assert_eq!(results.len(), 2);
        assert!(results[&WorkKey::new(account.address(), "base", "base#0")].is_success());
        assert!(matches!(
            results[&WorkKey::new(account.address(), "base", "base#1")],
            SubmissionOutcome::Failed(_)
        ));
        // four broadcasts: one success, three failed tries at nonce 1
        assert_eq!(chain.broadcast_count(), 4);
        assert!(chain.sent()[1..].iter().all(|tx| tx.nonce == 1));
    }

    #[tokio::test]
    async fn resync_to_the_target_stops_without_overshooting() {
        let base = ChainTarget::new("base", "http://base", 8453);
        let chain = Arc::new(MockChain::new(8453));
        let manager = manager_for(&base, chain.clone(), 10);
        let account = Account::generate();
        chain.set_pending_nonce(account.address(), 7);
        {
            let client: Arc<dyn ChainClient> = chain.clone();
            let mut lease = manager
                .retry_controller()
                .nonces()
                .lease(account.address(), 8453, client)
                .await;
            lease.acquire().await.unwrap();
        }
        // another sender used nonces 8 and 9
        chain.script([Broadcast::Accept, Broadcast::Reject(BroadcastErrorKind::NonceTooLow)]);
        chain.set_pending_nonce(account.address(), 10);

        let results = run(&manager, &[account.clone()], &[base]).await;

        assert!(results[&WorkKey::new(account.address(), "base", "base#7")].is_success());
        assert_eq!(results.values().filter(|o| o.is_success()).count(), 1);
        let nonces: Vec<u64> = chain.sent().iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![7, 8]);
    }
}
