use alloy::primitives::U256;
use std::collections::BTreeMap;
use tracing::info;

use crate::{
    chains::ChainTarget,
    error::Result,
    gas::GasPricing,
    types::{Account, SubmissionOutcome, TransferRequest, WorkKey},
    utils::format_eth,
    wallet::{execution::JobResults, CollectSettings, WalletManager},
};

/// Every wallet but the first sweeps most of its balance into the first one.
pub async fn run(
    manager: &WalletManager,
    accounts: &[Account],
    chains: &[ChainTarget],
) -> Result<BTreeMap<WorkKey, SubmissionOutcome>> {
    let (receiver, donors) = super::hub_and_spokes(accounts)?;
    info!(receiver = %receiver.address(), donors = donors.len(), "Collecting");

    Ok(manager
        .execution_manager()
        .fan_out(
            donors,
            chains,
            |donor, chain| WorkKey::new(donor.address(), &chain.name, &chain.name),
            |donor, chain| sweep(manager, receiver, donor, chain),
        )
        .await)
}

/// `percentage` of what is left after reserving gas at the base price, or
/// `None` when nothing would be sent.
pub fn sweep_amount(balance: U256, gas_limit: u64, settings: &CollectSettings) -> Option<U256> {
    let gas_cost = U256::from(gas_limit) * U256::from(settings.base_gas_price);
    if balance <= gas_cost {
        return None;
    }
    let amount = (balance - gas_cost) * U256::from(settings.percentage) / U256::from(100u64);
    (!amount.is_zero()).then_some(amount)
}

async fn sweep(
    manager: &WalletManager,
    receiver: &Account,
    donor: &Account,
    chain: &ChainTarget,
) -> Result<JobResults> {
    let settings = &manager.config.collect;
    let key = WorkKey::new(donor.address(), &chain.name, &chain.name);
    let client = manager.connection(chain)?;

    let balance = client.balance(donor.address()).await?;
    let Some(amount) = sweep_amount(balance, manager.config.gas_limit, settings) else {
        info!(unit = %key, balance = %format_eth(balance), "Nothing to collect after gas");
        return Ok(vec![(
            key,
            SubmissionOutcome::Skipped("balance does not cover gas".to_string()),
        )]);
    };

    info!(unit = %key, amount = %format_eth(amount), "Collecting from donor");
    let request = TransferRequest::native(receiver.address(), amount, manager.config.gas_limit);
    let outcome = manager
        .retry_controller()
        .submit(
            donor,
            chain,
            client,
            &request,
            GasPricing::escalating(settings.base_gas_price, settings.escalation_percent),
            &manager.config.retry_policy(settings.confirm_timeout),
        )
        .await;
    info!(unit = %key, status = outcome.status(), "Collect transfer finished");
    super::pace(manager).await;
    Ok(vec![(key, outcome)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chains::ChainRegistry,
        testing::{fast_config, mock_pool, Broadcast, MockChain},
        utils::GAS_LIMIT,
        wallet::Config,
    };
    use alloy::primitives::utils::parse_ether;
    use std::sync::Arc;

    #[test]
    fn keeps_gas_and_a_margin() {
        let settings = Config::default().collect;
        let balance = parse_ether("1").unwrap();
        let gas = U256::from(21_000u64 * 1_000_000_000u64);
        assert_eq!(
            sweep_amount(balance, GAS_LIMIT, &settings),
            Some((balance - gas) * U256::from(95u64) / U256::from(100u64))
        );
        assert_eq!(sweep_amount(gas, GAS_LIMIT, &settings), None);
        // one wei over the reserve rounds down to nothing
        assert_eq!(sweep_amount(gas + U256::from(1u64), GAS_LIMIT, &settings), None);
    }

    #[tokio::test]
    async fn stuck_sweep_is_repriced_under_the_same_nonce() {
        let base = ChainTarget::new("base", "http://base", 8453);
        let chain = Arc::new(MockChain::new(8453));
        let manager = WalletManager::with_pool(
            fast_config(),
            ChainRegistry::new(vec![base.clone()]),
            mock_pool(&[(base.clone(), chain.clone())]),
        );
        let accounts = vec![Account::generate(), Account::generate(), Account::generate()];
        chain.set_balance(accounts[1].address(), parse_ether("0.01").unwrap());
        chain.set_pending_nonce(accounts[1].address(), 4);
        chain.script([Broadcast::Stall, Broadcast::Accept]);

        let results = run(&manager, &accounts, &[base]).await.unwrap();

        let funded = &results[&WorkKey::new(accounts[1].address(), "base", "base")];
        assert!(matches!(funded, SubmissionOutcome::Confirmed { .. }));
        let empty = &results[&WorkKey::new(accounts[2].address(), "base", "base")];
        assert!(empty.is_skipped());

        let sent = chain.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|tx| tx.nonce == 4));
        assert!(sent.iter().all(|tx| tx.to == Some(accounts[0].address())));
        assert_eq!(sent[0].gas_price, 1_000_000_000);
        assert_eq!(sent[1].gas_price, 1_200_000_000);
    }
}
