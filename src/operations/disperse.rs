use std::collections::BTreeMap;
use tracing::info;

use crate::{
    chains::ChainTarget,
    error::Result,
    gas::GasPricing,
    types::{Account, SubmissionOutcome, TransferRequest, WorkKey},
    utils::format_eth,
    wallet::{execution::JobResults, WalletManager},
};

/// The first wallet funds every other wallet on every chain. Recipients that
/// already hold more than the threshold are skipped.
pub async fn run(
    manager: &WalletManager,
    accounts: &[Account],
    chains: &[ChainTarget],
) -> Result<BTreeMap<WorkKey, SubmissionOutcome>> {
    let (funder, recipients) = super::hub_and_spokes(accounts)?;
    info!(
        funder = %funder.address(),
        recipients = recipients.len(),
        amount = %format_eth(manager.config.disperse.amount),
        "Dispersing"
    );

    Ok(manager
        .execution_manager()
        .fan_out(
            recipients,
            chains,
            |recipient, chain| WorkKey::new(recipient.address(), &chain.name, &chain.name),
            |recipient, chain| fund(manager, funder, recipient, chain),
        )
        .await)
}

async fn fund(
    manager: &WalletManager,
    funder: &Account,
    recipient: &Account,
    chain: &ChainTarget,
) -> Result<JobResults> {
    let settings = &manager.config.disperse;
    let key = WorkKey::new(recipient.address(), &chain.name, &chain.name);
    let client = manager.connection(chain)?;

    let balance = client.balance(recipient.address()).await?;
    if balance > settings.threshold {
        info!(unit = %key, balance = %format_eth(balance), "Recipient already funded");
        return Ok(vec![(
            key,
            SubmissionOutcome::Skipped(format!(
                "balance {} ETH above threshold",
                format_eth(balance)
            )),
        )]);
    }

    let request = TransferRequest::native(
        recipient.address(),
        settings.amount,
        manager.config.gas_limit,
    );
    let outcome = manager
        .retry_controller()
        .submit(
            funder,
            chain,
            client,
            &request,
            GasPricing::suggested(),
            &manager.config.retry_policy(settings.confirm_timeout),
        )
        .await;
    info!(unit = %key, status = outcome.status(), "Disperse transfer finished");
    super::pace(manager).await;
    Ok(vec![(key, outcome)])
}
