//! The four operations the binary runs. Each one turns wallets and chains
//! into units of work and pushes every transfer through the retry controller.

pub mod bridge;
pub mod collect;
pub mod disperse;
pub mod self_transfer;

use crate::{
    error::{Result, WalletError},
    types::Account,
    wallet::WalletManager,
};

/// Splits the wallet list into the hub (first wallet) and everyone else.
pub(crate) fn hub_and_spokes(accounts: &[Account]) -> Result<(&Account, &[Account])> {
    match accounts {
        [hub, spokes @ ..] if !spokes.is_empty() => Ok((hub, spokes)),
        _ => Err(WalletError::Config(
            "at least two wallets are required".to_string(),
        )),
    }
}

/// Pause between logical transfers.
pub(crate) async fn pace(manager: &WalletManager) {
    let delay = manager.config.inter_tx_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
