use alloy::primitives::utils::parse_ether;
use dotenv::dotenv;
use eyre::WrapErr;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tx_smith::{
    operations::bridge::HttpQuoteClient,
    utils::{load_proxies, load_wallets},
    ChainRegistry, Config, Operation, WalletError, WalletManager,
};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv().ok();
    let _log_guard = init_tracing();

    let config = Config::from_env()?;
    let accounts = load_wallets(&config.wallets_file)?;
    let proxies = load_proxies(&config.proxies_file)?;

    let quotes = HttpQuoteClient::new(
        config.bridge.quote_url.clone(),
        config.bridge.quote_timeout,
        proxies.clone(),
    );
    let manager = WalletManager::new(config, proxies);

    let operation = operation_from_env(&manager.registry)?;
    let chains = manager
        .registry
        .select(&dotenv::var("CHAINS").unwrap_or_else(|_| "all".to_string()))?;
    info!(
        operation = %operation,
        chains = %chains.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(","),
        "Configuration loaded"
    );

    let unhealthy = manager.check_endpoints(&chains).await;
    if !unhealthy.is_empty() {
        warn!(chains = %unhealthy.join(","), "Some endpoints failed the chain id check");
    }

    let execution_result = manager
        .run(&operation, &accounts, &chains, &quotes)
        .await?;
    manager.print_statistics(&execution_result, &accounts);

    Ok(())
}

/// Logs to stdout and to a daily file under `logs/`. Level comes from `RUST_LOG`.
fn init_tracing() -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "tx-smith.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tx_smith=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

/// Reads `MODE` and, for bridging, `FROM_CHAIN`, `TO_CHAIN` and `BRIDGE_AMOUNT`.
fn operation_from_env(registry: &ChainRegistry) -> eyre::Result<Operation> {
    let mode = dotenv::var("MODE").map_err(|_| WalletError::EnvVarNotFound("MODE".to_string()))?;

    let operation = match mode.trim().to_lowercase().as_str() {
        "bridge" => {
            let from = dotenv::var("FROM_CHAIN")
                .map_err(|_| WalletError::EnvVarNotFound("FROM_CHAIN".to_string()))?;
            let to = dotenv::var("TO_CHAIN").unwrap_or_else(|_| "all".to_string());
            // fail on unknown names before any network activity
            registry.get(&from)?;
            registry.select(&to)?;

            let amount = dotenv::var("BRIDGE_AMOUNT")
                .map_err(|_| WalletError::EnvVarNotFound("BRIDGE_AMOUNT".to_string()))?;
            let amount = parse_ether(amount.trim())
                .wrap_err_with(|| format!("BRIDGE_AMOUNT is not an ETH amount: {}", amount))?;

            Operation::Bridge { from, to, amount }
        }
        "disperse" => Operation::Disperse,
        "collect" => Operation::Collect,
        "self-transfer" | "self_transfer" | "selftransfer" => Operation::SelfTransfer,
        other => {
            return Err(WalletError::InvalidEnvVar(format!(
                "MODE must be one of bridge, disperse, collect, self-transfer, got {}",
                other
            ))
            .into())
        }
    };
    Ok(operation)
}
