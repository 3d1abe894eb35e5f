pub mod execution;
pub mod progress;
pub mod retry;
pub mod transaction;

use alloy::primitives::{
    utils::{parse_ether, parse_units},
    Address, U256,
};
use chrono::Utc;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    chains::{ChainRegistry, ChainTarget},
    client::ChainClient,
    error::{Result, WalletError},
    gas::GWEI,
    nonce::NonceTracker,
    operations::{self, bridge::QuoteSource},
    pool::ConnectionPool,
    types::{Account, ExecutionResult, Operation},
    utils::GAS_LIMIT,
};

use self::{
    execution::ExecutionManager,
    progress::ProgressManager,
    retry::{RetryController, RetryPolicy},
    transaction::TransactionManager,
};

/// Settings for the bridge operation
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub quote_url: String,
    pub quote_timeout: Duration,
    pub confirm_timeout: Duration,
}

/// Settings for the disperse operation
#[derive(Debug, Clone)]
pub struct DisperseSettings {
    /// Amount sent to each recipient
    pub amount: U256,
    /// Recipients holding more than this are skipped
    pub threshold: U256,
    pub confirm_timeout: Duration,
}

/// Settings for the collect operation
#[derive(Debug, Clone)]
pub struct CollectSettings {
    /// Starting gas price in wei, also used to reserve gas from the balance
    pub base_gas_price: u128,
    pub escalation_percent: u32,
    /// Share of the spendable balance to sweep, in percent
    pub percentage: u32,
    pub confirm_timeout: Duration,
}

/// Settings for the self-transfer operation
#[derive(Debug, Clone)]
pub struct SelfTransferSettings {
    /// Stop once the account nonce reaches this value
    pub target_nonce: u64,
    pub value: U256,
    pub confirm_timeout: Duration,
}

/// Configuration for wallet operations loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub wallets_file: PathBuf,
    pub proxies_file: PathBuf,
    pub gas_limit: u64,
    /// Maximum number of charged attempts per transfer
    pub max_attempts: u32,
    /// Free nonce resyncs per transfer
    pub max_nonce_resyncs: u32,
    pub retry_delay: Duration,
    pub insufficient_funds_delay: Duration,
    /// Pause between logical transfers of one job
    pub inter_tx_delay: Duration,
    pub receipt_poll_interval: Duration,
    pub rpc_timeout: Duration,
    pub wallet_concurrency: usize,
    pub network_concurrency: usize,
    pub bridge: BridgeSettings,
    pub disperse: DisperseSettings,
    pub collect: CollectSettings,
    pub self_transfer: SelfTransferSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wallets_file: PathBuf::from("wallets.txt"),
            proxies_file: PathBuf::from("proxies.txt"),
            gas_limit: GAS_LIMIT,
            max_attempts: 3,
            max_nonce_resyncs: 3,
            retry_delay: Duration::from_secs(3),
            insufficient_funds_delay: Duration::from_secs(3),
            inter_tx_delay: Duration::from_millis(150),
            receipt_poll_interval: Duration::from_secs(1),
            rpc_timeout: Duration::from_secs(30),
            wallet_concurrency: 5,
            network_concurrency: 4,
            bridge: BridgeSettings {
                quote_url: "https://li.quest/v1/quote".to_string(),
                quote_timeout: Duration::from_secs(30),
                confirm_timeout: Duration::from_secs(300),
            },
            disperse: DisperseSettings {
                amount: U256::from(500_000_000_000_000u64),
                threshold: U256::from(10_000_000_000_000u64),
                confirm_timeout: Duration::ZERO,
            },
            collect: CollectSettings {
                base_gas_price: GWEI,
                escalation_percent: 120,
                percentage: 95,
                confirm_timeout: Duration::from_secs(10),
            },
            self_transfer: SelfTransferSettings {
                target_nonce: 250,
                value: U256::from(10_000_000_000_000u64),
                confirm_timeout: Duration::ZERO,
            },
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    dotenv::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env_var(name) {
        Some(v) => v.trim().parse::<T>().map_err(|_| {
            WalletError::InvalidEnvVar(format!("{} has an invalid value: {}", name, v))
        }),
        None => Ok(default),
    }
}

fn env_duration(name: &str, default: Duration) -> Result<Duration> {
    match env_var(name) {
        Some(v) => humantime::parse_duration(v.trim()).map_err(|e| {
            WalletError::InvalidEnvVar(format!("{} must be a duration like 3s: {}", name, e))
        }),
        None => Ok(default),
    }
}

fn env_ether(name: &str, default: U256) -> Result<U256> {
    match env_var(name) {
        Some(v) => parse_ether(v.trim()).map_err(|e| {
            WalletError::InvalidEnvVar(format!("{} must be an ETH amount: {}", name, e))
        }),
        None => Ok(default),
    }
}

fn env_gwei(name: &str, default: u128) -> Result<u128> {
    match env_var(name) {
        Some(v) => parse_units(v.trim(), "gwei")
            .map_err(|e| {
                WalletError::InvalidEnvVar(format!("{} must be a gwei amount: {}", name, e))
            })
            .and_then(|p| {
                u128::try_from(p.get_absolute()).map_err(|_| {
                    WalletError::InvalidEnvVar(format!("{} is out of range", name))
                })
            }),
        None => Ok(default),
    }
}

impl Config {
    /// Creates a new Config instance by loading values from environment variables.
    /// Every value has a default; a value that is present but unparsable is an error.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Config::default();

        let config = Self {
            wallets_file: env_var("WALLETS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.wallets_file),
            proxies_file: env_var("PROXIES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.proxies_file),
            gas_limit: env_parse("GAS_LIMIT", defaults.gas_limit)?,
            max_attempts: env_parse("MAX_ATTEMPTS", defaults.max_attempts)?,
            max_nonce_resyncs: env_parse("MAX_NONCE_RESYNCS", defaults.max_nonce_resyncs)?,
            retry_delay: env_duration("RETRY_DELAY", defaults.retry_delay)?,
            insufficient_funds_delay: env_duration(
                "INSUFFICIENT_FUNDS_DELAY",
                defaults.insufficient_funds_delay,
            )?,
            inter_tx_delay: env_duration("INTER_TX_DELAY", defaults.inter_tx_delay)?,
            receipt_poll_interval: env_duration(
                "RECEIPT_POLL_INTERVAL",
                defaults.receipt_poll_interval,
            )?,
            rpc_timeout: env_duration("RPC_TIMEOUT", defaults.rpc_timeout)?,
            wallet_concurrency: env_parse("WALLET_CONCURRENCY", defaults.wallet_concurrency)?,
            network_concurrency: env_parse("NETWORK_CONCURRENCY", defaults.network_concurrency)?,
            bridge: BridgeSettings {
                quote_url: env_var("QUOTE_URL").unwrap_or(defaults.bridge.quote_url),
                quote_timeout: env_duration("QUOTE_TIMEOUT", defaults.bridge.quote_timeout)?,
                confirm_timeout: env_duration(
                    "BRIDGE_CONFIRM_TIMEOUT",
                    defaults.bridge.confirm_timeout,
                )?,
            },
            disperse: DisperseSettings {
                amount: env_ether("DISPERSE_AMOUNT", defaults.disperse.amount)?,
                threshold: env_ether("DISPERSE_THRESHOLD", defaults.disperse.threshold)?,
                confirm_timeout: env_duration(
                    "DISPERSE_CONFIRM_TIMEOUT",
                    defaults.disperse.confirm_timeout,
                )?,
            },
            collect: CollectSettings {
                base_gas_price: env_gwei(
                    "COLLECT_GAS_PRICE_GWEI",
                    defaults.collect.base_gas_price,
                )?,
                escalation_percent: env_parse(
                    "COLLECT_ESCALATION_PERCENT",
                    defaults.collect.escalation_percent,
                )?,
                percentage: env_parse("COLLECT_PERCENTAGE", defaults.collect.percentage)?,
                confirm_timeout: env_duration(
                    "COLLECT_CONFIRM_TIMEOUT",
                    defaults.collect.confirm_timeout,
                )?,
            },
            self_transfer: SelfTransferSettings {
                target_nonce: env_parse("TARGET_NONCE", defaults.self_transfer.target_nonce)?,
                value: env_ether("SELF_TRANSFER_VALUE", defaults.self_transfer.value)?,
                confirm_timeout: env_duration(
                    "SELF_TRANSFER_CONFIRM_TIMEOUT",
                    defaults.self_transfer.confirm_timeout,
                )?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(WalletError::InvalidEnvVar(
                "MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.wallet_concurrency == 0 || self.network_concurrency == 0 {
            return Err(WalletError::InvalidEnvVar(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if self.collect.percentage == 0 || self.collect.percentage > 100 {
            return Err(WalletError::InvalidEnvVar(
                "COLLECT_PERCENTAGE must be between 1 and 100".to_string(),
            ));
        }
        if self.collect.escalation_percent < 100 {
            return Err(WalletError::InvalidEnvVar(
                "COLLECT_ESCALATION_PERCENT must be at least 100".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy for an operation with the given receipt wait.
    pub fn retry_policy(&self, confirm_timeout: Duration) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            max_nonce_resyncs: self.max_nonce_resyncs,
            retry_delay: self.retry_delay,
            insufficient_funds_delay: self.insufficient_funds_delay,
            confirm_timeout,
            nonce_limit: None,
        }
    }
}

/// Run context: owns the caches and managers shared by every job of a run.
pub struct WalletManager {
    pub config: Config,
    pub registry: ChainRegistry,
    pool: ConnectionPool,
    retry_controller: RetryController,
    execution_manager: ExecutionManager,
}

impl WalletManager {
    /// Creates a WalletManager with alloy HTTP clients.
    ///
    /// # Arguments
    /// * `config` - Run configuration
    /// * `proxies` - Outbound proxies for RPC clients, may be empty
    pub fn new(config: Config, proxies: Vec<String>) -> Self {
        let pool = ConnectionPool::new(proxies, config.rpc_timeout);
        Self::with_pool(config, ChainRegistry::default(), pool)
    }

    /// Creates a WalletManager over an existing registry and connection pool.
    pub fn with_pool(config: Config, registry: ChainRegistry, pool: ConnectionPool) -> Self {
        let transaction_manager = TransactionManager::new(config.receipt_poll_interval);
        let retry_controller =
            RetryController::new(transaction_manager, Arc::new(NonceTracker::new()));
        let execution_manager =
            ExecutionManager::new(config.wallet_concurrency, config.network_concurrency);

        Self {
            config,
            registry,
            pool,
            retry_controller,
            execution_manager,
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn retry_controller(&self) -> &RetryController {
        &self.retry_controller
    }

    pub fn execution_manager(&self) -> &ExecutionManager {
        &self.execution_manager
    }

    pub fn progress(&self) -> &ProgressManager {
        self.execution_manager.progress()
    }

    /// Cached client for a chain.
    pub fn connection(&self, chain: &ChainTarget) -> Result<Arc<dyn ChainClient>> {
        self.pool.get_connection(chain)
    }

    /// Asks every endpoint for its chain id. Returns the names of chains whose
    /// endpoint is unreachable or reports an unexpected id.
    pub async fn check_endpoints(&self, chains: &[ChainTarget]) -> Vec<String> {
        let checks = chains.iter().map(|chain| async move {
            let reported = match self.connection(chain) {
                Ok(client) => client.chain_id().await,
                Err(e) => Err(e),
            };
            match reported {
                Ok(id) if id == chain.chain_id => None,
                Ok(id) => {
                    warn!(
                        chain = %chain.name,
                        expected = chain.chain_id,
                        reported = id,
                        "Endpoint reports a different chain id"
                    );
                    Some(chain.name.clone())
                }
                Err(e) => {
                    warn!(chain = %chain.name, error = %e, "Endpoint unreachable");
                    Some(chain.name.clone())
                }
            }
        });
        futures::future::join_all(checks)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Runs `operation` over `accounts` on the selected chains.
    ///
    /// # Arguments
    /// * `operation` - What to run
    /// * `accounts` - Wallets in file order; the first one is the hub for disperse and collect
    /// * `chains` - Chains for disperse, collect and self-transfer
    /// * `quotes` - Quote source for bridging
    ///
    /// # Returns
    /// * `Result<ExecutionResult>` - Per-unit outcomes, or a configuration error
    pub async fn run(
        &self,
        operation: &Operation,
        accounts: &[Account],
        chains: &[ChainTarget],
        quotes: &dyn QuoteSource,
    ) -> Result<ExecutionResult> {
        if accounts.is_empty() {
            return Err(WalletError::Config("no wallets to run".to_string()));
        }

        let started_at = Utc::now();
        let start = Instant::now();
        info!(operation = %operation, wallets = accounts.len(), "Starting operation");

        let results = match operation {
            Operation::Bridge { from, to, amount } => {
                let source = self.registry.get(from)?.clone();
                let destinations: Vec<ChainTarget> = if to.trim().eq_ignore_ascii_case("all") {
                    self.registry.others(&source)
                } else {
                    self.registry
                        .select(to)?
                        .into_iter()
                        .filter(|chain| chain.chain_id != source.chain_id)
                        .collect()
                };
                if destinations.is_empty() {
                    return Err(WalletError::Config(format!(
                        "no destination chains besides {}",
                        source.name
                    )));
                }
                operations::bridge::run(self, accounts, &source, &destinations, *amount, quotes)
                    .await
            }
            Operation::Disperse => operations::disperse::run(self, accounts, chains).await?,
            Operation::Collect => operations::collect::run(self, accounts, chains).await?,
            Operation::SelfTransfer => {
                operations::self_transfer::run(self, accounts, chains).await
            }
        };

        Ok(ExecutionResult {
            operation: operation.to_string(),
            started_at,
            time_elapsed: start.elapsed(),
            results,
        })
    }

    /// Logs the run summary
    pub fn print_statistics(&self, execution_result: &ExecutionResult, accounts: &[Account]) {
        let addresses: Vec<Address> = accounts.iter().map(Account::address).collect();
        self.progress()
            .print_statistics(execution_result, &addresses);
    }
}
