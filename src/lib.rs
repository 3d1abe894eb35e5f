pub mod chains;
pub mod client;
pub mod error;
pub mod gas;
pub mod nonce;
pub mod operations;
pub mod pool;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod utils;
pub mod wallet;

pub use chains::{ChainRegistry, ChainTarget};
pub use error::{Result, WalletError};
pub use types::{Account, ExecutionResult, Operation, SubmissionOutcome};
pub use wallet::{Config, WalletManager};
