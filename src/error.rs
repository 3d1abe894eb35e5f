use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid environment variable value: {0}")]
    InvalidEnvVar(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WalletError>;
