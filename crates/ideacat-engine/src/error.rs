use ideacat_config::ConfigError;
use thiserror::Error;

/// Problems that stop a run before any batch is sent.
///
/// Per-batch failures are never reported through this type.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    Input(#[from] ideacat_core::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
