use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The SFU rejected or failed to apply a subscription update
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// The request never reached the SFU
    #[error("Transport error: {0}")]
    Transport(String),

    /// The store was cleared before the update could take effect
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same request on the next state change may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Signaling(_) | Self::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
