use thiserror::Error;

/// Failure of a single classifier call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport or API failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// The provider asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Raised while building a client, never per call
    #[error("Client configuration error: {0}")]
    Configuration(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed response: {0}")]
    Malformed(String),
}
