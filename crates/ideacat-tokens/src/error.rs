use thiserror::Error;

pub type Result<T> = std::result::Result<T, TokenError>;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Failed to load tokenizer: {0}")]
    Encoding(String),
}
