use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Missing attribute '{attribute}' in {kind} event")]
    MissingAttribute { kind: String, attribute: &'static str },

    #[error("Attribute '{0}' is not valid UTF-8")]
    InvalidUtf8(String),

    #[error("Invalid coin '{0}'")]
    InvalidCoin(String),

    #[error("No coins in {0} event")]
    EmptyCoins(String),
}

pub type Result<T> = std::result::Result<T, NormalizeError>;
