use thiserror::Error;

/// Errors produced while parsing or decoding shared wire types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid base58 string: {0}")]
    InvalidBase58(String),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("account discriminator mismatch for {account}")]
    DiscriminatorMismatch { account: &'static str },

    #[error("account data truncated: {0}")]
    Truncated(&'static str),

    #[error("invalid option tag {0}")]
    InvalidOptionTag(u8),

    #[error("no viable program address bump for seeds")]
    NoViableBump,

    #[error("transaction has no fee payer")]
    MissingFeePayer,

    #[error("too many accounts in message: {0}")]
    TooManyAccounts(usize),

    #[error("unsupported message version byte {0:#04x}")]
    UnsupportedVersion(u8),
}

/// Result type for shared type operations
pub type Result<T> = std::result::Result<T, TypesError>;
