use grid_types::TypesError;
use thiserror::Error;

/// Failures reported by a signer, primary or session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("signature request was rejected by the user")]
    Denied,

    #[error("signer {0} is not a required signer of this transaction")]
    NotARequiredSigner(String),

    #[error("versioned transaction fee payer {0} is not the session key")]
    FeePayerNotSession(String),

    #[error("signer unavailable: {0}")]
    Unavailable(String),

    #[error("transaction encoding failed: {0}")]
    Encoding(#[from] TypesError),
}

/// Errors from session key derivation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("signer denied the derivation request")]
    SignerDenied,

    #[error("derivation signature missing from signed transaction")]
    MissingSignature,

    #[error("signer failure: {0}")]
    Signer(SignerError),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

impl From<SignerError> for CredentialError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Denied => CredentialError::SignerDenied,
            other => CredentialError::Signer(other),
        }
    }
}

/// Errors from the local credential store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("sealing failed")]
    Seal,
}

pub type Result<T> = std::result::Result<T, CredentialError>;
