use grid_credential::{CacheError, CredentialError, SignerError};
use grid_ledger::{LedgerError, SubmitError, ViewError};
use grid_types::TypesError;
use thiserror::Error;

/// Errors raised inside session operations before they are folded into an
/// [`Outcome`](crate::Outcome).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no wallet connected")]
    NotConnected,

    #[error("no session key")]
    NoSessionKey,

    #[error("{0}")]
    NotReady(String),

    #[error("session key may not sign {0}")]
    SessionScope(&'static str),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Types(#[from] TypesError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
