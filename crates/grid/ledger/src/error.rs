use grid_types::{LedgerKind, TypesError};
use thiserror::Error;

/// Errors from reading a ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("unknown subscription {0}")]
    UnknownSubscription(u64),

    #[error(transparent)]
    Types(#[from] TypesError),
}

/// Why a submission did not land.
///
/// `Timeout` and `Expired` are ambiguous: the transaction may or may not have
/// been applied, and the caller must re-read state to find out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("transaction rejected: {reason}")]
    Rejected { reason: String, code: Option<u32> },

    #[error("confirmation timed out")]
    Timeout,

    #[error("blockhash expired before confirmation")]
    Expired,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transaction could not be encoded: {0}")]
    Encoding(#[from] TypesError),
}

impl SubmitError {
    /// Whether the outcome is unknown rather than a definite failure.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            SubmitError::Timeout | SubmitError::Expired | SubmitError::Transport(_)
        )
    }

    /// Program error code `0x0` from the system program: the account exists.
    pub fn is_already_in_use(&self) -> bool {
        match self {
            SubmitError::Rejected { reason, code } => {
                *code == Some(0) || reason.contains("already in use")
            }
            _ => false,
        }
    }
}

impl From<LedgerError> for SubmitError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rpc { code, message } => SubmitError::Rejected {
                reason: message,
                code: u32::try_from(code).ok(),
            },
            other => SubmitError::Transport(other.to_string()),
        }
    }
}

/// Errors from the dual-ledger view.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("{ledger} ledger: {source}")]
    Ledger {
        ledger: LedgerKind,
        #[source]
        source: LedgerError,
    },

    #[error(transparent)]
    Types(#[from] TypesError),
}

impl ViewError {
    pub(crate) fn on(ledger: LedgerKind) -> impl FnOnce(LedgerError) -> ViewError {
        move |source| ViewError::Ledger { ledger, source }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
