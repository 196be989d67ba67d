//! What a command reports back instead of raising.

use std::fmt;

use grid_credential::{CredentialError, SignerError};
use grid_ledger::SubmitError;
use grid_types::GameOp;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The wallet refused to sign.
    SignerDenied,
    /// Network trouble, timeout, or expiry. The ledger may or may not have
    /// applied the transaction.
    Ambiguous,
    /// The program refused the transaction.
    Rejected,
    /// Local data could not be decoded.
    Corrupted,
    /// A session key was asked to do something only the primary key may do.
    InvariantViolation,
    /// The command is not valid in the current state. Nothing was submitted.
    NotReady,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A program rejection, explained for `op`.
    pub fn rejected(op: GameOp, err: &SubmitError) -> Self {
        Self::new(FailureKind::Rejected, explain(op, err))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<SignerError> for Failure {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Denied => Failure::new(FailureKind::SignerDenied, "request rejected in wallet"),
            other => Failure::new(FailureKind::Rejected, other.to_string()),
        }
    }
}

impl From<CredentialError> for Failure {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::SignerDenied => {
                Failure::new(FailureKind::SignerDenied, "request rejected in wallet")
            }
            CredentialError::InvalidKeyMaterial(m) => Failure::new(FailureKind::Corrupted, m),
            other => Failure::new(FailureKind::Rejected, other.to_string()),
        }
    }
}

impl From<SessionError> for Failure {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotConnected | SessionError::NoSessionKey | SessionError::NotReady(_) => {
                Failure::new(FailureKind::NotReady, err.to_string())
            }
            SessionError::SessionScope(_) => {
                Failure::new(FailureKind::InvariantViolation, err.to_string())
            }
            SessionError::Credential(e) => e.into(),
            SessionError::Signer(e) => e.into(),
            SessionError::Cache(e) => Failure::new(FailureKind::Corrupted, e.to_string()),
            SessionError::Types(e) => Failure::new(FailureKind::Corrupted, e.to_string()),
            SessionError::Ledger(e) => Failure::new(FailureKind::Ambiguous, e.to_string()),
            SessionError::View(e) => Failure::new(FailureKind::Ambiguous, e.to_string()),
            SessionError::Submit(e) if e.is_ambiguous() => {
                Failure::new(FailureKind::Ambiguous, e.to_string())
            }
            SessionError::Submit(e) => Failure::new(FailureKind::Rejected, e.to_string()),
        }
    }
}

/// A user-facing explanation of a program rejection.
pub fn explain(op: GameOp, err: &SubmitError) -> String {
    if err.is_already_in_use() {
        return match op {
            GameOp::JoinGame => "already joined".to_string(),
            GameOp::Initialize => "board already initialized".to_string(),
            _ => "account already exists".to_string(),
        };
    }
    match err {
        SubmitError::Rejected { code: Some(6000), .. } => match op {
            GameOp::MovePlayer => "this key may not move the player".to_string(),
            _ => "only the player's owner may do this".to_string(),
        },
        SubmitError::Rejected { code: Some(1), .. } => "insufficient funds".to_string(),
        SubmitError::Rejected { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

/// Result of a lifecycle or game command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    /// Another command for this identity is in flight. Nothing was done.
    Busy,
    Failed(Failure),
    /// The ledger could not tell whether the transaction landed.
    Unresolved(String),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Failed(failure) => Some(failure.kind),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(value) => Outcome::Done(f(value)),
            Outcome::Busy => Outcome::Busy,
            Outcome::Failed(failure) => Outcome::Failed(failure),
            Outcome::Unresolved(m) => Outcome::Unresolved(m),
        }
    }
}

impl<T> From<Failure> for Outcome<T> {
    fn from(failure: Failure) -> Self {
        Outcome::Failed(failure)
    }
}

impl<T> From<SessionError> for Outcome<T> {
    fn from(err: SessionError) -> Self {
        Outcome::Failed(err.into())
    }
}
