use std::fmt;
use std::sync::Arc;

use grid_credential::{SessionCredential, TransactionSigner};
use grid_types::Address;
use serde::{Deserialize, Serialize};

/// Where the session key for the connected identity stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Unregistered,
    CreatingKey,
    KeyReady,
    Registering,
    Registered,
    /// The ledger lists a session key but this device has no copy of it.
    RegisteredNotActivated,
    Funding,
    Active,
    Revoking,
}

impl SessionState {
    /// States entered only while a command runs.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionState::CreatingKey
                | SessionState::Registering
                | SessionState::Funding
                | SessionState::Revoking
        )
    }

    /// Whether the session key may sign moves.
    pub fn can_sign_moves(&self) -> bool {
        matches!(self, SessionState::Registered | SessionState::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unregistered => "unregistered",
            SessionState::CreatingKey => "creating key",
            SessionState::KeyReady => "key ready",
            SessionState::Registering => "registering",
            SessionState::Registered => "registered",
            SessionState::RegisteredNotActivated => "registered, not activated",
            SessionState::Funding => "funding",
            SessionState::Active => "active",
            SessionState::Revoking => "revoking",
        };
        f.write_str(name)
    }
}

/// Everything the manager knows about the connected identity. Created on
/// connect, dropped on disconnect.
pub struct SessionContext {
    pub identity: Address,
    pub signer: Arc<dyn TransactionSigner>,
    pub state: SessionState,
    pub credential: Option<SessionCredential>,
    /// The session key the ledger last reported for this identity.
    pub registered_key: Option<Address>,
    /// Consecutive submissions whose outcome could not be determined.
    pub unresolved_streak: u32,
}

impl SessionContext {
    pub fn new(signer: Arc<dyn TransactionSigner>) -> Self {
        Self {
            identity: signer.address(),
            signer,
            state: SessionState::Unregistered,
            credential: None,
            registered_key: None,
            unresolved_streak: 0,
        }
    }

    /// The session credential, if it is the one the ledger has registered.
    pub fn usable_credential(&self) -> Option<&SessionCredential> {
        let credential = self.credential.as_ref()?;
        let registered = self.registered_key?;
        (self.state.can_sign_moves() && credential.address() == registered).then_some(credential)
    }

    /// The session credential once its wallet is funded, so it can pay fees.
    pub fn funded_credential(&self) -> Option<&SessionCredential> {
        self.usable_credential()
            .filter(|_| self.state == SessionState::Active)
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("session", &self.credential.as_ref().map(|c| c.address()))
            .field("registered_key", &self.registered_key)
            .finish()
    }
}

/// A snapshot of the context for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub identity: Address,
    pub state: SessionState,
    pub session_key: Option<Address>,
    pub registered_key: Option<Address>,
}

impl From<&SessionContext> for SessionStatus {
    fn from(ctx: &SessionContext) -> Self {
        Self {
            identity: ctx.identity,
            state: ctx.state,
            session_key: ctx.credential.as_ref().map(|c| c.address()),
            registered_key: ctx.registered_key,
        }
    }
}
