//! Session lifecycle and game command routing for the Gridline client.
//!
//! [`SessionLifecycleManager`] owns the per-identity [`SessionContext`] and
//! walks the session key through create, register, fund, activate and
//! revoke. [`GameClient`] routes game commands to the authoritative ledger
//! and signs them with the session key where that is allowed.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod game;
pub mod gate;
pub mod manager;
pub mod notify;
pub mod outcome;
pub mod state;
mod submit;

pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use game::{Actor, Command, GameClient};
pub use gate::{GateGuard, InFlightGate};
pub use manager::SessionLifecycleManager;
pub use notify::{CollectingNotifier, Notice, NoticeLevel, Notifier, TracingNotifier};
pub use outcome::{explain, Failure, FailureKind, Outcome};
pub use state::{SessionContext, SessionState, SessionStatus};
