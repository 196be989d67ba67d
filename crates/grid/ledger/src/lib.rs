//! Ledger access for the Gridline client.
//!
//! A player record lives on the primary ledger and may be delegated to a
//! rollup. This crate provides:
//! - the [`LedgerClient`] trait with an RPC implementation and an in-memory
//!   double
//! - [`DualLedgerView`], which decides per observation which ledger is
//!   authoritative and keeps listeners attached to both
//! - the pure [`reconcile`] merge and the board roster

#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod memory;
pub mod reconcile;
pub mod roster;
pub mod rpc;
pub mod view;

pub use client::{AccountSubscription, AccountUpdate, LedgerClient, SubscriptionId, TxId};
pub use error::{LedgerError, Result, SubmitError, ViewError};
pub use memory::InMemoryLedger;
pub use reconcile::{is_delegated, reconcile, EntitySnapshot, ReconciledView};
pub use roster::{merge_roster, RosterEntry, RosterPoller};
pub use rpc::{RpcConfig, RpcLedgerClient};
pub use view::{read_delegation, DelegationObserver, DualLedgerView, ViewConfig};
