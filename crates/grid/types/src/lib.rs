//! Shared types for the Gridline client.
//!
//! This crate provides:
//! - base58 identifiers (`Address`, `Hash`, `Signature`)
//! - board geometry and the on-chain move clamp
//! - program ids, program-derived addresses, and Anchor discriminators
//! - decoders for the game program's `Player` and `Board` accounts
//! - instruction builders and the legacy / v0 transaction wire format

#![deny(unsafe_code)]

pub mod account;
pub mod address;
pub mod board;
pub mod error;
pub mod instruction;
pub mod ledger;
pub mod program;
pub mod tx;

pub use account::{Account, BoardAccount, PlayerAccount};
pub use address::{Address, Hash, Signature};
pub use board::{clamp_move, Position, BOARD_SIZE, INITIAL_POSITION};
pub use error::{Result, TypesError};
pub use instruction::{AccountMeta, GameInstructions, GameOp, Instruction};
pub use ledger::LedgerKind;
pub use program::{ProgramIds, DELEGATION_PROGRAM_ID, GAME_PROGRAM_ID, SYSTEM_PROGRAM_ID};
pub use tx::{LegacyTransaction, Message, Transaction, VersionedTransaction};
