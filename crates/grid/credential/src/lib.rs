//! Session credentials for the Gridline client.
//!
//! A session key is derived deterministically from a signature by the
//! user's primary identity, cached locally per origin, and used to sign
//! gameplay transactions without further wallet prompts.

#![deny(unsafe_code)]

pub mod cache;
pub mod deriver;
pub mod error;
pub mod keypair;
pub mod session;
pub mod signer;

pub use cache::{CacheProtection, CacheStore, CredentialCache, FileStore, MemoryStore, SealingKey};
pub use deriver::{CredentialDeriver, DERIVATION_PROMPT};
pub use error::{CacheError, CredentialError, Result, SignerError};
pub use keypair::{verify, SessionKeyMaterial, KEYPAIR_LEN};
pub use session::SessionCredential;
pub use signer::{
    sign_with, LocalKeypairSigner, MessageSigner, SignerCapability, TransactionOnly,
    TransactionSigner,
};
