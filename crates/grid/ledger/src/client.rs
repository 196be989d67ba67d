//! The ledger access surface the rest of the client is written against.

use std::fmt;

use async_trait::async_trait;
use grid_types::{Account, Address, Hash, LedgerKind, Signature, Transaction};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, SubmitError};

/// Transaction id: the fee payer's signature.
pub type TxId = Signature;

/// Handle for a live account subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A pushed change to a watched account. `account` is `None` once the
/// account has been closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountUpdate {
    pub address: Address,
    pub account: Option<Account>,
}

/// A subscription's id plus the stream of updates it produces.
#[derive(Debug)]
pub struct AccountSubscription {
    pub id: SubscriptionId,
    pub updates: mpsc::Receiver<AccountUpdate>,
}

/// Read, submit, and watch access to one ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Which ledger this client talks to.
    fn kind(&self) -> LedgerKind;

    async fn get_account(&self, address: &Address) -> Result<Option<Account>>;

    /// All accounts owned by `owner` whose data starts with `discriminator`.
    async fn get_program_accounts(
        &self,
        owner: &Address,
        discriminator: &[u8; 8],
    ) -> Result<Vec<(Address, Account)>>;

    async fn latest_blockhash(&self) -> Result<Hash>;

    /// Submit a fully signed transaction and wait for confirmation.
    async fn submit(&self, tx: &Transaction) -> std::result::Result<TxId, SubmitError>;

    async fn subscribe(&self, address: &Address) -> Result<AccountSubscription>;

    /// Stop a subscription. Unknown ids are not an error.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    async fn request_airdrop(&self, address: &Address, lamports: u64) -> Result<TxId>;

    /// A zero-value touch that makes the ledger load `address`. On the rollup
    /// this pulls a freshly delegated account into its working set.
    async fn probe(&self, address: &Address) -> Result<()>;
}
