//! JSON-RPC client over HTTP.
//!
//! Subscriptions are served by polling `getAccountInfo`, which works against
//! both the primary cluster and rollup endpoints without a websocket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use grid_types::{Account, Address, Hash, LedgerKind, Transaction};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::{AccountSubscription, AccountUpdate, LedgerClient, SubscriptionId, TxId};
use crate::error::{LedgerError, Result, SubmitError};

const SUBSCRIPTION_BUFFER: usize = 64;

/// Connection settings for one ledger endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub url: String,

    #[serde(default = "default_commitment")]
    pub commitment: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_confirm_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl RpcConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            commitment: default_commitment(),
            request_timeout_secs: default_request_timeout_secs(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize)]
struct UiAccount {
    data: (String, String),
    owner: String,
    lamports: u64,
}

#[derive(Deserialize)]
struct KeyedAccount {
    pubkey: String,
    account: UiAccount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestBlockhash {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
    err: Option<Value>,
    confirmation_status: Option<String>,
}

impl UiAccount {
    fn decode(self) -> Result<Account> {
        let owner = self
            .owner
            .parse::<Address>()
            .map_err(|e| LedgerError::Malformed(e.to_string()))?;
        let data = BASE64
            .decode(self.data.0.as_bytes())
            .map_err(|e| LedgerError::Malformed(format!("account data: {e}")))?;
        Ok(Account {
            owner,
            lamports: self.lamports,
            data,
        })
    }
}

struct Inner {
    kind: LedgerKind,
    config: RpcConfig,
    http: Client,
    next_request: AtomicU64,
    /// Last valid block height per handed-out blockhash.
    expiry: DashMap<Hash, u64>,
}

impl Inner {
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_request.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LedgerError::Transport(format!("http {status}: {message}")));
        }

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| LedgerError::Malformed(format!("{method}: {e}")))?;
        match (parsed.result, parsed.error) {
            (_, Some(err)) => Err(LedgerError::Rpc {
                code: err.code,
                message: err.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(LedgerError::Malformed(format!("{method}: empty response"))),
        }
    }

    async fn get_account(&self, address: &Address) -> Result<Option<Account>> {
        let response: WithContext<Option<UiAccount>> = self
            .call(
                "getAccountInfo",
                json!([
                    address.to_string(),
                    { "encoding": "base64", "commitment": self.config.commitment }
                ]),
            )
            .await?;
        response.value.map(UiAccount::decode).transpose()
    }

    async fn block_height(&self) -> Result<u64> {
        self.call(
            "getBlockHeight",
            json!([{ "commitment": self.config.commitment }]),
        )
        .await
    }

    async fn send_and_confirm(
        &self,
        wire: Vec<u8>,
        blockhash: &Hash,
    ) -> std::result::Result<TxId, SubmitError> {
        let sent: std::result::Result<String, LedgerError> = self
            .call(
                "sendTransaction",
                json!([
                    BASE64.encode(wire),
                    { "encoding": "base64", "preflightCommitment": self.config.commitment }
                ]),
            )
            .await;

        let signature = match sent {
            Ok(signature) => signature
                .parse::<TxId>()
                .map_err(|e| SubmitError::Transport(e.to_string()))?,
            Err(LedgerError::Rpc { message, .. }) => {
                let code = custom_error_code(&message);
                return Err(SubmitError::Rejected {
                    reason: message,
                    code,
                });
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(ledger = %self.kind, signature = %signature, "submitted transaction");
        self.confirm(&signature, blockhash).await?;
        Ok(signature)
    }

    async fn confirm(&self, signature: &TxId, blockhash: &Hash) -> std::result::Result<(), SubmitError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.confirm_timeout_secs);
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        let last_valid = self.expiry.get(blockhash).map(|h| *h);

        loop {
            ticker.tick().await;
            if tokio::time::Instant::now() >= deadline {
                return Err(SubmitError::Timeout);
            }

            let statuses: WithContext<Vec<Option<SignatureStatus>>> = match self
                .call(
                    "getSignatureStatuses",
                    json!([[signature.to_string()], { "searchTransactionHistory": false }]),
                )
                .await
            {
                Ok(statuses) => statuses,
                Err(e) => {
                    tracing::debug!(ledger = %self.kind, error = %e, "status poll failed");
                    continue;
                }
            };

            if let Some(Some(status)) = statuses.value.into_iter().next() {
                if let Some(err) = status.err {
                    return Err(rejection_from_value(&err));
                }
                let level = status.confirmation_status.as_deref().unwrap_or("processed");
                if level_reached(level, &self.config.commitment) {
                    return Ok(());
                }
                continue;
            }

            if let Some(last_valid) = last_valid {
                if let Ok(height) = self.block_height().await {
                    if height > last_valid {
                        return Err(SubmitError::Expired);
                    }
                }
            }
        }
    }
}

/// Blocks a blockhash stays valid after it is handed out.
const BLOCKHASH_VALIDITY: u64 = 150;

/// Drop blockhashes that expired before the one valid until `newest`.
fn prune_expired(expiry: &DashMap<Hash, u64>, newest: u64) {
    let current = newest.saturating_sub(BLOCKHASH_VALIDITY);
    expiry.retain(|_, last_valid| *last_valid >= current);
}

/// Change detection for a polled account. The first observation is always
/// reported.
#[derive(Default)]
struct AccountPoll {
    last: Option<Option<Account>>,
}

impl AccountPoll {
    fn observe(&mut self, current: Option<Account>) -> Option<Option<Account>> {
        if self.last.as_ref() == Some(&current) {
            return None;
        }
        self.last = Some(current.clone());
        Some(current)
    }
}

fn level_reached(level: &str, wanted: &str) -> bool {
    let rank = |s: &str| match s {
        "finalized" => 2,
        "confirmed" => 1,
        _ => 0,
    };
    rank(level) >= rank(wanted)
}

/// Pull `custom program error: 0x..` out of a preflight message.
fn custom_error_code(message: &str) -> Option<u32> {
    let hex = message.split("custom program error: 0x").nth(1)?;
    let digits: String = hex.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
    u32::from_str_radix(&digits, 16).ok()
}

fn rejection_from_value(err: &Value) -> SubmitError {
    let code = err
        .pointer("/InstructionError/1/Custom")
        .and_then(Value::as_u64)
        .and_then(|c| u32::try_from(c).ok());
    SubmitError::Rejected {
        reason: err.to_string(),
        code,
    }
}

/// `LedgerClient` backed by a JSON-RPC endpoint.
pub struct RpcLedgerClient {
    inner: Arc<Inner>,
    next_subscription: AtomicU64,
    pollers: DashMap<SubscriptionId, JoinHandle<()>>,
}

impl RpcLedgerClient {
    pub fn new(kind: LedgerKind, config: RpcConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                kind,
                config,
                http,
                next_request: AtomicU64::new(1),
                expiry: DashMap::new(),
            }),
            next_subscription: AtomicU64::new(1),
            pollers: DashMap::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }
}

impl Drop for RpcLedgerClient {
    fn drop(&mut self) {
        for entry in self.pollers.iter() {
            entry.value().abort();
        }
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    fn kind(&self) -> LedgerKind {
        self.inner.kind
    }

    async fn get_account(&self, address: &Address) -> Result<Option<Account>> {
        self.inner.get_account(address).await
    }

    async fn get_program_accounts(
        &self,
        owner: &Address,
        discriminator: &[u8; 8],
    ) -> Result<Vec<(Address, Account)>> {
        let keyed: Vec<KeyedAccount> = self
            .inner
            .call(
                "getProgramAccounts",
                json!([
                    owner.to_string(),
                    {
                        "encoding": "base64",
                        "commitment": self.inner.config.commitment,
                        "filters": [
                            { "memcmp": { "offset": 0, "bytes": bs58::encode(discriminator).into_string() } }
                        ]
                    }
                ]),
            )
            .await?;
        keyed
            .into_iter()
            .map(|k| {
                let address = k
                    .pubkey
                    .parse::<Address>()
                    .map_err(|e| LedgerError::Malformed(e.to_string()))?;
                Ok((address, k.account.decode()?))
            })
            .collect()
    }

    async fn latest_blockhash(&self) -> Result<Hash> {
        let response: WithContext<LatestBlockhash> = self
            .inner
            .call(
                "getLatestBlockhash",
                json!([{ "commitment": self.inner.config.commitment }]),
            )
            .await?;
        let hash = response
            .value
            .blockhash
            .parse::<Hash>()
            .map_err(|e| LedgerError::Malformed(e.to_string()))?;
        let last_valid = response.value.last_valid_block_height;
        prune_expired(&self.inner.expiry, last_valid);
        self.inner.expiry.insert(hash, last_valid);
        Ok(hash)
    }

    async fn submit(&self, tx: &Transaction) -> std::result::Result<TxId, SubmitError> {
        let wire = tx.to_wire()?;
        let blockhash = tx.message()?.recent_blockhash;
        let result = self.inner.send_and_confirm(wire, &blockhash).await;
        self.inner.expiry.remove(&blockhash);
        result
    }

    async fn subscribe(&self, address: &Address) -> Result<AccountSubscription> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let inner = self.inner.clone();
        let address = *address;
        let period = Duration::from_millis(inner.config.poll_interval_ms);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut poll = AccountPoll::default();
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                match inner.get_account(&address).await {
                    Ok(current) => {
                        let Some(account) = poll.observe(current) else {
                            continue;
                        };
                        if tx.send(AccountUpdate { address, account }).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            ledger = %inner.kind,
                            address = %address,
                            error = %e,
                            "account poll failed"
                        );
                    }
                }
            }
        });
        self.pollers.retain(|_, handle| !handle.is_finished());
        self.pollers.insert(id, handle);
        Ok(AccountSubscription { id, updates: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if let Some((_, handle)) = self.pollers.remove(&id) {
            handle.abort();
        }
        self.pollers.retain(|_, handle| !handle.is_finished());
        Ok(())
    }

    async fn request_airdrop(&self, address: &Address, lamports: u64) -> Result<TxId> {
        let signature: String = self
            .inner
            .call("requestAirdrop", json!([address.to_string(), lamports]))
            .await?;
        signature
            .parse::<TxId>()
            .map_err(|e| LedgerError::Malformed(e.to_string()))
    }

    async fn probe(&self, address: &Address) -> Result<()> {
        let _: WithContext<u64> = self
            .inner
            .call(
                "getBalance",
                json!([address.to_string(), { "commitment": self.inner.config.commitment }]),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_custom_program_error() {
        let msg = "Transaction simulation failed: Error processing Instruction 0: custom program error: 0x0";
        assert_eq!(custom_error_code(msg), Some(0));
        assert_eq!(
            custom_error_code("custom program error: 0x1770 (unauthorized)"),
            Some(6000)
        );
        assert_eq!(custom_error_code("blockhash not found"), None);
    }

    #[test]
    fn status_error_carries_custom_code() {
        let err = rejection_from_value(&json!({ "InstructionError": [0, { "Custom": 6000 }] }));
        assert!(matches!(err, SubmitError::Rejected { code: Some(6000), .. }));
    }

    fn wallet(lamports: u64) -> Account {
        Account {
            owner: Address::new([0u8; 32]),
            lamports,
            data: Vec::new(),
        }
    }

    #[test]
    fn first_poll_is_reported() {
        let mut poll = AccountPoll::default();
        assert_eq!(poll.observe(Some(wallet(5))), Some(Some(wallet(5))));
        assert_eq!(poll.observe(Some(wallet(5))), None);
        assert_eq!(poll.observe(None), Some(None));
        assert_eq!(poll.observe(None), None);

        let mut missing = AccountPoll::default();
        assert_eq!(missing.observe(None), Some(None));
    }

    #[test]
    fn expired_blockhashes_are_pruned() {
        let expiry = DashMap::new();
        expiry.insert(Hash::new([1u8; 32]), 1_000);
        expiry.insert(Hash::new([2u8; 32]), 1_100);
        prune_expired(&expiry, 1_200);
        assert!(!expiry.contains_key(&Hash::new([1u8; 32])));
        assert!(expiry.contains_key(&Hash::new([2u8; 32])));
    }

    #[test]
    fn commitment_levels_are_ordered() {
        assert!(level_reached("finalized", "confirmed"));
        assert!(level_reached("confirmed", "confirmed"));
        assert!(!level_reached("processed", "confirmed"));
    }

    #[test]
    fn ui_account_decodes_base64_data() {
        let ui: UiAccount = serde_json::from_value(json!({
            "data": [BASE64.encode([1u8, 2, 3]), "base64"],
            "owner": Address::new([0u8; 32]).to_string(),
            "lamports": 42,
            "executable": false,
            "rentEpoch": 0
        }))
        .unwrap();
        let account = ui.decode().unwrap();
        assert_eq!(account.data, vec![1, 2, 3]);
        assert_eq!(account.lamports, 42);
    }

    #[test]
    fn config_defaults_fill_in() {
        let config: RpcConfig =
            serde_json::from_value(json!({ "url": "http://127.0.0.1:8899" })).unwrap();
        assert_eq!(config.commitment, "confirmed");
        assert_eq!(config.confirm_timeout_secs, 60);
    }
}
