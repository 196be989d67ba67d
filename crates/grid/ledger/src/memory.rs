//! In-memory ledger for tests and offline runs.
//!
//! Verifies signatures, applies system transfers and the game program's
//! account effects, pushes updates to subscribers, and lets tests script
//! submission failures.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use ed25519_dalek::{Verifier as _, VerifyingKey};
use grid_types::instruction::transfer_amount;
use grid_types::{
    Account, Address, GameOp, Hash, Instruction, LedgerKind, PlayerAccount, ProgramIds,
    Signature, Transaction, INITIAL_POSITION, SYSTEM_PROGRAM_ID,
};
use tokio::sync::mpsc;

use crate::client::{AccountSubscription, AccountUpdate, LedgerClient, SubscriptionId, TxId};
use crate::error::{LedgerError, Result, SubmitError};

const SUBSCRIPTION_BUFFER: usize = 64;

/// Program error codes reported by the game program emulation.
pub const UNAUTHORIZED_CODE: u32 = 6000;
pub const ALREADY_IN_USE_CODE: u32 = 0;
pub const INSUFFICIENT_FUNDS_CODE: u32 = 1;

/// How the next submission should end.
#[derive(Clone, Debug)]
enum Scripted {
    /// Fail without applying anything.
    Fail(SubmitError),
    /// Apply the transaction, then report the error anyway.
    LandThenFail(SubmitError),
}

pub struct InMemoryLedger {
    kind: LedgerKind,
    programs: ProgramIds,
    fee: u64,
    accounts: DashMap<Address, Account>,
    watchers: DashMap<Address, Vec<(SubscriptionId, mpsc::Sender<AccountUpdate>)>>,
    next_subscription: AtomicU64,
    blockhash_counter: AtomicU64,
    submitted: Mutex<Vec<Transaction>>,
    scripted: Mutex<VecDeque<Scripted>>,
    submit_lock: Mutex<()>,
    probes: AtomicU64,
    reads: AtomicU64,
    fail_probes: AtomicBool,
    fail_reads: AtomicBool,
    failing_reads: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryLedger {
    pub fn new(kind: LedgerKind, programs: ProgramIds) -> Self {
        Self {
            kind,
            programs,
            fee: 0,
            accounts: DashMap::new(),
            watchers: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            blockhash_counter: AtomicU64::new(1),
            submitted: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            submit_lock: Mutex::new(()),
            probes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            fail_probes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            failing_reads: AtomicU64::new(0),
        }
    }

    pub fn primary() -> Self {
        Self::new(LedgerKind::Primary, ProgramIds::default())
    }

    pub fn rollup() -> Self {
        Self::new(LedgerKind::Rollup, ProgramIds::default())
    }

    /// Charge `fee` lamports to the fee payer of every submission.
    pub fn with_fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    pub fn programs(&self) -> ProgramIds {
        self.programs
    }

    pub fn set_account(&self, address: Address, account: Account) {
        self.accounts.insert(address, account.clone());
        self.notify(&address, Some(account));
    }

    pub fn remove_account(&self, address: &Address) {
        self.accounts.remove(address);
        self.notify(address, None);
    }

    pub fn account(&self, address: &Address) -> Option<Account> {
        self.accounts.get(address).map(|a| a.value().clone())
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.account(address).map(|a| a.lamports).unwrap_or(0)
    }

    /// Write a `Player` record at its derived address, owned by `owner`.
    pub fn put_player(&self, player: &PlayerAccount, owner: Address) -> Result<Address> {
        let (address, _) = self.programs.player_address(&player.authority)?;
        self.set_account(
            address,
            Account {
                owner,
                lamports: 1_000_000,
                data: player.encode(),
            },
        );
        Ok(address)
    }

    pub fn player(&self, authority: &Address) -> Option<PlayerAccount> {
        let (address, _) = self.programs.player_address(authority).ok()?;
        PlayerAccount::decode(&self.account(&address)?.data).ok()
    }

    /// Reassign the owner of an existing account, as delegation does.
    pub fn set_owner(&self, address: &Address, owner: Address) {
        let updated = self.accounts.get_mut(address).map(|mut entry| {
            entry.owner = owner;
            entry.clone()
        });
        if let Some(account) = updated {
            self.notify(address, Some(account));
        }
    }

    /// The next submission fails with `err` and changes nothing.
    pub fn script_failure(&self, err: SubmitError) {
        lock(&self.scripted).push_back(Scripted::Fail(err));
    }

    /// The next submission is applied but still reports `err`.
    pub fn script_landed_failure(&self, err: SubmitError) {
        lock(&self.scripted).push_back(Scripted::LandThenFail(err));
    }

    pub fn fail_probes(&self, fail: bool) {
        self.fail_probes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// The next `count` account reads fail, later ones succeed.
    pub fn fail_next_reads(&self, count: u64) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<Transaction> {
        lock(&self.submitted).clone()
    }

    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Live subscriptions across all addresses.
    pub fn subscription_count(&self) -> usize {
        self.watchers
            .iter()
            .map(|entry| entry.value().iter().filter(|(_, tx)| !tx.is_closed()).count())
            .sum()
    }

    fn notify(&self, address: &Address, account: Option<Account>) {
        if let Some(mut watchers) = self.watchers.get_mut(address) {
            watchers.retain(|(_, tx)| !tx.is_closed());
            for (id, tx) in watchers.iter() {
                let update = AccountUpdate {
                    address: *address,
                    account: account.clone(),
                };
                if tx.try_send(update).is_err() {
                    tracing::warn!(
                        ledger = %self.kind,
                        subscription = %id,
                        "subscriber lagging, update dropped"
                    );
                }
            }
        }
    }

    fn verify_signatures(tx: &Transaction) -> std::result::Result<Vec<Address>, SubmitError> {
        let message = tx.message_bytes()?;
        let slots = tx.signer_slots()?;
        for (address, signature) in &slots {
            if signature.is_placeholder() {
                return Err(rejected(format!("missing signature for {address}"), None));
            }
            let valid = VerifyingKey::from_bytes(address.as_bytes())
                .map(|key| {
                    key.verify(
                        &message,
                        &ed25519_dalek::Signature::from_bytes(signature.as_bytes()),
                    )
                    .is_ok()
                })
                .unwrap_or(false);
            if !valid {
                return Err(rejected("signature verification failed".into(), None));
            }
        }
        Ok(slots.into_iter().map(|(address, _)| address).collect())
    }

    /// Compute the account changes `tx` makes without committing them.
    fn execute(
        &self,
        tx: &Transaction,
        signers: &[Address],
    ) -> std::result::Result<HashMap<Address, Account>, SubmitError> {
        let mut staged: HashMap<Address, Account> = HashMap::new();
        let load = |staged: &HashMap<Address, Account>, address: &Address| {
            staged
                .get(address)
                .cloned()
                .or_else(|| self.account(address))
        };

        if self.fee > 0 {
            let payer = tx
                .fee_payer()
                .ok_or_else(|| rejected("missing fee payer".into(), None))?;
            let mut account = load(&staged, &payer).unwrap_or_else(|| empty_wallet(0));
            account.lamports = account.lamports.checked_sub(self.fee).ok_or_else(|| {
                rejected(
                    "insufficient funds for fee".into(),
                    Some(INSUFFICIENT_FUNDS_CODE),
                )
            })?;
            staged.insert(payer, account);
        }

        for ix in tx.instructions() {
            if let Some(lamports) = transfer_amount(&ix) {
                let (from, to) = match (ix.accounts.get(0), ix.accounts.get(1)) {
                    (Some(from), Some(to)) => (from.address, to.address),
                    _ => return Err(rejected("transfer missing accounts".into(), None)),
                };
                let mut source = load(&staged, &from).unwrap_or_else(|| empty_wallet(0));
                source.lamports = source.lamports.checked_sub(lamports).ok_or_else(|| {
                    rejected(
                        "insufficient lamports for transfer".into(),
                        Some(INSUFFICIENT_FUNDS_CODE),
                    )
                })?;
                staged.insert(from, source);
                let mut dest = load(&staged, &to).unwrap_or_else(|| empty_wallet(0));
                dest.lamports = dest.lamports.saturating_add(lamports);
                staged.insert(to, dest);
            } else if ix.program_id == self.programs.game {
                self.execute_game(&ix, signers, &mut staged, &load)?;
            }
        }
        Ok(staged)
    }

    fn execute_game(
        &self,
        ix: &Instruction,
        signers: &[Address],
        staged: &mut HashMap<Address, Account>,
        load: &dyn Fn(&HashMap<Address, Account>, &Address) -> Option<Account>,
    ) -> std::result::Result<(), SubmitError> {
        let op = GameOp::from_data(&ix.data)
            .ok_or_else(|| rejected("unknown instruction".into(), Some(101)))?;
        let meta = |i: usize| {
            ix.accounts
                .get(i)
                .map(|m| m.address)
                .ok_or_else(|| rejected(format!("{} missing account {i}", op.name()), None))
        };
        let signed = |address: &Address| signers.contains(address);

        match op {
            GameOp::Initialize => {
                let board = meta(0)?;
                if load(staged, &board).is_some() {
                    return Err(already_in_use(&board));
                }
                let authority = meta(1)?;
                staged.insert(
                    board,
                    Account {
                        owner: self.programs.game,
                        lamports: 1_000_000,
                        data: grid_types::BoardAccount { authority }.encode(),
                    },
                );
            }
            GameOp::JoinGame => {
                let player = meta(0)?;
                let authority = meta(1)?;
                if load(staged, &player).is_some() {
                    return Err(already_in_use(&player));
                }
                let (_, bump) = self.programs.player_address(&authority)?;
                let record = PlayerAccount {
                    authority,
                    position: INITIAL_POSITION,
                    bump,
                    session_key: None,
                };
                staged.insert(
                    player,
                    Account {
                        owner: self.programs.game,
                        lamports: 1_000_000,
                        data: record.encode(),
                    },
                );
            }
            GameOp::MovePlayer => {
                let (address, mut account, mut record) = self.load_player(staged, load, meta(0)?)?;
                let signer = meta(1)?;
                let authorized =
                    signer == record.authority || record.session_key == Some(signer);
                if !signed(&signer) || !authorized {
                    return Err(unauthorized());
                }
                let (dx, dy) = match ix.data.get(8..10) {
                    Some(&[dx, dy]) => (dx as i8, dy as i8),
                    _ => return Err(rejected("malformed move arguments".into(), Some(102))),
                };
                record.position = grid_types::clamp_move(record.position, dx, dy);
                account.data = record.encode();
                staged.insert(address, account);
            }
            GameOp::RegisterSessionKey | GameOp::RevokeSessionKey => {
                let (address, mut account, mut record) = self.load_player(staged, load, meta(0)?)?;
                let authority = meta(1)?;
                if authority != record.authority || !signed(&authority) {
                    return Err(unauthorized());
                }
                record.session_key = if op == GameOp::RegisterSessionKey {
                    let key = ix
                        .data
                        .get(8..40)
                        .ok_or_else(|| rejected("malformed session key".into(), Some(102)))?;
                    Some(Address::from_slice(key)?)
                } else {
                    None
                };
                account.data = record.encode();
                staged.insert(address, account);
            }
            GameOp::Delegate => {
                let address = meta(1)?;
                let mut account = load(staged, &address)
                    .ok_or_else(|| rejected("player account not found".into(), Some(3012)))?;
                if account.owner != self.programs.game {
                    return Err(rejected("account already delegated".into(), Some(3007)));
                }
                account.owner = self.programs.delegation;
                staged.insert(address, account);
            }
            // Commit and release happen on the delegation layer, outside this ledger.
            GameOp::Undelegate => {}
        }
        Ok(())
    }

    fn load_player(
        &self,
        staged: &HashMap<Address, Account>,
        load: &dyn Fn(&HashMap<Address, Account>, &Address) -> Option<Account>,
        address: Address,
    ) -> std::result::Result<(Address, Account, PlayerAccount), SubmitError> {
        let account = load(staged, &address)
            .ok_or_else(|| rejected("player account not found".into(), Some(3012)))?;
        if account.owner != self.programs.game {
            return Err(rejected(
                "account is not owned by the game program".into(),
                Some(3007),
            ));
        }
        let record = PlayerAccount::decode(&account.data)
            .map_err(|e| rejected(format!("player account corrupt: {e}"), Some(3003)))?;
        Ok((address, account, record))
    }

    fn next_blockhash(&self) -> Hash {
        let n = self.blockhash_counter.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&n.to_le_bytes());
        bytes[31] = match self.kind {
            LedgerKind::Primary => 1,
            LedgerKind::Rollup => 2,
        };
        Hash::new(bytes)
    }

    fn check_reads(&self) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing || self.fail_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport(format!("{} ledger unreachable", self.kind)));
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("kind", &self.kind)
            .field("accounts", &self.accounts.len())
            .finish_non_exhaustive()
    }
}

fn empty_wallet(lamports: u64) -> Account {
    Account {
        owner: SYSTEM_PROGRAM_ID,
        lamports,
        data: Vec::new(),
    }
}

fn rejected(reason: String, code: Option<u32>) -> SubmitError {
    SubmitError::Rejected { reason, code }
}

fn already_in_use(address: &Address) -> SubmitError {
    rejected(
        format!("account {address} already in use"),
        Some(ALREADY_IN_USE_CODE),
    )
}

fn unauthorized() -> SubmitError {
    rejected("signer is not authorized for this player".into(), Some(UNAUTHORIZED_CODE))
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    fn kind(&self) -> LedgerKind {
        self.kind
    }

    async fn get_account(&self, address: &Address) -> Result<Option<Account>> {
        self.check_reads()?;
        Ok(self.account(address))
    }

    async fn get_program_accounts(
        &self,
        owner: &Address,
        discriminator: &[u8; 8],
    ) -> Result<Vec<(Address, Account)>> {
        self.check_reads()?;
        let mut found: Vec<(Address, Account)> = self
            .accounts
            .iter()
            .filter(|entry| {
                entry.value().owner == *owner && entry.value().data.starts_with(discriminator)
            })
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    async fn latest_blockhash(&self) -> Result<Hash> {
        Ok(self.next_blockhash())
    }

    async fn submit(&self, tx: &Transaction) -> std::result::Result<TxId, SubmitError> {
        let _serial = lock(&self.submit_lock);
        let signers = Self::verify_signatures(tx)?;
        let id = tx
            .id()
            .ok_or_else(|| rejected("missing fee payer signature".into(), None))?;

        let scripted = lock(&self.scripted).pop_front();
        if let Some(Scripted::Fail(err)) = scripted {
            tracing::debug!(ledger = %self.kind, error = %err, "scripted submission failure");
            return Err(err);
        }

        let staged = self.execute(tx, &signers)?;
        for (address, account) in staged {
            self.accounts.insert(address, account.clone());
            self.notify(&address, Some(account));
        }
        lock(&self.submitted).push(tx.clone());

        match scripted {
            Some(Scripted::LandThenFail(err)) => Err(err),
            _ => Ok(id),
        }
    }

    async fn subscribe(&self, address: &Address) -> Result<AccountSubscription> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.watchers.entry(*address).or_default().push((id, tx));
        Ok(AccountSubscription { id, updates: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        for mut entry in self.watchers.iter_mut() {
            entry.value_mut().retain(|(sub, _)| *sub != id);
        }
        Ok(())
    }

    async fn request_airdrop(&self, address: &Address, lamports: u64) -> Result<TxId> {
        let mut account = self.account(address).unwrap_or_else(|| empty_wallet(0));
        account.lamports = account.lamports.saturating_add(lamports);
        self.set_account(*address, account);
        let n = self.blockhash_counter.fetch_add(1, Ordering::SeqCst);
        let mut sig = [0u8; 64];
        sig[..8].copy_from_slice(&n.to_le_bytes());
        sig[32..].copy_from_slice(address.as_bytes());
        Ok(Signature::new(sig))
    }

    async fn probe(&self, address: &Address) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.fail_probes.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport(format!(
                "probe of {address} failed on {} ledger",
                self.kind
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer as _, SigningKey};
    use grid_types::instruction::transfer;
    use grid_types::{GameInstructions, LegacyTransaction, Position};

    struct Key(SigningKey);

    impl Key {
        fn new(seed: u8) -> Self {
            Key(SigningKey::from_bytes(&[seed; 32]))
        }

        fn address(&self) -> Address {
            Address::new(self.0.verifying_key().to_bytes())
        }

        fn sign(&self, mut tx: LegacyTransaction) -> Transaction {
            tx.set_fee_payer(self.address());
            let bytes = tx.message_bytes().unwrap();
            tx.add_signature(self.address(), Signature::new(self.0.sign(&bytes).to_bytes()));
            tx.into()
        }
    }

    async fn send(ledger: &InMemoryLedger, key: &Key, ixs: Vec<Instruction>) -> std::result::Result<TxId, SubmitError> {
        let hash = ledger.latest_blockhash().await.unwrap();
        ledger.submit(&key.sign(LegacyTransaction::new(ixs, hash))).await
    }

    #[tokio::test]
    async fn join_then_move_clamps() {
        let ledger = InMemoryLedger::primary();
        let game = GameInstructions::new(ledger.programs());
        let alice = Key::new(1);

        send(&ledger, &alice, vec![game.join_game(&alice.address()).unwrap()])
            .await
            .unwrap();
        assert_eq!(ledger.player(&alice.address()).unwrap().position, INITIAL_POSITION);

        send(
            &ledger,
            &alice,
            vec![game.move_player(&alice.address(), &alice.address(), -50, -50).unwrap()],
        )
        .await
        .unwrap();
        assert_eq!(ledger.player(&alice.address()).unwrap().position, Position::new(0, 0));
    }

    #[tokio::test]
    async fn second_join_is_already_in_use() {
        let ledger = InMemoryLedger::primary();
        let game = GameInstructions::new(ledger.programs());
        let alice = Key::new(1);
        let join = game.join_game(&alice.address()).unwrap();
        send(&ledger, &alice, vec![join.clone()]).await.unwrap();
        let err = send(&ledger, &alice, vec![join]).await.unwrap_err();
        assert!(err.is_already_in_use());
        assert!(!err.is_ambiguous());
    }

    #[tokio::test]
    async fn unsigned_transaction_is_rejected() {
        let ledger = InMemoryLedger::primary();
        let alice = Key::new(1);
        let tx = LegacyTransaction::new(
            vec![transfer(&alice.address(), &Address::new([5; 32]), 1)],
            Hash::new([0; 32]),
        )
        .with_fee_payer(alice.address());
        let err = ledger.submit(&tx.into()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Rejected { .. }));
    }

    #[tokio::test]
    async fn session_key_may_move_only_once_registered() {
        let ledger = InMemoryLedger::primary();
        let game = GameInstructions::new(ledger.programs());
        let alice = Key::new(1);
        let session = Key::new(2);
        send(&ledger, &alice, vec![game.join_game(&alice.address()).unwrap()])
            .await
            .unwrap();

        let step = game
            .move_player(&alice.address(), &session.address(), 1, 1)
            .unwrap();
        let err = send(&ledger, &session, vec![step.clone()]).await.unwrap_err();
        assert!(matches!(err, SubmitError::Rejected { code: Some(UNAUTHORIZED_CODE), .. }));

        send(
            &ledger,
            &alice,
            vec![game
                .register_session_key(&alice.address(), &session.address())
                .unwrap()],
        )
        .await
        .unwrap();
        send(&ledger, &session, vec![step]).await.unwrap();
        assert_eq!(ledger.player(&alice.address()).unwrap().position, Position::new(11, 11));
    }

    #[tokio::test]
    async fn fees_and_transfers_move_lamports() {
        let ledger = InMemoryLedger::primary().with_fee(5_000);
        let alice = Key::new(1);
        let bob = Address::new([9; 32]);
        ledger.request_airdrop(&alice.address(), 1_000_000).await.unwrap();
        send(&ledger, &alice, vec![transfer(&alice.address(), &bob, 10_000)])
            .await
            .unwrap();
        assert_eq!(ledger.balance(&bob), 10_000);
        assert_eq!(ledger.balance(&alice.address()), 1_000_000 - 10_000 - 5_000);
    }

    #[tokio::test]
    async fn transfer_without_destination_is_rejected() {
        let ledger = InMemoryLedger::primary();
        let alice = Key::new(1);
        ledger.request_airdrop(&alice.address(), 100).await.unwrap();

        let mut ix = transfer(&alice.address(), &Address::new([9; 32]), 10);
        ix.accounts.truncate(1);
        let err = send(&ledger, &alice, vec![ix]).await.unwrap_err();
        assert!(matches!(err, SubmitError::Rejected { .. }));
        assert_eq!(ledger.balance(&alice.address()), 100);
    }

    #[tokio::test]
    async fn scripted_failures() {
        let ledger = InMemoryLedger::primary();
        let alice = Key::new(1);
        let bob = Address::new([9; 32]);
        ledger.request_airdrop(&alice.address(), 100).await.unwrap();

        ledger.script_failure(SubmitError::Timeout);
        let err = send(&ledger, &alice, vec![transfer(&alice.address(), &bob, 10)])
            .await
            .unwrap_err();
        assert!(err.is_ambiguous());
        assert_eq!(ledger.balance(&bob), 0);

        ledger.script_landed_failure(SubmitError::Expired);
        send(&ledger, &alice, vec![transfer(&alice.address(), &bob, 10)])
            .await
            .unwrap_err();
        assert_eq!(ledger.balance(&bob), 10);
    }

    #[tokio::test]
    async fn subscribers_receive_updates_until_unsubscribed() {
        let ledger = InMemoryLedger::primary();
        let address = Address::new([4; 32]);
        let mut sub = ledger.subscribe(&address).await.unwrap();
        assert_eq!(ledger.subscription_count(), 1);

        ledger.set_account(address, empty_wallet(7));
        let update = sub.updates.recv().await.unwrap();
        assert_eq!(update.account.unwrap().lamports, 7);

        ledger.unsubscribe(sub.id).await.unwrap();
        ledger.unsubscribe(sub.id).await.unwrap();
        assert_eq!(ledger.subscription_count(), 0);
        assert!(sub.updates.recv().await.is_none());
    }
}
