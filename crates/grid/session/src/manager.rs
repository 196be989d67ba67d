//! Session key lifecycle for the connected identity.
//!
//! Every command that touches the ledger takes the per-identity
//! [`InFlightGate`] and reports an [`Outcome`]. Submissions whose fate is
//! unknown are settled by re-reading the ledger before any state changes.

use std::sync::Arc;

use async_trait::async_trait;
use grid_credential::{CredentialCache, CredentialDeriver, SessionCredential, TransactionSigner};
use grid_ledger::{read_delegation, DelegationObserver, LedgerClient, SubmitError, TxId};
use grid_types::instruction::transfer;
use grid_types::{Address, GameInstructions, GameOp, PlayerAccount, ProgramIds};
use tokio::sync::RwLock;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::gate::InFlightGate;
use crate::notify::{NoticeLevel, Notifier};
use crate::outcome::{Failure, FailureKind, Outcome};
use crate::state::{SessionContext, SessionState, SessionStatus};
use crate::submit::{sign_and_submit, SubmitFailure};

/// Whether an ambiguous submission took effect, as far as a re-read can tell.
enum Settled {
    Landed,
    NotLanded,
    Unknown(String),
}

pub struct SessionLifecycleManager {
    config: SessionConfig,
    primary: Arc<dyn LedgerClient>,
    rollup: Arc<dyn LedgerClient>,
    programs: ProgramIds,
    game: GameInstructions,
    cache: CredentialCache,
    deriver: CredentialDeriver,
    notifier: Arc<dyn Notifier>,
    gate: InFlightGate,
    context: RwLock<Option<SessionContext>>,
}

impl SessionLifecycleManager {
    pub fn new(
        config: SessionConfig,
        primary: Arc<dyn LedgerClient>,
        rollup: Arc<dyn LedgerClient>,
        programs: ProgramIds,
        cache: CredentialCache,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            deriver: CredentialDeriver::new(config.origin.clone()),
            config,
            primary,
            rollup,
            programs,
            game: GameInstructions::new(programs),
            cache,
            notifier,
            gate: InFlightGate::new(),
            context: RwLock::new(None),
        }
    }

    pub fn programs(&self) -> ProgramIds {
        self.programs
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The gate shared with game commands for the same identity.
    pub fn gate(&self) -> &InFlightGate {
        &self.gate
    }

    pub(crate) fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    pub async fn identity(&self) -> Option<Address> {
        self.context.read().await.as_ref().map(|ctx| ctx.identity)
    }

    pub async fn state(&self) -> Option<SessionState> {
        self.context.read().await.as_ref().map(|ctx| ctx.state)
    }

    pub async fn status(&self) -> Option<SessionStatus> {
        self.context.read().await.as_ref().map(SessionStatus::from)
    }

    pub async fn signer(&self) -> Option<Arc<dyn TransactionSigner>> {
        self.context.read().await.as_ref().map(|ctx| ctx.signer.clone())
    }

    /// The session credential, when it is registered and may sign moves.
    pub async fn credential(&self) -> Option<SessionCredential> {
        self.context
            .read()
            .await
            .as_ref()
            .and_then(|ctx| ctx.usable_credential().cloned())
    }

    /// The session credential, when it is also funded to pay for moves.
    pub async fn funded_credential(&self) -> Option<SessionCredential> {
        self.context
            .read()
            .await
            .as_ref()
            .and_then(|ctx| ctx.funded_credential().cloned())
    }

    /// Attach a wallet and load its session state from the ledger.
    pub async fn connect(&self, signer: Arc<dyn TransactionSigner>) -> Outcome<SessionState> {
        let identity = signer.address();
        *self.context.write().await = Some(SessionContext::new(signer));
        tracing::info!(identity = %identity, "wallet connected");
        self.sync_from_chain().await
    }

    pub async fn disconnect(&self) {
        if let Some(ctx) = self.context.write().await.take() {
            tracing::info!(identity = %ctx.identity, "wallet disconnected");
        }
    }

    /// Rebuild the session state from the ledger record and the local cache.
    pub async fn sync_from_chain(&self) -> Outcome<SessionState> {
        let identity = match self.identity().await {
            Some(identity) => identity,
            None => return SessionError::NotConnected.into(),
        };
        let Some(_guard) = self.gate.try_enter(identity) else {
            return Outcome::Busy;
        };
        match self.sync_inner(identity).await {
            Ok(state) => Outcome::Done(state),
            Err(e) => e.into(),
        }
    }

    async fn sync_inner(&self, identity: Address) -> Result<SessionState> {
        let record = self.read_record(&identity).await?;
        let registered = record.and_then(|r| r.session_key);
        let cached = self.cache.load(&identity);

        let (material, state) = match (registered, cached) {
            (None, Some(material)) => (Some(material), SessionState::KeyReady),
            (None, None) => (None, SessionState::Unregistered),
            (Some(key), Some(material)) if material.address() == key => {
                let state = if self.is_funded(&key).await {
                    SessionState::Active
                } else {
                    SessionState::Registered
                };
                (Some(material), state)
            }
            (Some(key), Some(material)) => {
                tracing::warn!(
                    identity = %identity,
                    cached = %material.address(),
                    registered = %key,
                    "cached session key is not the registered one, discarding it"
                );
                self.clear_cache(&identity);
                (None, SessionState::RegisteredNotActivated)
            }
            (Some(_), None) => (None, SessionState::RegisteredNotActivated),
        };

        self.update(identity, |ctx| {
            ctx.credential = material.map(|m| SessionCredential::new(m, identity));
            ctx.registered_key = registered;
            ctx.state = state;
        })
        .await;
        tracing::debug!(identity = %identity, state = %state, "session synced from ledger");
        Ok(state)
    }

    /// Derive (or reuse) the session key and cache it. Returns `None` and
    /// notifies the user when nothing usable came out.
    pub async fn create_session_key(&self) -> Option<SessionCredential> {
        let (identity, signer) = match self.connected().await {
            Ok(connected) => connected,
            Err(e) => {
                self.notifier.notify(NoticeLevel::Error, &e.to_string());
                return None;
            }
        };
        let Some(_guard) = self.gate.try_enter(identity) else {
            self.notifier
                .notify(NoticeLevel::Warning, "another session operation is in progress");
            return None;
        };
        match self.create_inner(identity, signer.as_ref()).await {
            Ok(credential) => Some(credential),
            Err(failure) => {
                self.notifier.notify(NoticeLevel::Error, &failure.message);
                None
            }
        }
    }

    async fn create_inner(
        &self,
        identity: Address,
        signer: &dyn TransactionSigner,
    ) -> std::result::Result<SessionCredential, Failure> {
        let (existing, previous) = self
            .read_ctx(identity, |ctx| (ctx.credential.clone(), ctx.state))
            .await
            .ok_or_else(|| Failure::from(SessionError::NotConnected))?;
        if let Some(credential) = existing {
            return Ok(credential);
        }

        self.set_state(identity, SessionState::CreatingKey).await;
        let material = match self.deriver.derive(signer).await {
            Ok(material) => material,
            Err(e) => {
                self.set_state(identity, previous).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.cache.store(&identity, &material) {
            tracing::warn!(identity = %identity, error = %e, "session key not cached");
            self.notifier.notify(
                NoticeLevel::Warning,
                "session key could not be saved and will be derived again next time",
            );
        }

        let credential = SessionCredential::new(material, identity);
        let session = credential.address();
        let registered = self
            .read_ctx(identity, |ctx| ctx.registered_key)
            .await
            .flatten();
        let state = if registered == Some(session) {
            if self.is_funded(&session).await {
                SessionState::Active
            } else {
                SessionState::Registered
            }
        } else {
            SessionState::KeyReady
        };
        let stored = credential.clone();
        self.update(identity, move |ctx| {
            ctx.credential = Some(stored);
            ctx.state = state;
        })
        .await;
        tracing::info!(identity = %identity, session = %session, state = %state, "session key ready");
        Ok(credential)
    }

    /// Register the session key on whichever ledger currently holds the
    /// player record. Signed by the primary identity.
    pub async fn register_session_key(&self) -> Outcome<Address> {
        let (identity, signer) = match self.connected().await {
            Ok(connected) => connected,
            Err(e) => return self.fail(e.into()),
        };
        let Some(_guard) = self.gate.try_enter(identity) else {
            return Outcome::Busy;
        };

        let credential = match self.create_inner(identity, signer.as_ref()).await {
            Ok(credential) => credential,
            Err(failure) => return self.fail(failure),
        };
        let session = credential.address();
        let already = self
            .read_ctx(identity, |ctx| {
                ctx.registered_key == Some(session) && ctx.state.can_sign_moves()
            })
            .await
            .unwrap_or(false);
        if already {
            return Outcome::Done(session);
        }

        self.set_state(identity, SessionState::Registering).await;
        let ledger = match self.write_ledger(&identity).await {
            Ok(ledger) => ledger,
            Err(e) => {
                self.set_state(identity, SessionState::KeyReady).await;
                return self.fail(e.into());
            }
        };
        let ix = match self.game.register_session_key(&identity, &session) {
            Ok(ix) => ix,
            Err(e) => {
                self.set_state(identity, SessionState::KeyReady).await;
                return self.fail(SessionError::from(e).into());
            }
        };

        let settled = match sign_and_submit(signer.as_ref(), ledger.as_ref(), vec![ix]).await {
            Ok(tx) => {
                tracing::info!(identity = %identity, session = %session, tx = %tx, "session key registered");
                Settled::Landed
            }
            Err(SubmitFailure::NotSent(failure)) => {
                self.set_state(identity, SessionState::KeyReady).await;
                return self.fail(failure);
            }
            Err(SubmitFailure::Rejected(e)) => {
                self.set_state(identity, SessionState::KeyReady).await;
                return self.fail(Failure::rejected(GameOp::RegisterSessionKey, &e));
            }
            Err(SubmitFailure::Ambiguous { error, .. }) => {
                self.settle(&identity, &error, |record| {
                    record.and_then(|r| r.session_key) == Some(session)
                })
                .await
            }
        };

        match settled {
            Settled::Landed => {
                self.update(identity, |ctx| {
                    ctx.registered_key = Some(session);
                    ctx.state = SessionState::Registered;
                    ctx.unresolved_streak = 0;
                })
                .await;
                self.notifier
                    .notify(NoticeLevel::Success, "session key registered");
                Outcome::Done(session)
            }
            Settled::NotLanded => {
                self.reset_streak(identity).await;
                self.set_state(identity, SessionState::KeyReady).await;
                self.fail(Failure::new(
                    FailureKind::Ambiguous,
                    "registration did not reach the ledger",
                ))
            }
            Settled::Unknown(message) => {
                self.set_state(identity, SessionState::KeyReady).await;
                self.unresolved(identity, message).await
            }
        }
    }

    /// Move the fee reserve from the primary wallet to the session wallet.
    pub async fn fund_session_key_wallet(&self) -> Outcome<TxId> {
        let (identity, signer) = match self.connected().await {
            Ok(connected) => connected,
            Err(e) => return self.fail(e.into()),
        };
        let Some(_guard) = self.gate.try_enter(identity) else {
            return Outcome::Busy;
        };

        let usable = self
            .read_ctx(identity, |ctx| {
                ctx.usable_credential().map(|c| (c.address(), ctx.state))
            })
            .await
            .flatten();
        let Some((session, previous)) = usable else {
            return self.fail(
                SessionError::NotReady("register the session key before funding it".into()).into(),
            );
        };

        self.set_state(identity, SessionState::Funding).await;
        let reserve = self.config.fee_reserve_lamports;
        let before = match self.balance(&session).await {
            Ok(lamports) => Some(lamports),
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "session balance unavailable before funding");
                None
            }
        };
        let ix = transfer(&identity, &session, reserve);

        let result = sign_and_submit(signer.as_ref(), self.primary.as_ref(), vec![ix]).await;
        let (settled, id) = match result {
            Ok(tx) => (Settled::Landed, tx),
            Err(SubmitFailure::NotSent(failure)) => {
                self.set_state(identity, previous).await;
                return self.fail_funding(previous, failure);
            }
            Err(SubmitFailure::Rejected(e)) => {
                self.set_state(identity, previous).await;
                return self.fail_funding(
                    previous,
                    Failure::new(FailureKind::Rejected, explain_transfer(&e)),
                );
            }
            Err(SubmitFailure::Ambiguous { error, id }) => {
                let settled = match (before, self.balance(&session).await) {
                    (Some(before), Ok(after)) if after >= before.saturating_add(reserve) => {
                        Settled::Landed
                    }
                    (Some(_), Ok(_)) => Settled::NotLanded,
                    (None, Ok(_)) => {
                        Settled::Unknown(format!("{error}; no balance before funding to compare"))
                    }
                    (_, Err(e)) => Settled::Unknown(format!("{error}; balance re-read failed: {e}")),
                };
                (settled, id)
            }
        };

        match settled {
            Settled::Landed => {
                self.update(identity, |ctx| {
                    ctx.state = SessionState::Active;
                    ctx.unresolved_streak = 0;
                })
                .await;
                tracing::info!(identity = %identity, session = %session, lamports = reserve, tx = %id, "session wallet funded");
                self.notifier
                    .notify(NoticeLevel::Success, "session wallet funded");
                Outcome::Done(id)
            }
            Settled::NotLanded => {
                self.reset_streak(identity).await;
                self.set_state(identity, previous).await;
                self.fail_funding(
                    previous,
                    Failure::new(FailureKind::Ambiguous, "funding did not reach the ledger"),
                )
            }
            Settled::Unknown(message) => {
                self.set_state(identity, previous).await;
                self.unresolved(identity, message).await
            }
        }
    }

    /// Re-derive the session key on a device that lacks it. Valid only while
    /// the ledger lists a key this device has no copy of.
    pub async fn activate(&self) -> Outcome<SessionState> {
        let (identity, signer) = match self.connected().await {
            Ok(connected) => connected,
            Err(e) => return self.fail(e.into()),
        };
        let Some(_guard) = self.gate.try_enter(identity) else {
            return Outcome::Busy;
        };
        let state = self.read_ctx(identity, |ctx| ctx.state).await;
        if state != Some(SessionState::RegisteredNotActivated) {
            return self.fail(
                SessionError::NotReady("no registered session key waiting for activation".into())
                    .into(),
            );
        }

        match self.create_inner(identity, signer.as_ref()).await {
            Ok(_) => {
                let state = self
                    .read_ctx(identity, |ctx| ctx.state)
                    .await
                    .unwrap_or(SessionState::KeyReady);
                if state == SessionState::KeyReady {
                    self.notifier.notify(
                        NoticeLevel::Warning,
                        "this device derives a different session key; register it again",
                    );
                } else {
                    self.notifier
                        .notify(NoticeLevel::Success, "session key activated");
                }
                Outcome::Done(state)
            }
            Err(failure) => self.fail(failure),
        }
    }

    /// Remove the session key locally, then ask the ledger to forget it.
    /// The local copy is gone even if the ledger call fails.
    pub async fn revoke_session_key(&self) -> Outcome<()> {
        let (identity, signer) = match self.connected().await {
            Ok(connected) => connected,
            Err(e) => return self.fail(e.into()),
        };
        let Some(_guard) = self.gate.try_enter(identity) else {
            return Outcome::Busy;
        };

        let registered = self
            .read_ctx(identity, |ctx| ctx.registered_key)
            .await
            .flatten();
        self.clear_cache(&identity);
        self.update(identity, |ctx| {
            ctx.credential = None;
            ctx.state = SessionState::Revoking;
        })
        .await;

        if registered.is_none() {
            self.set_state(identity, SessionState::Unregistered).await;
            self.notifier
                .notify(NoticeLevel::Success, "session key removed");
            return Outcome::Done(());
        }

        let ledger = match self.write_ledger(&identity).await {
            Ok(ledger) => ledger,
            Err(e) => {
                self.set_state(identity, SessionState::RegisteredNotActivated).await;
                return self.fail_revoke(e.into());
            }
        };
        let ix = match self.game.revoke_session_key(&identity) {
            Ok(ix) => ix,
            Err(e) => {
                self.set_state(identity, SessionState::RegisteredNotActivated).await;
                return self.fail_revoke(SessionError::from(e).into());
            }
        };

        let settled = match sign_and_submit(signer.as_ref(), ledger.as_ref(), vec![ix]).await {
            Ok(tx) => {
                tracing::info!(identity = %identity, tx = %tx, "session key revoked");
                Settled::Landed
            }
            Err(SubmitFailure::NotSent(failure)) => {
                self.set_state(identity, SessionState::RegisteredNotActivated).await;
                return self.fail_revoke(failure);
            }
            Err(SubmitFailure::Rejected(e)) => {
                self.set_state(identity, SessionState::RegisteredNotActivated).await;
                return self.fail_revoke(Failure::rejected(GameOp::RevokeSessionKey, &e));
            }
            Err(SubmitFailure::Ambiguous { error, .. }) => {
                self.settle(&identity, &error, |record| {
                    record.and_then(|r| r.session_key).is_none()
                })
                .await
            }
        };

        match settled {
            Settled::Landed => {
                self.update(identity, |ctx| {
                    ctx.registered_key = None;
                    ctx.state = SessionState::Unregistered;
                    ctx.unresolved_streak = 0;
                })
                .await;
                self.notifier
                    .notify(NoticeLevel::Success, "session key revoked");
                Outcome::Done(())
            }
            Settled::NotLanded => {
                self.reset_streak(identity).await;
                self.set_state(identity, SessionState::RegisteredNotActivated).await;
                self.fail_revoke(Failure::new(
                    FailureKind::Ambiguous,
                    "revocation did not reach the ledger",
                ))
            }
            Settled::Unknown(message) => {
                self.set_state(identity, SessionState::RegisteredNotActivated).await;
                self.unresolved(identity, message).await
            }
        }
    }

    /// Drop the local session key after the player returned to the primary
    /// ledger. Nothing is submitted.
    pub async fn clear_session_on_undelegate(&self) {
        let Some(identity) = self.identity().await else {
            return;
        };
        self.clear_cache(&identity);
        // Undelegation wipes the registered key on the ledger as well.
        self.update(identity, |ctx| {
            ctx.credential = None;
            ctx.registered_key = None;
            ctx.state = SessionState::Unregistered;
        })
        .await;
        tracing::info!(identity = %identity, "session key cleared after undelegation");
        self.notifier.notify(
            NoticeLevel::Warning,
            "player left the rollup; session key cleared",
        );
    }

    async fn connected(&self) -> Result<(Address, Arc<dyn TransactionSigner>)> {
        self.context
            .read()
            .await
            .as_ref()
            .map(|ctx| (ctx.identity, ctx.signer.clone()))
            .ok_or(SessionError::NotConnected)
    }

    async fn read_ctx<T>(&self, identity: Address, f: impl FnOnce(&SessionContext) -> T) -> Option<T> {
        self.context
            .read()
            .await
            .as_ref()
            .filter(|ctx| ctx.identity == identity)
            .map(f)
    }

    /// Apply `f` if `identity` is still the connected one.
    async fn update(&self, identity: Address, f: impl FnOnce(&mut SessionContext)) {
        if let Some(ctx) = self
            .context
            .write()
            .await
            .as_mut()
            .filter(|ctx| ctx.identity == identity)
        {
            f(ctx);
        }
    }

    async fn set_state(&self, identity: Address, state: SessionState) {
        self.update(identity, |ctx| ctx.state = state).await;
    }

    pub(crate) async fn reset_streak(&self, identity: Address) {
        self.update(identity, |ctx| ctx.unresolved_streak = 0).await;
    }

    fn clear_cache(&self, identity: &Address) {
        if let Err(e) = self.cache.clear(identity) {
            tracing::warn!(identity = %identity, error = %e, "failed to clear cached session key");
        }
    }

    async fn write_ledger(&self, identity: &Address) -> Result<Arc<dyn LedgerClient>> {
        let delegated = read_delegation(self.primary.as_ref(), &self.programs, identity).await?;
        Ok(if delegated {
            self.rollup.clone()
        } else {
            self.primary.clone()
        })
    }

    /// The player record from whichever ledger holds it. A delegated record
    /// not yet visible on the rollup falls back to the primary copy.
    async fn read_record(&self, identity: &Address) -> Result<Option<PlayerAccount>> {
        let (address, _) = self.programs.player_address(identity)?;
        let delegated = read_delegation(self.primary.as_ref(), &self.programs, identity).await?;
        let rollup = if delegated {
            match self.rollup.get_account(&address).await {
                Ok(account) => account,
                Err(e) => {
                    tracing::warn!(identity = %identity, error = %e, "rollup read failed, using primary copy");
                    None
                }
            }
        } else {
            None
        };
        let account = match rollup {
            Some(account) => Some(account),
            None => self.primary.get_account(&address).await?,
        };
        Ok(account
            .map(|a| PlayerAccount::decode(&a.data))
            .transpose()?)
    }

    async fn balance(&self, address: &Address) -> Result<u64> {
        Ok(self
            .primary
            .get_account(address)
            .await?
            .map(|a| a.lamports)
            .unwrap_or(0))
    }

    async fn is_funded(&self, session: &Address) -> bool {
        match self.balance(session).await {
            Ok(lamports) => lamports > 0,
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "session balance unavailable");
                false
            }
        }
    }

    /// Decide an ambiguous submission by re-reading the player record.
    async fn settle(
        &self,
        identity: &Address,
        error: &SubmitError,
        landed: impl FnOnce(Option<&PlayerAccount>) -> bool,
    ) -> Settled {
        let record = match self.read_record(identity).await {
            Ok(record) => record,
            Err(e) => return Settled::Unknown(format!("{error}; re-read failed: {e}")),
        };
        if landed(record.as_ref()) {
            tracing::info!(identity = %identity, error = %error, "ambiguous submission landed");
            Settled::Landed
        } else {
            Settled::NotLanded
        }
    }

    pub(crate) async fn unresolved<T>(&self, identity: Address, message: String) -> Outcome<T> {
        let mut streak = 0;
        self.update(identity, |ctx| {
            ctx.unresolved_streak += 1;
            streak = ctx.unresolved_streak;
        })
        .await;
        tracing::warn!(identity = %identity, streak, "{message}");
        if streak >= self.config.escalation_threshold {
            self.notifier.notify(
                NoticeLevel::Error,
                "the ledger keeps failing to confirm transactions; check the connection",
            );
        } else {
            self.notifier.notify(
                NoticeLevel::Warning,
                "could not confirm whether the transaction landed",
            );
        }
        Outcome::Unresolved(message)
    }

    fn fail<T>(&self, failure: Failure) -> Outcome<T> {
        self.notifier.notify(NoticeLevel::Error, &failure.message);
        Outcome::Failed(failure)
    }

    /// Moves fall back to the wallet unless the session wallet was already
    /// funded before this attempt.
    fn fail_funding<T>(&self, previous: SessionState, failure: Failure) -> Outcome<T> {
        let message = if previous == SessionState::Active {
            format!("top-up failed, the session wallet keeps its balance: {}", failure.message)
        } else {
            format!("funding failed, moves will be paid by the wallet: {}", failure.message)
        };
        self.notifier.notify(NoticeLevel::Warning, &message);
        Outcome::Failed(failure)
    }

    fn fail_revoke<T>(&self, failure: Failure) -> Outcome<T> {
        self.notifier.notify(
            NoticeLevel::Error,
            &format!(
                "session key removed from this device, but the ledger still lists it: {}",
                failure.message
            ),
        );
        Outcome::Failed(failure)
    }
}

fn explain_transfer(err: &SubmitError) -> String {
    match err {
        SubmitError::Rejected { code: Some(1), .. } => "insufficient funds".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl DelegationObserver for SessionLifecycleManager {
    async fn on_undelegated(&self, identity: &Address) {
        if self.identity().await == Some(*identity) {
            self.clear_session_on_undelegate().await;
        }
    }
}

impl std::fmt::Debug for SessionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLifecycleManager")
            .field("origin", &self.config.origin)
            .field("programs", &self.programs)
            .finish_non_exhaustive()
    }
}
