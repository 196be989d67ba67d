//! One player's state across the primary ledger and the rollup.
//!
//! Delegation is read from the primary ledger's account owner on every
//! observation. Each ledger has its own snapshot slot; pushes and refreshes
//! overwrite their slot (last write wins) and the merged view is broadcast.

use std::sync::Arc;

use async_trait::async_trait;
use grid_types::{Account, Address, LedgerKind, ProgramIds};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::client::{LedgerClient, SubscriptionId};
use crate::error::ViewError;
use crate::reconcile::{is_delegated, reconcile, EntitySnapshot, ReconciledView};

/// Told when a watched player returns from the rollup to the primary ledger.
#[async_trait]
pub trait DelegationObserver: Send + Sync {
    async fn on_undelegated(&self, identity: &Address);
}

/// View settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Probe the rollup before reading a delegated account.
    #[serde(default = "default_probe_rollup")]
    pub probe_rollup: bool,

    /// Roster poll period in seconds.
    #[serde(default = "default_roster_interval_secs")]
    pub roster_interval_secs: u64,

    /// Buffered reconciled views per watcher.
    #[serde(default = "default_watch_capacity")]
    pub watch_capacity: usize,
}

fn default_probe_rollup() -> bool {
    true
}

fn default_roster_interval_secs() -> u64 {
    5
}

fn default_watch_capacity() -> usize {
    64
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            probe_rollup: default_probe_rollup(),
            roster_interval_secs: default_roster_interval_secs(),
            watch_capacity: default_watch_capacity(),
        }
    }
}

#[derive(Debug, Default)]
struct Slots {
    identity: Option<Address>,
    primary: Option<EntitySnapshot>,
    rollup: Option<EntitySnapshot>,
    delegated: bool,
}

impl Slots {
    fn view(&self) -> ReconciledView {
        reconcile(self.primary.as_ref(), self.rollup.as_ref(), self.delegated)
    }

    /// Record a primary observation. Returns true on a delegated → not
    /// delegated transition.
    fn set_primary(&mut self, account: Option<&Account>, programs: &ProgramIds) -> bool {
        let Some(account) = account else {
            self.primary = None;
            self.rollup = None;
            self.delegated = false;
            return false;
        };
        let delegated = is_delegated(account, programs);
        let returned = self.delegated && !delegated;
        self.delegated = delegated;
        self.primary = decode(LedgerKind::Primary, account, programs);
        if !delegated {
            self.rollup = None;
        }
        returned
    }

    /// Record a rollup observation. Ignored unless the primary slot shows
    /// delegation; returns whether it was applied.
    fn set_rollup(&mut self, account: Option<&Account>, programs: &ProgramIds) -> bool {
        if !self.delegated {
            return false;
        }
        self.rollup = account.and_then(|a| decode(LedgerKind::Rollup, a, programs));
        true
    }
}

fn decode(ledger: LedgerKind, account: &Account, programs: &ProgramIds) -> Option<EntitySnapshot> {
    match EntitySnapshot::from_account(ledger, account, programs) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!(ledger = %ledger, error = %e, "undecodable player account");
            None
        }
    }
}

/// Whether `identity`'s player account is currently delegated, read from
/// the primary ledger. A missing account is not delegated.
pub async fn read_delegation(
    primary: &dyn LedgerClient,
    programs: &ProgramIds,
    identity: &Address,
) -> Result<bool, ViewError> {
    let (address, _) = programs.player_address(identity)?;
    let account = primary
        .get_account(&address)
        .await
        .map_err(ViewError::on(LedgerKind::Primary))?;
    Ok(account
        .as_ref()
        .map(|a| is_delegated(a, programs))
        .unwrap_or(false))
}

struct Shared {
    programs: ProgramIds,
    slots: RwLock<Slots>,
    observer: RwLock<Option<Arc<dyn DelegationObserver>>>,
    updates: broadcast::Sender<ReconciledView>,
}

impl Shared {
    async fn on_push(&self, identity: Address, ledger: LedgerKind, account: Option<Account>) {
        let (view, returned) = {
            let mut slots = self.slots.write().await;
            if slots.identity != Some(identity) {
                return;
            }
            let returned = match ledger {
                LedgerKind::Primary => slots.set_primary(account.as_ref(), &self.programs),
                LedgerKind::Rollup => {
                    if !slots.set_rollup(account.as_ref(), &self.programs) {
                        tracing::trace!(identity = %identity, "rollup push ignored, player not delegated");
                        return;
                    }
                    false
                }
            };
            (slots.view(), returned)
        };
        tracing::trace!(ledger = %ledger, identity = %identity, "applied pushed update");
        self.publish(identity, view, returned).await;
    }

    /// The observer runs before watchers see the view that triggered it.
    async fn publish(&self, identity: Address, view: ReconciledView, returned: bool) {
        if returned {
            tracing::info!(identity = %identity, "player returned to the primary ledger");
            let observer = self.observer.read().await.clone();
            if let Some(observer) = observer {
                observer.on_undelegated(&identity).await;
            }
        }
        let _ = self.updates.send(view);
    }
}

struct Listener {
    ledger: LedgerKind,
    id: SubscriptionId,
    task: JoinHandle<()>,
}

/// Primary + rollup connections for one player at a time.
pub struct DualLedgerView {
    primary: Arc<dyn LedgerClient>,
    rollup: Arc<dyn LedgerClient>,
    config: ViewConfig,
    shared: Arc<Shared>,
    listeners: Mutex<Vec<Listener>>,
}

impl DualLedgerView {
    pub fn new(
        primary: Arc<dyn LedgerClient>,
        rollup: Arc<dyn LedgerClient>,
        programs: ProgramIds,
        config: ViewConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(config.watch_capacity.max(1));
        Self {
            primary,
            rollup,
            config,
            shared: Arc::new(Shared {
                programs,
                slots: RwLock::new(Slots::default()),
                observer: RwLock::new(None),
                updates,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn programs(&self) -> ProgramIds {
        self.shared.programs
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    pub fn client(&self, ledger: LedgerKind) -> &Arc<dyn LedgerClient> {
        match ledger {
            LedgerKind::Primary => &self.primary,
            LedgerKind::Rollup => &self.rollup,
        }
    }

    pub async fn set_observer(&self, observer: Arc<dyn DelegationObserver>) {
        *self.shared.observer.write().await = Some(observer);
    }

    /// Live delegation status from the primary ledger. Never cached.
    pub async fn read_delegation(&self, identity: &Address) -> Result<bool, ViewError> {
        read_delegation(self.primary.as_ref(), &self.shared.programs, identity).await
    }

    /// Fetch `identity` from the primary ledger and, if delegated, from the
    /// rollup, then publish the merged view.
    pub async fn refresh_entity(&self, identity: &Address) -> Result<ReconciledView, ViewError> {
        let programs = self.shared.programs;
        let (address, _) = programs.player_address(identity)?;
        let primary = self
            .primary
            .get_account(&address)
            .await
            .map_err(ViewError::on(LedgerKind::Primary))?;
        let delegated = primary
            .as_ref()
            .map(|a| is_delegated(a, &programs))
            .unwrap_or(false);

        let rollup = if delegated {
            self.read_rollup(&address).await
        } else {
            None
        };

        let (view, returned) = {
            let mut slots = self.shared.slots.write().await;
            if slots.identity != Some(*identity) {
                *slots = Slots {
                    identity: Some(*identity),
                    ..Slots::default()
                };
            }
            let returned = slots.set_primary(primary.as_ref(), &programs);
            if delegated {
                slots.set_rollup(rollup.as_ref(), &programs);
            }
            (slots.view(), returned)
        };

        tracing::debug!(
            identity = %identity,
            delegated = view.is_delegated,
            divergence = view.divergence,
            "refreshed player"
        );
        self.shared.publish(*identity, view.clone(), returned).await;
        Ok(view)
    }

    async fn read_rollup(&self, address: &Address) -> Option<Account> {
        if self.config.probe_rollup {
            if let Err(e) = self.rollup.probe(address).await {
                tracing::warn!(address = %address, error = %e, "rollup probe failed");
            }
        }
        match self.rollup.get_account(address).await {
            Ok(account) => account,
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "rollup read failed");
                None
            }
        }
    }

    /// Attach one listener per ledger to `identity`'s player account,
    /// replacing any existing listeners.
    pub async fn subscribe(&self, identity: &Address) -> Result<(), ViewError> {
        self.unsubscribe().await;
        let (address, _) = self.shared.programs.player_address(identity)?;
        {
            let mut slots = self.shared.slots.write().await;
            if slots.identity != Some(*identity) {
                *slots = Slots {
                    identity: Some(*identity),
                    ..Slots::default()
                };
            }
        }

        let mut attached = Vec::with_capacity(2);
        for ledger in [LedgerKind::Primary, LedgerKind::Rollup] {
            let client = self.client(ledger).clone();
            let subscription = match client.subscribe(&address).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    self.listeners.lock().await.extend(attached);
                    self.unsubscribe().await;
                    return Err(ViewError::Ledger { ledger, source: e });
                }
            };
            let shared = self.shared.clone();
            let identity = *identity;
            let mut updates = subscription.updates;
            let task = tokio::spawn(async move {
                while let Some(update) = updates.recv().await {
                    shared.on_push(identity, ledger, update.account).await;
                }
            });
            attached.push(Listener {
                ledger,
                id: subscription.id,
                task,
            });
        }

        tracing::debug!(identity = %identity, address = %address, "subscribed on both ledgers");
        self.listeners.lock().await.extend(attached);
        Ok(())
    }

    /// Detach all listeners. Safe to call repeatedly.
    pub async fn unsubscribe(&self) {
        let listeners: Vec<Listener> = std::mem::take(&mut *self.listeners.lock().await);
        for listener in listeners {
            listener.task.abort();
            if let Err(e) = self.client(listener.ledger).unsubscribe(listener.id).await {
                tracing::warn!(
                    ledger = %listener.ledger,
                    subscription = %listener.id,
                    error = %e,
                    "unsubscribe failed"
                );
            }
        }
    }

    /// Drop listeners and forget the current player.
    pub async fn detach(&self) {
        self.unsubscribe().await;
        *self.shared.slots.write().await = Slots::default();
    }

    pub async fn current(&self) -> ReconciledView {
        self.shared.slots.read().await.view()
    }

    pub async fn identity(&self) -> Option<Address> {
        self.shared.slots.read().await.identity
    }

    /// Stream of merged views, one per applied observation.
    pub fn watch(&self) -> broadcast::Receiver<ReconciledView> {
        self.shared.updates.subscribe()
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.lock().await.len()
    }
}

impl Drop for DualLedgerView {
    fn drop(&mut self) {
        if let Ok(listeners) = self.listeners.try_lock() {
            for listener in listeners.iter() {
                listener.task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLedger;
    use grid_types::{PlayerAccount, Position};

    fn player(x: u8, y: u8) -> PlayerAccount {
        PlayerAccount {
            authority: Address::new([1u8; 32]),
            position: Position::new(x, y),
            bump: 254,
            session_key: None,
        }
    }

    fn setup() -> (Arc<InMemoryLedger>, Arc<InMemoryLedger>, DualLedgerView) {
        let primary = Arc::new(InMemoryLedger::primary());
        let rollup = Arc::new(InMemoryLedger::rollup());
        let view = DualLedgerView::new(
            primary.clone(),
            rollup.clone(),
            ProgramIds::default(),
            ViewConfig::default(),
        );
        (primary, rollup, view)
    }

    #[tokio::test]
    async fn absent_account_clears_both_slots() {
        let (_, rollup, view) = setup();
        let view_out = view.refresh_entity(&Address::new([1u8; 32])).await.unwrap();
        assert_eq!(view_out, ReconciledView::default());
        assert_eq!(rollup.read_count(), 0);
    }

    #[tokio::test]
    async fn undelegated_never_touches_rollup() {
        let (primary, rollup, view) = setup();
        let programs = ProgramIds::default();
        primary.put_player(&player(5, 5), programs.game).unwrap();
        let out = view.refresh_entity(&Address::new([1u8; 32])).await.unwrap();
        assert!(!out.is_delegated);
        assert_eq!(out.position(), Some(Position::new(5, 5)));
        assert_eq!(rollup.read_count(), 0);
        assert_eq!(rollup.probe_count(), 0);
    }

    #[tokio::test]
    async fn delegated_probes_then_reads_rollup() {
        let (primary, rollup, view) = setup();
        let programs = ProgramIds::default();
        primary.put_player(&player(5, 5), programs.delegation).unwrap();
        rollup.put_player(&player(7, 7), programs.game).unwrap();
        let out = view.refresh_entity(&Address::new([1u8; 32])).await.unwrap();
        assert!(out.is_delegated);
        assert!(out.divergence);
        assert_eq!(out.position(), Some(Position::new(7, 7)));
        assert_eq!(rollup.probe_count(), 1);
        assert_eq!(rollup.read_count(), 1);
    }

    #[tokio::test]
    async fn failed_probe_is_not_fatal() {
        let (primary, rollup, view) = setup();
        let programs = ProgramIds::default();
        primary.put_player(&player(5, 5), programs.delegation).unwrap();
        rollup.put_player(&player(6, 6), programs.game).unwrap();
        rollup.fail_probes(true);
        let out = view.refresh_entity(&Address::new([1u8; 32])).await.unwrap();
        assert_eq!(out.position(), Some(Position::new(6, 6)));
    }

    #[tokio::test]
    async fn primary_read_failure_is_an_error() {
        let (primary, _, view) = setup();
        primary.fail_reads(true);
        let err = view.refresh_entity(&Address::new([1u8; 32])).await.unwrap_err();
        assert!(matches!(
            err,
            ViewError::Ledger {
                ledger: LedgerKind::Primary,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rollup_push_ignored_while_not_delegated() {
        let (primary, _, view) = setup();
        let programs = ProgramIds::default();
        let identity = Address::new([1u8; 32]);
        primary.put_player(&player(5, 5), programs.game).unwrap();
        view.refresh_entity(&identity).await.unwrap();
        let mut rx = view.watch();

        let late = Account {
            owner: programs.game,
            lamports: 1_000_000,
            data: player(8, 8).encode(),
        };
        view.shared
            .on_push(identity, LedgerKind::Rollup, Some(late))
            .await;

        let current = view.current().await;
        assert!(!current.divergence);
        assert_eq!(current.position(), Some(Position::new(5, 5)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rollup_slot_follows_delegation() {
        let programs = ProgramIds::default();
        let rollup = Account {
            owner: programs.game,
            lamports: 1,
            data: player(8, 8).encode(),
        };
        let mut slots = Slots {
            identity: Some(Address::new([1u8; 32])),
            ..Slots::default()
        };
        assert!(!slots.set_rollup(Some(&rollup), &programs));
        assert!(slots.rollup.is_none());

        let delegated = Account {
            owner: programs.delegation,
            lamports: 1,
            data: player(5, 5).encode(),
        };
        slots.set_primary(Some(&delegated), &programs);
        assert!(slots.set_rollup(Some(&rollup), &programs));
        assert!(slots.view().divergence);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let (primary, rollup, view) = setup();
        view.subscribe(&Address::new([1u8; 32])).await.unwrap();
        assert_eq!(primary.subscription_count(), 1);
        assert_eq!(rollup.subscription_count(), 1);

        view.subscribe(&Address::new([1u8; 32])).await.unwrap();
        assert_eq!(primary.subscription_count(), 1);
        assert_eq!(view.listener_count().await, 2);

        view.unsubscribe().await;
        view.unsubscribe().await;
        assert_eq!(primary.subscription_count(), 0);
        assert_eq!(rollup.subscription_count(), 0);
    }
}
