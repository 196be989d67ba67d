use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grid_ledger::{
    DelegationObserver, DualLedgerView, InMemoryLedger, ReconciledView, RosterPoller, ViewConfig,
};
use grid_types::{Address, PlayerAccount, Position, ProgramIds};
use tokio::sync::broadcast;
use tokio::time::timeout;

#[derive(Default)]
struct CountingObserver {
    calls: AtomicUsize,
}

#[async_trait]
impl DelegationObserver for CountingObserver {
    async fn on_undelegated(&self, _identity: &Address) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn alice() -> Address {
    Address::new([1u8; 32])
}

fn player(authority: Address, x: u8, y: u8) -> PlayerAccount {
    PlayerAccount {
        authority,
        position: Position::new(x, y),
        bump: 253,
        session_key: None,
    }
}

struct Fixture {
    primary: Arc<InMemoryLedger>,
    rollup: Arc<InMemoryLedger>,
    view: Arc<DualLedgerView>,
    programs: ProgramIds,
}

fn fixture() -> Fixture {
    let primary = Arc::new(InMemoryLedger::primary());
    let rollup = Arc::new(InMemoryLedger::rollup());
    let programs = ProgramIds::default();
    let view = Arc::new(DualLedgerView::new(
        primary.clone(),
        rollup.clone(),
        programs,
        ViewConfig::default(),
    ));
    Fixture {
        primary,
        rollup,
        view,
        programs,
    }
}

async fn next(rx: &mut broadcast::Receiver<ReconciledView>) -> ReconciledView {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("view update")
        .expect("channel open")
}

#[tokio::test]
async fn pushes_follow_delegation() {
    let f = fixture();
    let address = f.primary.put_player(&player(alice(), 5, 5), f.programs.game).unwrap();
    f.view.refresh_entity(&alice()).await.unwrap();
    f.view.subscribe(&alice()).await.unwrap();
    let mut rx = f.view.watch();

    f.primary.set_owner(&address, f.programs.delegation);
    let delegated = next(&mut rx).await;
    assert!(delegated.is_delegated);
    assert_eq!(delegated.position(), Some(Position::new(5, 5)));

    f.rollup.put_player(&player(alice(), 9, 9), f.programs.game).unwrap();
    let moved = next(&mut rx).await;
    assert_eq!(moved.position(), Some(Position::new(9, 9)));
    assert!(moved.divergence);
    assert_eq!(f.view.current().await, moved);
}

#[tokio::test]
async fn undelegation_notifies_exactly_once() {
    let f = fixture();
    let observer = Arc::new(CountingObserver::default());
    f.view.set_observer(observer.clone()).await;

    let address = f
        .primary
        .put_player(&player(alice(), 5, 5), f.programs.delegation)
        .unwrap();
    f.rollup.put_player(&player(alice(), 7, 7), f.programs.game).unwrap();
    assert!(f.view.refresh_entity(&alice()).await.unwrap().is_delegated);

    f.view.subscribe(&alice()).await.unwrap();
    let mut rx = f.view.watch();

    f.primary.set_owner(&address, f.programs.game);
    let back = next(&mut rx).await;
    assert!(!back.is_delegated);
    assert_eq!(back.position(), Some(Position::new(5, 5)));
    assert_eq!(observer.calls.load(Ordering::SeqCst), 1);

    f.primary.set_owner(&address, f.programs.game);
    next(&mut rx).await;
    f.view.refresh_entity(&alice()).await.unwrap();
    assert_eq!(observer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn updates_after_unsubscribe_are_ignored() {
    let f = fixture();
    let address = f.primary.put_player(&player(alice(), 5, 5), f.programs.game).unwrap();
    f.view.refresh_entity(&alice()).await.unwrap();
    f.view.subscribe(&alice()).await.unwrap();
    f.view.unsubscribe().await;

    f.primary.set_owner(&address, f.programs.delegation);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!f.view.current().await.is_delegated);
}

#[tokio::test]
async fn roster_poller_publishes_merged_roster() {
    let f = fixture();
    let bob = Address::new([2u8; 32]);
    let carol = Address::new([3u8; 32]);
    f.primary.put_player(&player(alice(), 1, 1), f.programs.game).unwrap();
    f.primary.put_player(&player(bob, 2, 2), f.programs.delegation).unwrap();
    f.rollup.put_player(&player(bob, 22, 22), f.programs.game).unwrap();
    f.rollup.put_player(&player(carol, 33, 33), f.programs.game).unwrap();

    let poller = RosterPoller::spawn(f.view.clone(), Duration::from_millis(10));
    let mut rx = poller.subscribe();
    let roster = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("roster")
        .expect("channel open");
    poller.stop().await;

    assert_eq!(roster.len(), 3);
    let bob_entry = roster.iter().find(|e| e.authority == bob).unwrap();
    assert_eq!(bob_entry.position, Position::new(22, 22));
    assert!(bob_entry.delegated);
    let carol_entry = roster.iter().find(|e| e.authority == carol).unwrap();
    assert!(carol_entry.delegated);
    let alice_entry = roster.iter().find(|e| e.authority == alice()).unwrap();
    assert!(!alice_entry.delegated);
}
