//! Every player on the board, merged across both ledgers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use grid_types::{Account, Address, LedgerKind, PlayerAccount, Position};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::error::ViewError;
use crate::view::DualLedgerView;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub authority: Address,
    pub position: Position,
    pub session_key: Option<Address>,
    pub delegated: bool,
}

fn decode_all(ledger: LedgerKind, accounts: Vec<(Address, Account)>) -> Vec<PlayerAccount> {
    accounts
        .into_iter()
        .filter_map(|(address, account)| match PlayerAccount::decode(&account.data) {
            Ok(player) => Some(player),
            Err(e) => {
                tracing::debug!(ledger = %ledger, address = %address, error = %e, "skipping account");
                None
            }
        })
        .collect()
}

/// Merge primary and rollup listings by authority.
///
/// Primary entries owned by the game program keep their own position.
/// Delegated primary entries take the rollup position when one exists.
/// Players only found on the rollup are listed as delegated.
pub fn merge_roster(
    owned: Vec<PlayerAccount>,
    delegated: Vec<PlayerAccount>,
    rollup: Vec<PlayerAccount>,
) -> Vec<RosterEntry> {
    let rollup: BTreeMap<Address, PlayerAccount> =
        rollup.into_iter().map(|p| (p.authority, p)).collect();
    let mut merged: BTreeMap<Address, RosterEntry> = BTreeMap::new();

    for player in owned {
        merged.insert(
            player.authority,
            RosterEntry {
                authority: player.authority,
                position: player.position,
                session_key: player.session_key,
                delegated: false,
            },
        );
    }

    for player in delegated {
        let live = rollup.get(&player.authority).unwrap_or(&player);
        merged.insert(
            player.authority,
            RosterEntry {
                authority: player.authority,
                position: live.position,
                session_key: live.session_key,
                delegated: true,
            },
        );
    }

    for (authority, player) in rollup {
        merged.entry(authority).or_insert(RosterEntry {
            authority,
            position: player.position,
            session_key: player.session_key,
            delegated: true,
        });
    }

    merged.into_values().collect()
}

impl DualLedgerView {
    /// All players, merged across both ledgers. A failing rollup listing
    /// degrades to the primary ledger's view.
    pub async fn list_all(&self) -> Result<Vec<RosterEntry>, ViewError> {
        let programs = self.programs();
        let discriminator = PlayerAccount::discriminator();
        let primary = self.client(LedgerKind::Primary);

        let owned = primary
            .get_program_accounts(&programs.game, &discriminator)
            .await
            .map_err(ViewError::on(LedgerKind::Primary))?;
        let delegated = primary
            .get_program_accounts(&programs.delegation, &discriminator)
            .await
            .map_err(ViewError::on(LedgerKind::Primary))?;
        let rollup = match self
            .client(LedgerKind::Rollup)
            .get_program_accounts(&programs.game, &discriminator)
            .await
        {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::warn!(error = %e, "rollup listing failed, showing primary only");
                Vec::new()
            }
        };

        Ok(merge_roster(
            decode_all(LedgerKind::Primary, owned),
            decode_all(LedgerKind::Primary, delegated),
            decode_all(LedgerKind::Rollup, rollup),
        ))
    }
}

/// Periodically lists all players and broadcasts each roster.
pub struct RosterPoller {
    updates: broadcast::Sender<Vec<RosterEntry>>,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RosterPoller {
    pub fn spawn(view: Arc<DualLedgerView>, period: Duration) -> Self {
        let (updates, _) = broadcast::channel(16);
        let (stop, mut stopped) = oneshot::channel();
        let tx = updates.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match view.list_all().await {
                            Ok(roster) => {
                                let _ = tx.send(roster);
                            }
                            Err(e) => tracing::error!(error = %e, "roster poll failed"),
                        }
                    }
                    _ = &mut stopped => break,
                }
            }
            tracing::debug!("roster poller stopped");
        });

        Self {
            updates,
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<RosterEntry>> {
        self.updates.subscribe()
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RosterPoller {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}
