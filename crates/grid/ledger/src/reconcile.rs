//! Merging the primary and rollup observations of one player.

use grid_types::{Account, Address, LedgerKind, PlayerAccount, Position, ProgramIds};
use serde::{Deserialize, Serialize};

/// One ledger's view of a player at a single observation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub ledger: LedgerKind,
    pub authority: Address,
    pub position: Position,
    pub session_key: Option<Address>,
    /// Delegation as seen on this ledger. Only the primary ledger's owner
    /// field can say this reliably.
    pub delegated: bool,
}

impl EntitySnapshot {
    /// Decode a player account observed on `ledger`.
    ///
    /// On the primary ledger the owner decides delegation. A rollup copy is
    /// delegated by definition.
    pub fn from_account(
        ledger: LedgerKind,
        account: &Account,
        programs: &ProgramIds,
    ) -> grid_types::Result<Self> {
        let player = PlayerAccount::decode(&account.data)?;
        let delegated = match ledger {
            LedgerKind::Primary => is_delegated(account, programs),
            LedgerKind::Rollup => true,
        };
        Ok(Self {
            ledger,
            authority: player.authority,
            position: player.position,
            session_key: player.session_key,
            delegated,
        })
    }
}

/// A primary-ledger account is delegated when the game program no longer owns it.
pub fn is_delegated(account: &Account, programs: &ProgramIds) -> bool {
    account.owner != programs.game
}

/// The merged, authoritative view handed to callers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledView {
    pub authoritative: Option<EntitySnapshot>,
    pub is_delegated: bool,
    /// Both ledgers observed and their positions disagree. Informational only.
    pub divergence: bool,
}

impl ReconciledView {
    pub fn position(&self) -> Option<Position> {
        self.authoritative.as_ref().map(|s| s.position)
    }

    /// The ledger writes must go to.
    pub fn write_ledger(&self) -> LedgerKind {
        if self.is_delegated {
            LedgerKind::Rollup
        } else {
            LedgerKind::Primary
        }
    }
}

pub fn reconcile(
    primary: Option<&EntitySnapshot>,
    rollup: Option<&EntitySnapshot>,
    is_delegated: bool,
) -> ReconciledView {
    let authoritative = match (is_delegated, rollup) {
        (true, Some(rollup)) => Some(rollup.clone()),
        _ => primary.cloned(),
    };
    let divergence = match (primary, rollup) {
        (Some(p), Some(r)) => p.position != r.position,
        _ => false,
    };
    ReconciledView {
        authoritative,
        is_delegated,
        divergence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn snapshot(ledger: LedgerKind, x: u8, y: u8) -> EntitySnapshot {
        EntitySnapshot {
            ledger,
            authority: Address::new([1u8; 32]),
            position: Position::new(x, y),
            session_key: None,
            delegated: ledger == LedgerKind::Rollup,
        }
    }

    #[test]
    fn delegated_prefers_rollup_and_flags_divergence() {
        let p = snapshot(LedgerKind::Primary, 5, 5);
        let r = snapshot(LedgerKind::Rollup, 7, 7);
        let view = reconcile(Some(&p), Some(&r), true);
        assert_eq!(view.position(), Some(Position::new(7, 7)));
        assert!(view.divergence);
        assert_eq!(view.write_ledger(), LedgerKind::Rollup);
    }

    #[test]
    fn undelegated_prefers_primary() {
        let p = snapshot(LedgerKind::Primary, 5, 5);
        let r = snapshot(LedgerKind::Rollup, 7, 7);
        let view = reconcile(Some(&p), Some(&r), false);
        assert_eq!(view.position(), Some(Position::new(5, 5)));
        assert!(view.divergence);
        assert_eq!(view.write_ledger(), LedgerKind::Primary);
    }

    #[test]
    fn delegated_without_rollup_copy_falls_back_to_primary() {
        let p = snapshot(LedgerKind::Primary, 5, 5);
        let view = reconcile(Some(&p), None, true);
        assert_eq!(view.position(), Some(Position::new(5, 5)));
        assert!(!view.divergence);
        assert!(view.is_delegated);
    }

    #[test]
    fn nothing_observed() {
        assert_eq!(reconcile(None, None, false), ReconciledView::default());
    }

    #[test]
    fn owner_decides_primary_delegation() {
        let programs = ProgramIds::default();
        let player = PlayerAccount {
            authority: Address::new([1u8; 32]),
            position: Position::new(3, 4),
            bump: 255,
            session_key: None,
        };
        let owned = Account {
            owner: programs.game,
            lamports: 1,
            data: player.encode(),
        };
        let delegated = Account {
            owner: programs.delegation,
            ..owned.clone()
        };
        let programs = &programs;
        assert!(!EntitySnapshot::from_account(LedgerKind::Primary, &owned, programs).unwrap().delegated);
        assert!(EntitySnapshot::from_account(LedgerKind::Primary, &delegated, programs).unwrap().delegated);
    }

    proptest! {
        #[test]
        fn divergence_only_with_both_and_different(
            px in 0u8..100, py in 0u8..100, rx in 0u8..100, ry in 0u8..100, delegated: bool
        ) {
            let p = snapshot(LedgerKind::Primary, px, py);
            let r = snapshot(LedgerKind::Rollup, rx, ry);
            let both = reconcile(Some(&p), Some(&r), delegated);
            prop_assert_eq!(both.divergence, (px, py) != (rx, ry));
            prop_assert!(!reconcile(Some(&p), None, delegated).divergence);
            prop_assert!(!reconcile(None, Some(&r), delegated).divergence);
            let expected = if delegated { r.position } else { p.position };
            prop_assert_eq!(both.position(), Some(expected));
        }
    }
}
