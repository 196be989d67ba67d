//! Game commands, routed to the right ledger and signed by the right key.

use std::fmt;
use std::sync::Arc;

use grid_credential::TransactionSigner;
use grid_ledger::{DualLedgerView, ReconciledView, RosterEntry, TxId};
use grid_types::{clamp_move, Address, GameInstructions, GameOp, Instruction, LedgerKind};

use crate::error::{Result, SessionError};
use crate::manager::SessionLifecycleManager;
use crate::notify::NoticeLevel;
use crate::outcome::{Failure, FailureKind, Outcome};
use crate::submit::{ensure_session_scope, sign_and_submit, SubmitFailure};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    InitBoard,
    Join,
    Move { dx: i8, dy: i8 },
    Delegate,
    Undelegate,
}

impl Command {
    pub fn op(&self) -> GameOp {
        match self {
            Command::InitBoard => GameOp::Initialize,
            Command::Join => GameOp::JoinGame,
            Command::Move { .. } => GameOp::MovePlayer,
            Command::Delegate => GameOp::Delegate,
            Command::Undelegate => GameOp::Undelegate,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move { dx, dy } => write!(f, "move ({dx}, {dy})"),
            other => f.write_str(other.op().name()),
        }
    }
}

/// Which key signs a command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Actor {
    Primary,
    Session,
    /// The funded session key when it may sign the command, otherwise the
    /// primary.
    #[default]
    Auto,
}

pub struct GameClient {
    view: Arc<DualLedgerView>,
    sessions: Arc<SessionLifecycleManager>,
    game: GameInstructions,
}

impl GameClient {
    /// Wire `sessions` to hear about undelegation from `view`.
    pub async fn new(view: Arc<DualLedgerView>, sessions: Arc<SessionLifecycleManager>) -> Self {
        view.set_observer(sessions.clone()).await;
        let game = GameInstructions::new(view.programs());
        Self {
            view,
            sessions,
            game,
        }
    }

    pub fn view(&self) -> &Arc<DualLedgerView> {
        &self.view
    }

    pub fn sessions(&self) -> &Arc<SessionLifecycleManager> {
        &self.sessions
    }

    pub async fn init_board(&self) -> Outcome<TxId> {
        self.run(Command::InitBoard, Actor::Primary).await
    }

    pub async fn join(&self) -> Outcome<TxId> {
        self.run(Command::Join, Actor::Primary).await
    }

    pub async fn move_player(&self, dx: i8, dy: i8) -> Outcome<TxId> {
        self.run(Command::Move { dx, dy }, Actor::Auto).await
    }

    pub async fn delegate(&self) -> Outcome<TxId> {
        self.run(Command::Delegate, Actor::Primary).await
    }

    pub async fn undelegate(&self) -> Outcome<TxId> {
        self.run(Command::Undelegate, Actor::Primary).await
    }

    /// The merged view of the connected player, freshly read.
    pub async fn refresh(&self) -> Result<ReconciledView> {
        let identity = self.sessions.identity().await.ok_or(SessionError::NotConnected)?;
        Ok(self.view.refresh_entity(&identity).await?)
    }

    pub async fn roster(&self) -> Result<Vec<RosterEntry>> {
        Ok(self.view.list_all().await?)
    }

    /// Sign and submit `command` as `actor`. Session-signed commands other
    /// than moves are refused before anything is sent.
    pub async fn run(&self, command: Command, actor: Actor) -> Outcome<TxId> {
        let Some(primary) = self.sessions.signer().await else {
            return self.fail(SessionError::NotConnected.into());
        };
        let identity = primary.address();
        let Some(_guard) = self.sessions.gate().try_enter(identity) else {
            return Outcome::Busy;
        };

        let op = command.op();
        let signer: Arc<dyn TransactionSigner> = match actor {
            Actor::Primary => primary,
            Actor::Session => match self.sessions.credential().await {
                Some(credential) => Arc::new(credential),
                None => return self.fail(SessionError::NoSessionKey.into()),
            },
            Actor::Auto if !op.requires_primary() => {
                match self.sessions.funded_credential().await {
                    Some(credential) => Arc::new(credential),
                    None => primary,
                }
            }
            Actor::Auto => primary,
        };
        let by_session = signer.address() != identity;

        let instructions = match self.instructions(command, &identity, &signer.address()) {
            Ok(ixs) => ixs,
            Err(e) => return self.fail(e.into()),
        };
        if by_session {
            if let Err(e) = ensure_session_scope(&instructions, &self.view.programs()) {
                tracing::error!(identity = %identity, command = %command, "refused session-signed command");
                return self.fail(e.into());
            }
        }

        let ledger = match self.route(command, &identity).await {
            Ok(ledger) => ledger,
            Err(e) => return self.fail(e.into()),
        };
        if let Command::Move { dx, dy } = command {
            if let Some(from) = self.view.current().await.position() {
                tracing::debug!(identity = %identity, from = ?from, to = ?clamp_move(from, dx, dy), "moving");
            }
        }

        let client = self.view.client(ledger);
        match sign_and_submit(signer.as_ref(), client.as_ref(), instructions).await {
            Ok(tx) => {
                tracing::info!(
                    identity = %identity,
                    command = %command,
                    ledger = %ledger,
                    session = by_session,
                    tx = %tx,
                    "command landed"
                );
                self.sessions.reset_streak(identity).await;
                self.refresh_after(&identity).await;
                if !matches!(command, Command::Move { .. }) {
                    self.sessions
                        .notifier()
                        .notify(NoticeLevel::Success, &format!("{command} confirmed"));
                }
                Outcome::Done(tx)
            }
            Err(SubmitFailure::NotSent(failure)) => self.fail(failure),
            Err(SubmitFailure::Rejected(e)) => self.fail(Failure::rejected(op, &e)),
            Err(SubmitFailure::Ambiguous { error, id }) => {
                self.settle(command, &identity, error, id).await
            }
        }
    }

    fn instructions(
        &self,
        command: Command,
        identity: &Address,
        signer: &Address,
    ) -> Result<Vec<Instruction>> {
        let ix = match command {
            Command::InitBoard => self.game.initialize(identity)?,
            Command::Join => self.game.join_game(identity)?,
            Command::Move { dx, dy } => self.game.move_player(identity, signer, dx, dy)?,
            Command::Delegate => self.game.delegate(identity)?,
            Command::Undelegate => self.game.undelegate(identity)?,
        };
        Ok(vec![ix])
    }

    /// Moves follow live delegation. Undelegation is issued on the rollup.
    /// Everything else goes to the primary ledger.
    async fn route(&self, command: Command, identity: &Address) -> Result<LedgerKind> {
        Ok(match command {
            Command::InitBoard | Command::Join | Command::Delegate => LedgerKind::Primary,
            Command::Undelegate => LedgerKind::Rollup,
            Command::Move { .. } => {
                if self.view.read_delegation(identity).await? {
                    LedgerKind::Rollup
                } else {
                    LedgerKind::Primary
                }
            }
        })
    }

    async fn refresh_after(&self, identity: &Address) {
        if let Err(e) = self.view.refresh_entity(identity).await {
            tracing::warn!(identity = %identity, error = %e, "refresh after command failed");
        }
    }

    /// Re-read once after an ambiguous submission. Moves cannot be told
    /// apart from a clamp at the edge, so they stay unresolved.
    async fn settle(
        &self,
        command: Command,
        identity: &Address,
        error: grid_ledger::SubmitError,
        id: TxId,
    ) -> Outcome<TxId> {
        let landed = match command {
            Command::InitBoard => self.board_exists().await,
            Command::Move { .. } => None,
            _ => match self.view.refresh_entity(identity).await {
                Ok(view) => Some(match command {
                    Command::Join => view.authoritative.is_some(),
                    Command::Delegate => view.is_delegated,
                    _ => !view.is_delegated,
                }),
                Err(e) => {
                    tracing::warn!(identity = %identity, error = %e, "re-read after ambiguous submission failed");
                    None
                }
            },
        };
        match landed {
            Some(true) => {
                tracing::info!(identity = %identity, command = %command, tx = %id, "ambiguous submission landed");
                self.sessions.reset_streak(*identity).await;
                Outcome::Done(id)
            }
            Some(false) => {
                self.sessions.reset_streak(*identity).await;
                self.fail(Failure::new(
                    FailureKind::Ambiguous,
                    format!("{command} did not reach the ledger: {error}"),
                ))
            }
            None => {
                self.sessions
                    .unresolved(*identity, format!("{command}: {error}"))
                    .await
            }
        }
    }

    async fn board_exists(&self) -> Option<bool> {
        let (board, _) = self.view.programs().board_address().ok()?;
        match self.view.client(LedgerKind::Primary).get_account(&board).await {
            Ok(account) => Some(account.is_some()),
            Err(e) => {
                tracing::warn!(error = %e, "board re-read failed");
                None
            }
        }
    }

    fn fail<T>(&self, failure: Failure) -> Outcome<T> {
        self.sessions
            .notifier()
            .notify(NoticeLevel::Error, &failure.message);
        Outcome::Failed(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_moves_are_session_eligible() {
        assert!(!Command::Move { dx: 1, dy: 0 }.op().requires_primary());
        for command in [
            Command::InitBoard,
            Command::Join,
            Command::Delegate,
            Command::Undelegate,
        ] {
            assert!(command.op().requires_primary(), "{command}");
        }
    }

    #[test]
    fn display_names_commands() {
        assert_eq!(Command::Move { dx: -1, dy: 2 }.to_string(), "move (-1, 2)");
        assert_eq!(Command::Join.to_string(), "join_game");
    }
}
