//! Build, sign, and submit a transaction, sorting failures by whether the
//! ledger might have applied it.

use grid_credential::TransactionSigner;
use grid_ledger::{LedgerClient, SubmitError, TxId};
use grid_types::{GameOp, Instruction, LegacyTransaction, ProgramIds};

use crate::error::SessionError;
use crate::outcome::{Failure, FailureKind};

pub(crate) enum SubmitFailure {
    /// Nothing reached the ledger.
    NotSent(Failure),
    /// The ledger refused the transaction.
    Rejected(SubmitError),
    /// The transaction may have landed. `id` is its signature.
    Ambiguous { error: SubmitError, id: TxId },
}

pub(crate) async fn sign_and_submit(
    signer: &dyn TransactionSigner,
    ledger: &dyn LedgerClient,
    instructions: Vec<Instruction>,
) -> Result<TxId, SubmitFailure> {
    let blockhash = ledger.latest_blockhash().await.map_err(|e| {
        SubmitFailure::NotSent(Failure::new(FailureKind::Ambiguous, e.to_string()))
    })?;
    let tx = LegacyTransaction::new(instructions, blockhash).with_fee_payer(signer.address());
    let signed = signer
        .sign_transaction(tx.into())
        .await
        .map_err(|e| SubmitFailure::NotSent(e.into()))?;
    let id = signed.id().ok_or_else(|| {
        SubmitFailure::NotSent(Failure::new(
            FailureKind::Rejected,
            "signer returned an unsigned transaction",
        ))
    })?;

    tracing::debug!(
        ledger = %ledger.kind(),
        signer = %signer.address(),
        tx = %id,
        "submitting transaction"
    );
    match ledger.submit(&signed).await {
        Ok(id) => Ok(id),
        Err(error) if error.is_ambiguous() => {
            tracing::warn!(ledger = %ledger.kind(), tx = %id, error = %error, "submission outcome unknown");
            Err(SubmitFailure::Ambiguous { error, id })
        }
        Err(error) => {
            tracing::warn!(ledger = %ledger.kind(), tx = %id, error = %error, "submission rejected");
            Err(SubmitFailure::Rejected(error))
        }
    }
}

/// Refuse instructions a session key must never sign.
pub(crate) fn ensure_session_scope(
    instructions: &[Instruction],
    programs: &ProgramIds,
) -> Result<(), SessionError> {
    for ix in instructions.iter().filter(|ix| ix.program_id == programs.game) {
        if let Some(op) = GameOp::from_data(&ix.data) {
            if op.requires_primary() {
                return Err(SessionError::SessionScope(op.name()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_types::{Address, GameInstructions};

    #[test]
    fn session_scope_allows_only_moves() {
        let programs = ProgramIds::default();
        let game = GameInstructions::new(programs);
        let owner = Address::new([1u8; 32]);
        let session = Address::new([2u8; 32]);

        let moves = vec![game.move_player(&owner, &session, 1, 0).unwrap()];
        assert!(ensure_session_scope(&moves, &programs).is_ok());

        let undelegate = vec![game.undelegate(&owner).unwrap()];
        assert!(matches!(
            ensure_session_scope(&undelegate, &programs),
            Err(SessionError::SessionScope("undelegate"))
        ));
    }
}
