//! Instruction builders for the game, system, and memo programs.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::Result;
use crate::program::{
    instruction_discriminator, ProgramIds, MAGIC_CONTEXT_ID, MAGIC_PROGRAM_ID, MEMO_PROGRAM_ID,
    SYSTEM_PROGRAM_ID,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMeta {
    pub address: Address,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: true,
        }
    }

    pub fn readonly(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub program_id: Address,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// Game program entrypoints, named as the program names them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GameOp {
    Initialize,
    JoinGame,
    MovePlayer,
    RegisterSessionKey,
    RevokeSessionKey,
    Delegate,
    Undelegate,
}

impl GameOp {
    pub fn name(&self) -> &'static str {
        match self {
            GameOp::Initialize => "initialize",
            GameOp::JoinGame => "join_game",
            GameOp::MovePlayer => "move_player",
            GameOp::RegisterSessionKey => "register_session_key",
            GameOp::RevokeSessionKey => "revoke_session_key",
            GameOp::Delegate => "delegate",
            GameOp::Undelegate => "undelegate",
        }
    }

    pub fn discriminator(&self) -> [u8; 8] {
        instruction_discriminator(self.name())
    }

    /// Operations whose `authority` must be the primary identity itself.
    /// A session credential may only sign `MovePlayer`.
    pub fn requires_primary(&self) -> bool {
        !matches!(self, GameOp::MovePlayer)
    }

    /// Identify an instruction by its leading discriminator.
    pub fn from_data(data: &[u8]) -> Option<Self> {
        let head = data.get(..8)?;
        [
            GameOp::Initialize,
            GameOp::JoinGame,
            GameOp::MovePlayer,
            GameOp::RegisterSessionKey,
            GameOp::RevokeSessionKey,
            GameOp::Delegate,
            GameOp::Undelegate,
        ]
        .into_iter()
        .find(|op| op.discriminator() == head)
    }
}

/// Builds game program instructions against a fixed set of program ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct GameInstructions {
    pub programs: ProgramIds,
}

impl GameInstructions {
    pub fn new(programs: ProgramIds) -> Self {
        Self { programs }
    }

    pub fn initialize(&self, authority: &Address) -> Result<Instruction> {
        let (board, _) = self.programs.board_address()?;
        Ok(self.instruction(
            GameOp::Initialize,
            vec![
                AccountMeta::writable(board, false),
                AccountMeta::writable(*authority, true),
                AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            ],
            &[],
        ))
    }

    pub fn join_game(&self, authority: &Address) -> Result<Instruction> {
        let (player, _) = self.programs.player_address(authority)?;
        Ok(self.instruction(
            GameOp::JoinGame,
            vec![
                AccountMeta::writable(player, false),
                AccountMeta::writable(*authority, true),
                AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            ],
            &[],
        ))
    }

    /// `signer` is either the authority or its registered session key.
    pub fn move_player(
        &self,
        authority: &Address,
        signer: &Address,
        dx: i8,
        dy: i8,
    ) -> Result<Instruction> {
        let (player, _) = self.programs.player_address(authority)?;
        Ok(self.instruction(
            GameOp::MovePlayer,
            vec![
                AccountMeta::writable(player, false),
                AccountMeta::readonly(*signer, true),
            ],
            &[dx as u8, dy as u8],
        ))
    }

    pub fn register_session_key(
        &self,
        authority: &Address,
        session_key: &Address,
    ) -> Result<Instruction> {
        let (player, _) = self.programs.player_address(authority)?;
        Ok(self.instruction(
            GameOp::RegisterSessionKey,
            vec![
                AccountMeta::writable(player, false),
                AccountMeta::readonly(*authority, true),
            ],
            session_key.as_bytes(),
        ))
    }

    pub fn revoke_session_key(&self, authority: &Address) -> Result<Instruction> {
        let (player, _) = self.programs.player_address(authority)?;
        Ok(self.instruction(
            GameOp::RevokeSessionKey,
            vec![
                AccountMeta::writable(player, false),
                AccountMeta::readonly(*authority, true),
            ],
            &[],
        ))
    }

    /// Hand the player account to the delegation program. Primary ledger.
    pub fn delegate(&self, authority: &Address) -> Result<Instruction> {
        let (player, _) = self.programs.player_address(authority)?;
        Ok(self.instruction(
            GameOp::Delegate,
            vec![
                AccountMeta::writable(*authority, true),
                AccountMeta::writable(player, false),
                AccountMeta::readonly(self.programs.game, false),
                AccountMeta::readonly(self.programs.delegation, false),
                AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
            ],
            &[],
        ))
    }

    /// Commit the rollup copy and return ownership. Rollup ledger.
    pub fn undelegate(&self, authority: &Address) -> Result<Instruction> {
        let (player, _) = self.programs.player_address(authority)?;
        Ok(self.instruction(
            GameOp::Undelegate,
            vec![
                AccountMeta::writable(*authority, true),
                AccountMeta::writable(player, false),
                AccountMeta::readonly(MAGIC_PROGRAM_ID, false),
                AccountMeta::writable(MAGIC_CONTEXT_ID, false),
            ],
            &[],
        ))
    }

    fn instruction(&self, op: GameOp, accounts: Vec<AccountMeta>, args: &[u8]) -> Instruction {
        let mut data = Vec::with_capacity(8 + args.len());
        data.extend_from_slice(&op.discriminator());
        data.extend_from_slice(args);
        Instruction {
            program_id: self.programs.game,
            accounts,
            data,
        }
    }
}

/// System program lamport transfer.
pub fn transfer(from: &Address, to: &Address, lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());
    Instruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            AccountMeta::writable(*from, true),
            AccountMeta::writable(*to, false),
        ],
        data,
    }
}

/// Decode a system transfer's lamport amount, if `ix` is one.
pub fn transfer_amount(ix: &Instruction) -> Option<u64> {
    if ix.program_id != SYSTEM_PROGRAM_ID || ix.data.len() != 12 || ix.data[..4] != 2u32.to_le_bytes()
    {
        return None;
    }
    let mut amount = [0u8; 8];
    amount.copy_from_slice(&ix.data[4..]);
    Some(u64::from_le_bytes(amount))
}

/// Memo carrying arbitrary bytes, signed by `signer`.
pub fn memo(signer: &Address, message: &[u8]) -> Instruction {
    Instruction {
        program_id: MEMO_PROGRAM_ID,
        accounts: vec![AccountMeta::readonly(*signer, true)],
        data: message.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_encodes_signed_deltas() {
        let builder = GameInstructions::default();
        let authority = Address::new([1u8; 32]);
        let ix = builder.move_player(&authority, &authority, -50, 127).unwrap();
        assert_eq!(GameOp::from_data(&ix.data), Some(GameOp::MovePlayer));
        assert_eq!(&ix.data[8..], &[0xCE, 0x7F]);
        assert!(ix.accounts[1].is_signer);
    }

    #[test]
    fn register_carries_session_key() {
        let builder = GameInstructions::default();
        let authority = Address::new([1u8; 32]);
        let session = Address::new([2u8; 32]);
        let ix = builder.register_session_key(&authority, &session).unwrap();
        assert_eq!(GameOp::from_data(&ix.data), Some(GameOp::RegisterSessionKey));
        assert_eq!(&ix.data[8..], session.as_bytes());
    }

    #[test]
    fn only_moves_are_delegable_to_sessions() {
        assert!(!GameOp::MovePlayer.requires_primary());
        assert!(GameOp::Undelegate.requires_primary());
        assert!(GameOp::Delegate.requires_primary());
        assert!(GameOp::RegisterSessionKey.requires_primary());
    }

    #[test]
    fn transfer_amount_round_trips() {
        let ix = transfer(&Address::new([1u8; 32]), &Address::new([2u8; 32]), 10_000_000);
        assert_eq!(transfer_amount(&ix), Some(10_000_000));
        assert_eq!(transfer_amount(&memo(&Address::new([1u8; 32]), b"hi")), None);
    }
}
