//! Decoders for the game program's accounts.
//!
//! Layout is Anchor's: an 8-byte discriminator followed by borsh fields.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::board::Position;
use crate::error::{Result, TypesError};
use crate::program::account_discriminator;

/// Raw account as returned by a ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub owner: Address,
    pub lamports: u64,
    pub data: Vec<u8>,
}

/// Decoded `Player` account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAccount {
    pub authority: Address,
    pub position: Position,
    pub bump: u8,
    pub session_key: Option<Address>,
}

/// Decoded `Board` account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardAccount {
    pub authority: Address,
}

impl PlayerAccount {
    pub const NAME: &'static str = "Player";
    /// Discriminator + authority + x + y + bump + option tag + key.
    pub const MAX_LEN: usize = 8 + 32 + 3 + 1 + 32;

    pub fn discriminator() -> [u8; 8] {
        account_discriminator(Self::NAME)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        reader.expect_discriminator(Self::discriminator(), Self::NAME)?;
        let authority = reader.address("player.authority")?;
        let x = reader.u8("player.x")?;
        let y = reader.u8("player.y")?;
        let bump = reader.u8("player.bump")?;
        let session_key = match reader.u8("player.session_key tag")? {
            0 => None,
            1 => Some(reader.address("player.session_key")?),
            other => return Err(TypesError::InvalidOptionTag(other)),
        };
        Ok(Self {
            authority,
            position: Position::new(x, y),
            bump,
            session_key,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::MAX_LEN);
        out.extend_from_slice(&Self::discriminator());
        out.extend_from_slice(self.authority.as_bytes());
        out.push(self.position.x);
        out.push(self.position.y);
        out.push(self.bump);
        match &self.session_key {
            Some(key) => {
                out.push(1);
                out.extend_from_slice(key.as_bytes());
            }
            None => out.push(0),
        }
        out
    }
}

impl BoardAccount {
    pub const NAME: &'static str = "Board";

    pub fn discriminator() -> [u8; 8] {
        account_discriminator(Self::NAME)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        reader.expect_discriminator(Self::discriminator(), Self::NAME)?;
        Ok(Self {
            authority: reader.address("board.authority")?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(40);
        out.extend_from_slice(&Self::discriminator());
        out.extend_from_slice(self.authority.as_bytes());
        out
    }
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8]> {
        let end = self.offset + len;
        let slice = self
            .data
            .get(self.offset..end)
            .ok_or(TypesError::Truncated(field))?;
        self.offset = end;
        Ok(slice)
    }

    fn expect_discriminator(&mut self, expected: [u8; 8], account: &'static str) -> Result<()> {
        let found = self.take(8, "discriminator")?;
        if found != expected {
            return Err(TypesError::DiscriminatorMismatch { account });
        }
        Ok(())
    }

    fn u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn address(&mut self, field: &'static str) -> Result<Address> {
        Address::from_slice(self.take(32, field)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(session_key: Option<Address>) -> PlayerAccount {
        PlayerAccount {
            authority: Address::new([9u8; 32]),
            position: Position::new(42, 7),
            bump: 254,
            session_key,
        }
    }

    #[test]
    fn decodes_player_with_session_key() {
        let original = player(Some(Address::new([5u8; 32])));
        let bytes = original.encode();
        assert_eq!(bytes.len(), PlayerAccount::MAX_LEN);
        assert_eq!(PlayerAccount::decode(&bytes).unwrap(), original);
    }

    #[test]
    fn decodes_player_without_session_key_and_trailing_padding() {
        let original = player(None);
        let mut bytes = original.encode();
        // Accounts are allocated at max size; the unused option body is zeroed.
        bytes.resize(PlayerAccount::MAX_LEN, 0);
        assert_eq!(PlayerAccount::decode(&bytes).unwrap(), original);
    }

    #[test]
    fn rejects_board_bytes_as_player() {
        let board = BoardAccount {
            authority: Address::new([1u8; 32]),
        };
        let err = PlayerAccount::decode(&board.encode()).unwrap_err();
        assert_eq!(err, TypesError::DiscriminatorMismatch { account: "Player" });
    }

    #[test]
    fn truncated_player_is_an_error() {
        let bytes = player(None).encode();
        assert!(matches!(
            PlayerAccount::decode(&bytes[..20]),
            Err(TypesError::Truncated(_))
        ));
    }

    #[test]
    fn bad_option_tag_is_rejected() {
        let mut bytes = player(None).encode();
        let last = bytes.len() - 1;
        bytes[last] = 7;
        assert_eq!(
            PlayerAccount::decode(&bytes).unwrap_err(),
            TypesError::InvalidOptionTag(7)
        );
    }
}
