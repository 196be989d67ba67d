//! Program identifiers, program-derived addresses, and Anchor discriminators.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::error::{Result, TypesError};

/// The grid game program.
pub const GAME_PROGRAM_ID: Address = Address::new([
    146, 28, 233, 111, 17, 46, 189, 188, 41, 65, 22, 47, 8, 102, 153, 36, 237, 194, 128, 205, 175,
    133, 226, 194, 87, 75, 241, 143, 12, 159, 230, 80,
]);

/// The program that owns an account on the primary ledger while it is delegated.
pub const DELEGATION_PROGRAM_ID: Address = Address::new([
    181, 183, 0, 225, 242, 87, 58, 192, 204, 6, 34, 1, 52, 74, 207, 151, 184, 53, 6, 235, 140,
    229, 25, 152, 204, 98, 126, 24, 147, 128, 167, 62,
]);

pub const SYSTEM_PROGRAM_ID: Address = Address::new([0u8; 32]);

pub const MEMO_PROGRAM_ID: Address = Address::new([
    5, 74, 83, 90, 153, 41, 33, 6, 77, 36, 232, 113, 96, 218, 56, 124, 124, 53, 181, 221, 188, 146,
    187, 129, 228, 31, 168, 64, 65, 5, 68, 141,
]);

/// Rollup-side program that commits and releases delegated accounts.
pub const MAGIC_PROGRAM_ID: Address = Address::new([
    5, 69, 180, 36, 176, 218, 112, 149, 236, 185, 214, 222, 195, 119, 215, 40, 145, 182, 231, 142,
    146, 234, 18, 214, 223, 187, 58, 64, 0, 0, 0, 0,
]);

pub const MAGIC_CONTEXT_ID: Address = Address::new([
    5, 69, 180, 36, 196, 165, 40, 191, 95, 180, 3, 47, 68, 82, 130, 142, 187, 56, 171, 193, 210,
    220, 151, 247, 63, 139, 148, 84, 128, 0, 0, 0,
]);

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

pub const PLAYER_SEED: &[u8] = b"player";
pub const BOARD_SEED: &[u8] = b"board";

/// The set of program ids a client talks to. Overridable for local clusters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramIds {
    pub game: Address,
    pub delegation: Address,
}

impl Default for ProgramIds {
    fn default() -> Self {
        Self {
            game: GAME_PROGRAM_ID,
            delegation: DELEGATION_PROGRAM_ID,
        }
    }
}

impl ProgramIds {
    pub fn player_address(&self, authority: &Address) -> Result<(Address, u8)> {
        find_program_address(&[PLAYER_SEED, authority.as_ref()], &self.game)
    }

    pub fn board_address(&self) -> Result<(Address, u8)> {
        find_program_address(&[BOARD_SEED], &self.game)
    }
}

/// Create a program address for a fixed bump. Fails if the hash lands on
/// the ed25519 curve, since such an address could have a private key.
pub fn create_program_address(seeds: &[&[u8]], bump: u8, program: &Address) -> Option<Address> {
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update([bump]);
    hasher.update(program.as_bytes());
    hasher.update(PDA_MARKER);
    let bytes: [u8; 32] = hasher.finalize().into();

    if is_on_curve(&bytes) {
        None
    } else {
        Some(Address::new(bytes))
    }
}

/// Search bumps from 255 downwards for the first off-curve address.
pub fn find_program_address(seeds: &[&[u8]], program: &Address) -> Result<(Address, u8)> {
    (0..=u8::MAX)
        .rev()
        .find_map(|bump| create_program_address(seeds, bump, program).map(|a| (a, bump)))
        .ok_or(TypesError::NoViableBump)
}

pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    VerifyingKey::from_bytes(bytes).is_ok()
}

/// Anchor account discriminator: `sha256("account:<Name>")[..8]`.
pub fn account_discriminator(name: &str) -> [u8; 8] {
    prefixed_discriminator("account", name)
}

/// Anchor instruction discriminator: `sha256("global:<name>")[..8]`.
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    prefixed_discriminator("global", name)
}

fn prefixed_discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::new()
        .chain_update(namespace.as_bytes())
        .chain_update(b":")
        .chain_update(name.as_bytes())
        .finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}
