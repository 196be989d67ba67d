use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use grid_types::{Address, Signature};
use zeroize::Zeroizing;

use crate::error::CredentialError;

/// Length of the standard on-disk keypair form: secret seed ‖ public key.
pub const KEYPAIR_LEN: usize = 64;

/// An ed25519 key pair derived from a 32-byte seed.
///
/// The seed is zeroized when the value is dropped and never appears in
/// `Debug` output.
#[derive(Clone)]
pub struct SessionKeyMaterial {
    signing: SigningKey,
}

impl SessionKeyMaterial {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Parse the 64-byte form, checking that the public half matches the seed.
    pub fn from_keypair_bytes(bytes: &[u8]) -> Result<Self, CredentialError> {
        if bytes.len() != KEYPAIR_LEN {
            return Err(CredentialError::InvalidKeyMaterial(format!(
                "expected {KEYPAIR_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&bytes[..32]);
        let material = Self::from_seed(&seed);
        if material.address().as_bytes()[..] != bytes[32..] {
            return Err(CredentialError::InvalidKeyMaterial(
                "public key does not match secret".into(),
            ));
        }
        Ok(material)
    }

    pub fn to_keypair_bytes(&self) -> Zeroizing<[u8; KEYPAIR_LEN]> {
        Zeroizing::new(self.signing.to_keypair_bytes())
    }

    pub fn address(&self) -> Address {
        Address::new(self.signing.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature::new(self.signing.sign(message).to_bytes())
    }
}

impl PartialEq for SessionKeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.to_keypair_bytes()[..] == other.to_keypair_bytes()[..]
    }
}

impl Eq for SessionKeyMaterial {}

impl std::fmt::Debug for SessionKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyMaterial")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Check a detached signature against an address.
pub fn verify(address: &Address, message: &[u8], signature: &Signature) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(address.as_bytes()) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    key.verify(message, &sig).is_ok()
}
