//! Deterministic session key derivation.
//!
//! The primary identity signs a fixed, origin-bound message. The session
//! seed is `sha256(signature || message)`. Ed25519 signatures are
//! deterministic, so the same wallet signing for the same origin always
//! yields the same session key, on any device.

use grid_types::instruction::memo;
use grid_types::{Address, Hash, LegacyTransaction, Signature, Transaction};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{CredentialError, Result};
use crate::keypair::SessionKeyMaterial;
use crate::signer::{SignerCapability, TransactionSigner};

/// Prompt text shown in the wallet. The origin is appended verbatim.
pub const DERIVATION_PROMPT: &str = "Sign this message to create a Gridline session key.\n\
This request will not trigger a transaction or cost any fees.\n\
Origin: ";

#[derive(Clone, Debug)]
pub struct CredentialDeriver {
    origin: String,
}

impl CredentialDeriver {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn canonical_message(&self) -> Vec<u8> {
        format!("{DERIVATION_PROMPT}{}", self.origin).into_bytes()
    }

    /// Ask `signer` for the derivation signature and build the key from it.
    ///
    /// May prompt the user. Never broadcasts anything.
    pub async fn derive(&self, signer: &dyn TransactionSigner) -> Result<SessionKeyMaterial> {
        let message = self.canonical_message();
        let identity = signer.address();

        let signature = match signer.capability() {
            SignerCapability::MessageCapable(message_signer) => {
                message_signer.sign_message(&message).await?
            }
            SignerCapability::TransactionOnly => {
                tracing::debug!(
                    identity = %identity,
                    "signer lacks message signing, deriving from pseudo-transaction"
                );
                let pseudo = pseudo_transaction(&identity, &message);
                let signed = signer.sign_transaction(pseudo.into()).await?;
                signature_of(&signed, &identity).ok_or(CredentialError::MissingSignature)?
            }
        };

        Ok(material_from_signature(&signature, &message))
    }
}

/// `seed = sha256(signature || message)[..32]`.
pub fn material_from_signature(signature: &Signature, message: &[u8]) -> SessionKeyMaterial {
    let digest = Sha256::new()
        .chain_update(signature.as_bytes())
        .chain_update(message)
        .finalize();
    let mut seed = Zeroizing::new([0u8; 32]);
    seed.copy_from_slice(&digest[..32]);
    SessionKeyMaterial::from_seed(&seed)
}

/// A never-broadcast transaction carrying the message in a memo.
///
/// Its recency reference is `sha256(identity || message)` so the signed
/// bytes, and therefore the signature, are identical on every call.
pub fn pseudo_transaction(identity: &Address, message: &[u8]) -> LegacyTransaction {
    let digest: [u8; 32] = Sha256::new()
        .chain_update(identity.as_bytes())
        .chain_update(message)
        .finalize()
        .into();
    LegacyTransaction::new(vec![memo(identity, message)], Hash::new(digest))
        .with_fee_payer(*identity)
}

fn signature_of(tx: &Transaction, identity: &Address) -> Option<Signature> {
    match tx {
        Transaction::Legacy(legacy) => legacy.signature_of(identity),
        Transaction::Versioned(versioned) => versioned.signature_of(identity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SignerError;
    use crate::signer::{LocalKeypairSigner, TransactionOnly};
    use async_trait::async_trait;
    use proptest::prelude::*;

    fn wallet(seed: u8) -> LocalKeypairSigner {
        LocalKeypairSigner::new(SessionKeyMaterial::from_seed(&[seed; 32]))
    }

    struct DenyingWallet(Address);

    #[async_trait]
    impl TransactionSigner for DenyingWallet {
        fn address(&self) -> Address {
            self.0
        }

        fn capability(&self) -> SignerCapability<'_> {
            SignerCapability::TransactionOnly
        }

        async fn sign_transaction(
            &self,
            _tx: Transaction,
        ) -> std::result::Result<Transaction, SignerError> {
            Err(SignerError::Denied)
        }
    }

    #[tokio::test]
    async fn derivation_is_deterministic_for_message_signers() {
        let deriver = CredentialDeriver::new("https://grid.example");
        let first = deriver.derive(&wallet(1)).await.unwrap();
        let second = deriver.derive(&wallet(1)).await.unwrap();
        assert_eq!(first.address(), second.address());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn derivation_is_deterministic_for_transaction_only_signers() {
        let deriver = CredentialDeriver::new("https://grid.example");
        let first = deriver.derive(&TransactionOnly::new(wallet(1))).await.unwrap();
        let second = deriver.derive(&TransactionOnly::new(wallet(1))).await.unwrap();
        assert_eq!(first.address(), second.address());
    }

    #[tokio::test]
    async fn origin_binds_the_key() {
        let a = CredentialDeriver::new("https://a.example").derive(&wallet(1)).await.unwrap();
        let b = CredentialDeriver::new("https://b.example").derive(&wallet(1)).await.unwrap();
        assert_ne!(a.address(), b.address());
    }

    #[tokio::test]
    async fn session_key_differs_from_identity() {
        let w = wallet(1);
        let derived = CredentialDeriver::new("o").derive(&w).await.unwrap();
        assert_ne!(derived.address(), w.address());
    }

    #[tokio::test]
    async fn denial_maps_to_signer_denied() {
        let err = CredentialDeriver::new("o")
            .derive(&DenyingWallet(Address::new([1; 32])))
            .await
            .unwrap_err();
        assert_eq!(err, CredentialError::SignerDenied);
    }

    #[test]
    fn message_is_prompt_plus_origin() {
        let deriver = CredentialDeriver::new("https://grid.example");
        let text = String::from_utf8(deriver.canonical_message()).unwrap();
        assert!(text.starts_with(DERIVATION_PROMPT));
        assert!(text.ends_with("https://grid.example"));
    }

    proptest! {
        #[test]
        fn same_inputs_same_key(seed in any::<[u8; 32]>(), origin in "[a-z:/.]{1,32}") {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            rt.block_on(async move {
                let signer = LocalKeypairSigner::new(SessionKeyMaterial::from_seed(&seed));
                let deriver = CredentialDeriver::new(origin);
                let a = deriver.derive(&signer).await.unwrap();
                let b = deriver.derive(&signer).await.unwrap();
                assert_eq!(a.address(), b.address());
            });
        }
    }
}
