//! Signing capability traits.
//!
//! A wallet always signs transactions. Message signing is optional and is
//! declared through [`SignerCapability`] rather than probed at runtime.

use std::path::Path;

use async_trait::async_trait;
use grid_types::{Address, Transaction};

use crate::error::SignerError;
use crate::keypair::{SessionKeyMaterial, KEYPAIR_LEN};

/// Detached message signing.
#[async_trait]
pub trait MessageSigner: Send + Sync {
    async fn sign_message(&self, message: &[u8]) -> Result<grid_types::Signature, SignerError>;
}

/// What a signer can do beyond transaction signing.
pub enum SignerCapability<'a> {
    MessageCapable(&'a dyn MessageSigner),
    TransactionOnly,
}

/// The surface every signer exposes: an address and transaction signing.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> Address;

    fn capability(&self) -> SignerCapability<'_>;

    async fn sign_transaction(&self, tx: Transaction) -> Result<Transaction, SignerError>;
}

/// Sign `tx` with `material` as one of its required signers.
///
/// Legacy transactions without a fee payer get `material`'s address as payer.
pub fn sign_with(material: &SessionKeyMaterial, tx: Transaction) -> Result<Transaction, SignerError> {
    let address = material.address();
    match tx {
        Transaction::Legacy(mut legacy) => {
            if legacy.fee_payer.is_none() {
                legacy.set_fee_payer(address);
            }
            let message = legacy.compile_message()?;
            if !message.signer_keys().contains(&address) {
                return Err(SignerError::NotARequiredSigner(address.to_string()));
            }
            let signature = material.sign(&message.serialize());
            legacy.add_signature(address, signature);
            Ok(Transaction::Legacy(legacy))
        }
        Transaction::Versioned(mut versioned) => {
            let signature = material.sign(&versioned.message_bytes());
            if !versioned.add_signature(&address, signature) {
                return Err(SignerError::NotARequiredSigner(address.to_string()));
            }
            Ok(Transaction::Versioned(versioned))
        }
    }
}

/// A primary identity whose key is held locally, e.g. a CLI keypair file.
pub struct LocalKeypairSigner {
    key: SessionKeyMaterial,
}

impl LocalKeypairSigner {
    pub fn new(key: SessionKeyMaterial) -> Self {
        Self { key }
    }

    /// Load a keypair file holding a JSON array of 64 bytes.
    pub fn from_file(path: &Path) -> Result<Self, SignerError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SignerError::Unavailable(format!("{}: {e}", path.display())))?;
        let bytes: Vec<u8> = serde_json::from_str(&raw)
            .map_err(|e| SignerError::Unavailable(format!("{}: {e}", path.display())))?;
        if bytes.len() != KEYPAIR_LEN {
            return Err(SignerError::Unavailable(format!(
                "{}: expected {KEYPAIR_LEN} bytes",
                path.display()
            )));
        }
        let key = SessionKeyMaterial::from_keypair_bytes(&bytes)
            .map_err(|e| SignerError::Unavailable(e.to_string()))?;
        Ok(Self { key })
    }
}

#[async_trait]
impl MessageSigner for LocalKeypairSigner {
    async fn sign_message(&self, message: &[u8]) -> Result<grid_types::Signature, SignerError> {
        Ok(self.key.sign(message))
    }
}

#[async_trait]
impl TransactionSigner for LocalKeypairSigner {
    fn address(&self) -> Address {
        self.key.address()
    }

    fn capability(&self) -> SignerCapability<'_> {
        SignerCapability::MessageCapable(self)
    }

    async fn sign_transaction(&self, tx: Transaction) -> Result<Transaction, SignerError> {
        sign_with(&self.key, tx)
    }
}

/// Wraps a signer and hides its message capability, as wallets without
/// `signMessage` support behave.
pub struct TransactionOnly<S> {
    inner: S,
}

impl<S> TransactionOnly<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: TransactionSigner> TransactionSigner for TransactionOnly<S> {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn capability(&self) -> SignerCapability<'_> {
        SignerCapability::TransactionOnly
    }

    async fn sign_transaction(&self, tx: Transaction) -> Result<Transaction, SignerError> {
        self.inner.sign_transaction(tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::verify;
    use grid_types::instruction::{memo, transfer};
    use grid_types::{Hash, LegacyTransaction, Message, VersionedTransaction};

    fn signer(seed: u8) -> LocalKeypairSigner {
        LocalKeypairSigner::new(SessionKeyMaterial::from_seed(&[seed; 32]))
    }

    #[tokio::test]
    async fn legacy_without_payer_defaults_to_signer() {
        let s = signer(1);
        let tx = LegacyTransaction::new(vec![memo(&s.address(), b"hi")], Hash::new([0; 32]));
        let signed = s.sign_transaction(tx.into()).await.unwrap();
        assert_eq!(signed.fee_payer(), Some(s.address()));
        let sig = signed.id().unwrap();
        assert!(verify(&s.address(), &signed.message_bytes().unwrap(), &sig));
    }

    #[tokio::test]
    async fn refuses_to_sign_when_not_required() {
        let s = signer(1);
        let other = signer(2);
        let tx = LegacyTransaction::new(
            vec![transfer(&other.address(), &s.address(), 1)],
            Hash::new([0; 32]),
        )
        .with_fee_payer(other.address());
        let err = s.sign_transaction(tx.into()).await.unwrap_err();
        assert!(matches!(err, SignerError::NotARequiredSigner(_)));
    }

    #[tokio::test]
    async fn versioned_signature_fills_slot() {
        let s = signer(3);
        let msg = Message::compile(&s.address(), &[memo(&s.address(), b"v0")], Hash::new([1; 32]))
            .unwrap();
        let signed = s
            .sign_transaction(VersionedTransaction::new(msg).into())
            .await
            .unwrap();
        assert!(signed.is_fully_signed().unwrap());
    }

    #[test]
    fn transaction_only_hides_message_capability() {
        let wrapped = TransactionOnly::new(signer(4));
        assert!(matches!(
            wrapped.capability(),
            SignerCapability::TransactionOnly
        ));
    }

    #[test]
    fn keypair_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.json");
        let key = SessionKeyMaterial::from_seed(&[5u8; 32]);
        let bytes: Vec<u8> = key.to_keypair_bytes().to_vec();
        std::fs::write(&path, serde_json::to_string(&bytes).unwrap()).unwrap();
        let loaded = LocalKeypairSigner::from_file(&path).unwrap();
        assert_eq!(loaded.address(), key.address());
    }
}
