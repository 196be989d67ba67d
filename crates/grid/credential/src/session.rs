use async_trait::async_trait;
use grid_types::{Address, Signature, Transaction};

use crate::error::SignerError;
use crate::keypair::SessionKeyMaterial;
use crate::signer::{sign_with, MessageSigner, SignerCapability, TransactionSigner};

/// A signer backed by a derived session key, acting for `owner`.
///
/// Session transactions are always paid for by the session key itself. The
/// fee payer is never set to the owner.
#[derive(Clone, Debug)]
pub struct SessionCredential {
    material: SessionKeyMaterial,
    owner: Address,
}

impl SessionCredential {
    pub fn new(material: SessionKeyMaterial, owner: Address) -> Self {
        Self { material, owner }
    }

    /// The primary identity this credential acts for.
    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn material(&self) -> &SessionKeyMaterial {
        &self.material
    }
}

#[async_trait]
impl MessageSigner for SessionCredential {
    async fn sign_message(&self, message: &[u8]) -> Result<Signature, SignerError> {
        Ok(self.material.sign(message))
    }
}

#[async_trait]
impl TransactionSigner for SessionCredential {
    fn address(&self) -> Address {
        self.material.address()
    }

    fn capability(&self) -> SignerCapability<'_> {
        SignerCapability::MessageCapable(self)
    }

    async fn sign_transaction(&self, tx: Transaction) -> Result<Transaction, SignerError> {
        let session = self.material.address();
        match tx {
            Transaction::Legacy(mut legacy) => {
                legacy.set_fee_payer(session);
                sign_with(&self.material, Transaction::Legacy(legacy))
            }
            Transaction::Versioned(versioned) => {
                match versioned.message().fee_payer() {
                    Some(payer) if *payer == session => {}
                    Some(payer) => return Err(SignerError::FeePayerNotSession(payer.to_string())),
                    None => return Err(SignerError::FeePayerNotSession("none".into())),
                }
                sign_with(&self.material, Transaction::Versioned(versioned))
            }
        }
    }
}
