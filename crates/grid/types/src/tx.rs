//! Transaction representations and their wire encoding.
//!
//! Two shapes are supported:
//! - [`LegacyTransaction`]: an instruction list with a mutable fee payer,
//!   compiled into a message at signing time.
//! - [`VersionedTransaction`]: a pre-compiled v0 message that cannot be
//!   altered; signing only fills signature slots.

use serde::{Deserialize, Serialize};

use crate::address::{Address, Hash, Signature};
use crate::error::{Result, TypesError};
use crate::instruction::{AccountMeta, Instruction};

const VERSION_PREFIX: u8 = 0x80;
const MAX_ACCOUNT_KEYS: usize = 256;

/// Append a compact-u16 length prefix.
pub fn encode_len(out: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

/// A compiled message: deduplicated account keys plus index-based instructions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Address>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
}

#[derive(Clone, Copy)]
struct KeyFlags {
    address: Address,
    is_signer: bool,
    is_writable: bool,
}

impl Message {
    /// Compile instructions with `fee_payer` as the first, writable signer.
    pub fn compile(fee_payer: &Address, instructions: &[Instruction], blockhash: Hash) -> Result<Self> {
        let mut keys: Vec<KeyFlags> = vec![KeyFlags {
            address: *fee_payer,
            is_signer: true,
            is_writable: true,
        }];

        let mut merge = |meta: &AccountMeta| {
            match keys.iter_mut().find(|k| k.address == meta.address) {
                Some(existing) => {
                    existing.is_signer |= meta.is_signer;
                    existing.is_writable |= meta.is_writable;
                }
                None => keys.push(KeyFlags {
                    address: meta.address,
                    is_signer: meta.is_signer,
                    is_writable: meta.is_writable,
                }),
            }
        };

        for ix in instructions {
            for meta in &ix.accounts {
                merge(meta);
            }
            merge(&AccountMeta::readonly(ix.program_id, false));
        }

        if keys.len() > MAX_ACCOUNT_KEYS {
            return Err(TypesError::TooManyAccounts(keys.len()));
        }

        // Fee payer stays first: it is a writable signer and the sort is stable.
        let rank = |k: &KeyFlags| match (k.is_signer, k.is_writable) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        };
        keys.sort_by_key(rank);

        let header = MessageHeader {
            num_required_signatures: keys.iter().filter(|k| k.is_signer).count() as u8,
            num_readonly_signed: keys.iter().filter(|k| k.is_signer && !k.is_writable).count()
                as u8,
            num_readonly_unsigned: keys
                .iter()
                .filter(|k| !k.is_signer && !k.is_writable)
                .count() as u8,
        };
        let account_keys: Vec<Address> = keys.iter().map(|k| k.address).collect();
        let index_of = |address: &Address| -> u8 {
            // Every key was inserted above, so the lookup cannot miss.
            account_keys.iter().position(|k| k == address).unwrap_or(0) as u8
        };

        let compiled = instructions
            .iter()
            .map(|ix| CompiledInstruction {
                program_id_index: index_of(&ix.program_id),
                accounts: ix.accounts.iter().map(|m| index_of(&m.address)).collect(),
                data: ix.data.clone(),
            })
            .collect();

        Ok(Self {
            header,
            account_keys,
            recent_blockhash: blockhash,
            instructions: compiled,
        })
    }

    pub fn fee_payer(&self) -> Option<&Address> {
        self.account_keys.first()
    }

    pub fn signer_keys(&self) -> &[Address] {
        let n = usize::from(self.header.num_required_signatures).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn is_signer(&self, index: usize) -> bool {
        index < usize::from(self.header.num_required_signatures)
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let signers = usize::from(self.header.num_required_signatures);
        if index < signers {
            index < signers - usize::from(self.header.num_readonly_signed)
        } else {
            index < self.account_keys.len() - usize::from(self.header.num_readonly_unsigned)
        }
    }

    /// Rebuild address-based instructions from the compiled form.
    pub fn decompile(&self) -> Vec<Instruction> {
        let key = |i: u8| self.account_keys.get(usize::from(i)).copied();
        self.instructions
            .iter()
            .filter_map(|ci| {
                let program_id = key(ci.program_id_index)?;
                let accounts = ci
                    .accounts
                    .iter()
                    .map(|&i| {
                        key(i).map(|address| AccountMeta {
                            address,
                            is_signer: self.is_signer(usize::from(i)),
                            is_writable: self.is_writable(usize::from(i)),
                        })
                    })
                    .collect::<Option<Vec<_>>>()?;
                Some(Instruction {
                    program_id,
                    accounts,
                    data: ci.data.clone(),
                })
            })
            .collect()
    }

    /// Legacy message bytes (no version prefix).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        self.write_body(&mut out);
        out
    }

    /// v0 message bytes: version prefix, body, and an empty lookup table list.
    pub fn serialize_v0(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(257);
        out.push(VERSION_PREFIX);
        self.write_body(&mut out);
        encode_len(&mut out, 0);
        out
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.push(self.header.num_required_signatures);
        out.push(self.header.num_readonly_signed);
        out.push(self.header.num_readonly_unsigned);
        encode_len(out, self.account_keys.len());
        for key in &self.account_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.extend_from_slice(self.recent_blockhash.as_bytes());
        encode_len(out, self.instructions.len());
        for ix in &self.instructions {
            out.push(ix.program_id_index);
            encode_len(out, ix.accounts.len());
            out.extend_from_slice(&ix.accounts);
            encode_len(out, ix.data.len());
            out.extend_from_slice(&ix.data);
        }
    }
}

/// Bytes-based transaction whose fee payer may be changed until it is signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyTransaction {
    pub fee_payer: Option<Address>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<Instruction>,
    signatures: Vec<(Address, Signature)>,
}

impl LegacyTransaction {
    pub fn new(instructions: Vec<Instruction>, recent_blockhash: Hash) -> Self {
        Self {
            fee_payer: None,
            recent_blockhash,
            instructions,
            signatures: Vec::new(),
        }
    }

    pub fn with_fee_payer(mut self, fee_payer: Address) -> Self {
        self.set_fee_payer(fee_payer);
        self
    }

    /// Changing the fee payer changes the message, so prior signatures are dropped.
    pub fn set_fee_payer(&mut self, fee_payer: Address) {
        if self.fee_payer != Some(fee_payer) {
            self.signatures.clear();
        }
        self.fee_payer = Some(fee_payer);
    }

    pub fn compile_message(&self) -> Result<Message> {
        let payer = self.fee_payer.ok_or(TypesError::MissingFeePayer)?;
        Message::compile(&payer, &self.instructions, self.recent_blockhash)
    }

    pub fn message_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.compile_message()?.serialize())
    }

    pub fn add_signature(&mut self, signer: Address, signature: Signature) {
        self.signatures.retain(|(addr, _)| *addr != signer);
        self.signatures.push((signer, signature));
    }

    pub fn signature_of(&self, signer: &Address) -> Option<Signature> {
        self.signatures
            .iter()
            .find(|(addr, _)| addr == signer)
            .map(|(_, sig)| *sig)
    }
}

/// Pre-built v0 transaction. Its message is fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedTransaction {
    message: Message,
    signatures: Vec<Signature>,
}

impl VersionedTransaction {
    pub fn new(message: Message) -> Self {
        let slots = usize::from(message.header.num_required_signatures);
        Self {
            message,
            signatures: vec![Signature::default(); slots],
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_bytes(&self) -> Vec<u8> {
        self.message.serialize_v0()
    }

    /// Fill the slot belonging to `signer`. Returns false if it is not a required signer.
    pub fn add_signature(&mut self, signer: &Address, signature: Signature) -> bool {
        match self.message.signer_keys().iter().position(|k| k == signer) {
            Some(slot) => {
                self.signatures[slot] = signature;
                true
            }
            None => false,
        }
    }

    pub fn signature_of(&self, signer: &Address) -> Option<Signature> {
        let slot = self.message.signer_keys().iter().position(|k| k == signer)?;
        let sig = self.signatures[slot];
        (!sig.is_placeholder()).then_some(sig)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transaction {
    Legacy(LegacyTransaction),
    Versioned(VersionedTransaction),
}

impl From<LegacyTransaction> for Transaction {
    fn from(tx: LegacyTransaction) -> Self {
        Transaction::Legacy(tx)
    }
}

impl From<VersionedTransaction> for Transaction {
    fn from(tx: VersionedTransaction) -> Self {
        Transaction::Versioned(tx)
    }
}

impl Transaction {
    pub fn fee_payer(&self) -> Option<Address> {
        match self {
            Transaction::Legacy(tx) => tx.fee_payer,
            Transaction::Versioned(tx) => tx.message.fee_payer().copied(),
        }
    }

    pub fn message(&self) -> Result<Message> {
        match self {
            Transaction::Legacy(tx) => tx.compile_message(),
            Transaction::Versioned(tx) => Ok(tx.message.clone()),
        }
    }

    /// The exact bytes signers sign.
    pub fn message_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Transaction::Legacy(tx) => tx.message_bytes(),
            Transaction::Versioned(tx) => Ok(tx.message_bytes()),
        }
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        match self {
            Transaction::Legacy(tx) => tx.instructions.clone(),
            Transaction::Versioned(tx) => tx.message.decompile(),
        }
    }

    /// Required signers paired with their signature, placeholder if unsigned.
    pub fn signer_slots(&self) -> Result<Vec<(Address, Signature)>> {
        let message = self.message()?;
        Ok(message
            .signer_keys()
            .iter()
            .map(|key| {
                let sig = match self {
                    Transaction::Legacy(tx) => tx.signature_of(key),
                    Transaction::Versioned(tx) => tx.signature_of(key),
                };
                (*key, sig.unwrap_or_default())
            })
            .collect())
    }

    /// The fee payer's signature doubles as the transaction id.
    pub fn id(&self) -> Option<Signature> {
        let payer = self.fee_payer()?;
        match self {
            Transaction::Legacy(tx) => tx.signature_of(&payer),
            Transaction::Versioned(tx) => tx.signature_of(&payer),
        }
    }

    pub fn is_fully_signed(&self) -> Result<bool> {
        Ok(self
            .signer_slots()?
            .iter()
            .all(|(_, sig)| !sig.is_placeholder()))
    }

    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let slots = self.signer_slots()?;
        let message = self.message_bytes()?;
        let mut out = Vec::with_capacity(1 + slots.len() * Signature::LEN + message.len());
        encode_len(&mut out, slots.len());
        for (_, sig) in &slots {
            out.extend_from_slice(sig.as_bytes());
        }
        out.extend_from_slice(&message);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{memo, transfer};

    fn addr(n: u8) -> Address {
        Address::new([n; 32])
    }

    #[test]
    fn compact_len_encoding() {
        let mut out = Vec::new();
        encode_len(&mut out, 0x7f);
        encode_len(&mut out, 0x80);
        encode_len(&mut out, 0x3fff);
        assert_eq!(out, vec![0x7f, 0x80, 0x01, 0xff, 0x7f]);
    }

    #[test]
    fn transfer_message_layout() {
        let from = addr(1);
        let to = addr(2);
        let blockhash = Hash::new([9u8; 32]);
        let msg = Message::compile(&from, &[transfer(&from, &to, 5)], blockhash).unwrap();

        assert_eq!(
            msg.header,
            MessageHeader {
                num_required_signatures: 1,
                num_readonly_signed: 0,
                num_readonly_unsigned: 1,
            }
        );
        assert_eq!(msg.account_keys, vec![from, to, Address::new([0u8; 32])]);
        assert_eq!(msg.instructions[0].program_id_index, 2);
        assert_eq!(msg.instructions[0].accounts, vec![0, 1]);

        let bytes = msg.serialize();
        assert_eq!(&bytes[..4], &[1, 0, 1, 3]);
        assert_eq!(bytes.len(), 3 + 1 + 3 * 32 + 32 + 1 + 1 + 1 + 2 + 1 + 12);
    }

    #[test]
    fn fee_payer_is_first_even_if_listed_late() {
        let payer = addr(7);
        let other_signer = addr(3);
        let msg = Message::compile(&payer, &[memo(&other_signer, b"x")], Hash::default_zero())
            .unwrap();
        assert_eq!(msg.fee_payer(), Some(&payer));
        assert_eq!(msg.signer_keys(), &[payer, other_signer]);
        assert!(msg.is_writable(0));
        assert!(!msg.is_writable(1));
    }

    #[test]
    fn changing_legacy_fee_payer_drops_signatures() {
        let mut tx = LegacyTransaction::new(vec![memo(&addr(1), b"m")], Hash::default_zero())
            .with_fee_payer(addr(1));
        tx.add_signature(addr(1), Signature::new([4u8; 64]));
        tx.set_fee_payer(addr(2));
        assert_eq!(tx.signature_of(&addr(1)), None);
    }

    #[test]
    fn versioned_rejects_unknown_signer_slot() {
        let msg = Message::compile(&addr(1), &[memo(&addr(1), b"m")], Hash::default_zero())
            .unwrap();
        let mut tx = VersionedTransaction::new(msg);
        assert!(!tx.add_signature(&addr(2), Signature::new([1u8; 64])));
        assert!(tx.add_signature(&addr(1), Signature::new([1u8; 64])));
        let tx = Transaction::from(tx);
        assert!(tx.is_fully_signed().unwrap());
        assert_eq!(tx.message_bytes().unwrap()[0], VERSION_PREFIX);
    }

    #[test]
    fn decompile_restores_instruction_flags() {
        let from = addr(1);
        let to = addr(2);
        let ix = transfer(&from, &to, 99);
        let msg = Message::compile(&from, &[ix.clone()], Hash::default_zero()).unwrap();
        assert_eq!(msg.decompile(), vec![ix]);
    }

    impl Hash {
        fn default_zero() -> Self {
            Hash::new([0u8; 32])
        }
    }
}
