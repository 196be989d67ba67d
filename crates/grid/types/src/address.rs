//! Fixed-size byte identifiers rendered as base58.
//!
//! `Address` is an ed25519 public key or a program-derived address,
//! `Hash` is a 32-byte block hash, and `Signature` is a detached ed25519
//! signature. All three serialize as base58 strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypesError;

macro_rules! base58_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_bytes(self) -> [u8; $len] {
                self.0
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, TypesError> {
                let array: [u8; $len] =
                    bytes.try_into().map_err(|_| TypesError::InvalidLength {
                        expected: $len,
                        actual: bytes.len(),
                    })?;
                Ok(Self(array))
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&bs58::encode(&self.0).into_string())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = bs58::decode(s)
                    .into_vec()
                    .map_err(|e| TypesError::InvalidBase58(e.to_string()))?;
                Self::from_slice(&bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

base58_bytes!(
    /// A 32-byte account address (public key or program-derived address).
    Address,
    32
);

base58_bytes!(
    /// A 32-byte block hash used as a transaction's recency reference.
    Hash,
    32
);

base58_bytes!(
    /// A 64-byte detached ed25519 signature.
    Signature,
    64
);

impl Address {
    /// Short form for log lines: first four base58 characters.
    pub fn short(&self) -> String {
        self.to_string().chars().take(4).collect()
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl Signature {
    pub fn is_placeholder(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_program_renders_as_ones() {
        let system = Address::new([0u8; 32]);
        assert_eq!(system.to_string(), "11111111111111111111111111111111");
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let err = "3yZe7d".parse::<Address>().unwrap_err();
        assert!(matches!(err, TypesError::InvalidLength { expected: 32, .. }));
    }

    #[test]
    fn serde_uses_base58_strings() {
        let addr = Address::new([7u8; 32]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn unsigned_signature_is_placeholder() {
        assert!(Signature::default().is_placeholder());
        assert!(!Signature::new([1u8; 64]).is_placeholder());
    }
}
