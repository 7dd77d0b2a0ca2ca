use std::{
    fmt::{self, Debug, Display},
    str::FromStr,
};

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Identity of an account or a deployed contract.
///
/// Externally owned accounts use the 32 bytes of their ed25519 verifying key.
/// Contract accounts are derived from their deployer and the deployer's nonce
/// at deployment time, see [`Address::derive`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 32]);

impl Address {
    /// The null identity. Never a valid owner or feed.
    pub const ZERO: Address = Address([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Deterministic address of the contract `self` deploys with `nonce`.
    pub fn derive(&self, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"fundme/contract");
        hasher.update(self.0);
        hasher.update(nonce.to_le_bytes());
        Self(hasher.finalize().into())
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "address(0x{})", hex::encode(&self.0[..6]))
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AddressParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("address must be 32 bytes, got {0}")]
    Length(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressParseError::Length(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parses_back() {
        let addr = Address::from_bytes([7u8; 32]);
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
        assert!(addr.to_string().starts_with("0x0707"));
    }

    #[test]
    fn rejects_short_input() {
        assert_eq!(
            "0xdead".parse::<Address>().unwrap_err(),
            AddressParseError::Length(2)
        );
    }

    #[test]
    fn derived_addresses_depend_on_nonce() {
        let deployer = Address::from_bytes([1u8; 32]);
        assert_ne!(deployer.derive(0), deployer.derive(1));
        assert_eq!(deployer.derive(3), deployer.derive(3));
        assert!(!deployer.derive(0).is_zero());
    }
}
