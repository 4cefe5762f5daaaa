//! On-chain addresses and position identities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Mint address of wrapped native SOL.
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";

/// Length in bytes of a decoded address.
const ADDRESS_LEN: usize = 32;

/// Base58-encoded 32-byte address (wallet, mint or token account).
///
/// Construction validates the encoding, so every `Address` in the system is
/// known to be well-formed before it reaches a network call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and validate a base58 address.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidAddress("empty address".to_string()));
        }

        let bytes = bs58::decode(trimmed)
            .into_vec()
            .map_err(|e| CoreError::InvalidAddress(format!("{trimmed}: {e}")))?;

        if bytes.len() != ADDRESS_LEN {
            return Err(CoreError::InvalidAddress(format!(
                "{trimmed}: decoded to {} bytes, expected {ADDRESS_LEN}",
                bytes.len()
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// The wrapped native SOL mint.
    #[must_use]
    pub fn native_mint() -> Self {
        Self(NATIVE_MINT.to_string())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_native(&self) -> bool {
        self.0 == NATIVE_MINT
    }

    /// Shortened form for log lines (`AbCd..WxYz`).
    #[must_use]
    pub fn short(&self) -> String {
        if self.0.len() <= 10 {
            return self.0.clone();
        }
        format!("{}..{}", &self.0[..4], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

/// Identifier of the user that owns a position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a monitored position: `(owner, asset)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub owner: OwnerId,
    pub asset: Address,
}

impl PositionKey {
    #[must_use]
    pub fn new(owner: OwnerId, asset: Address) -> Self {
        Self { owner, asset }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.asset.short())
    }
}
