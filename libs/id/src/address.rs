//! Hierarchical store addresses.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::IdError;

/// Suffix appended to an address to form its status key.
pub const STATUS_SUFFIX: &str = "__status";

/// A dotted, hierarchical key in the cluster store.
///
/// Addresses are validated on construction: non-empty, no empty segments and
/// no whitespace. They order lexically so address sets iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parses and validates an address.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(IdError::InvalidCharacter(s.to_string()));
        }
        if s.split('.').any(str::is_empty) {
            return Err(IdError::EmptySegment(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the address joined with a child segment.
    pub fn child(&self, segment: &str) -> Result<Self, IdError> {
        Self::parse(&format!("{}.{}", self.0, segment))
    }

    /// Returns the status key for this address.
    #[must_use]
    pub fn status_address(&self) -> Self {
        Self(format!("{}.{}", self.0, STATUS_SUFFIX))
    }

    /// Returns true if this address is a status key.
    pub fn is_status(&self) -> bool {
        self.0
            .rsplit_once('.')
            .is_some_and(|(_, last)| last == STATUS_SUFFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Address {
    fn borrow(&self) -> &str {
        &self.0
    }
}
