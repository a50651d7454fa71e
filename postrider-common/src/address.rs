use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing an address from its textual form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The address did not contain exactly one `@` separator.
    #[error("Address must contain exactly one '@': {0}")]
    MissingSeparator(String),

    /// The local part (before the `@`) was empty.
    #[error("Address has an empty local part: {0}")]
    EmptyLocalPart(String),

    /// The domain (after the `@`) was empty.
    #[error("Address has an empty domain: {0}")]
    EmptyDomain(String),
}

/// A mail address as `local_part@domain`.
///
/// The core routes on addresses but never interprets them beyond the
/// local-part/domain split; full RFC 5321 parsing belongs to the protocol
/// handlers upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub local_part: String,
    pub domain: String,
}

impl Address {
    /// Construct an address from its two halves.
    #[must_use]
    pub fn new(local_part: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local_part: local_part.into(),
            domain: domain.into(),
        }
    }

    /// Parse a `local@domain` string.
    ///
    /// # Errors
    /// If the separator is missing or either half is empty.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let (local_part, domain) = raw
            .split_once('@')
            .ok_or_else(|| AddressError::MissingSeparator(raw.to_string()))?;

        if local_part.is_empty() {
            return Err(AddressError::EmptyLocalPart(raw.to_string()));
        }
        if domain.is_empty() || domain.contains('@') {
            return Err(AddressError::EmptyDomain(raw.to_string()));
        }

        Ok(Self::new(local_part, domain))
    }

    /// Case-insensitive domain comparison, per DNS semantics.
    #[must_use]
    pub fn on_domain(&self, domain: &str) -> bool {
        self.domain.eq_ignore_ascii_case(domain)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
