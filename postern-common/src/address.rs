use std::{
    fmt::{self, Debug, Display},
    ops::{Deref, DerefMut},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// A single mailbox, `local_part@domain`. Domains are stored lower-cased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    local_part: String,
    domain: String,
}

impl Address {
    /// Builds an address from its parts, validating both.
    pub fn new(local_part: &str, domain: &str) -> Result<Self, AddressError> {
        if local_part.is_empty() {
            return Err(AddressError::EmptyLocalPart);
        }

        if local_part.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(AddressError::InvalidLocalPart(local_part.to_owned()));
        }

        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        let valid_domain = !domain.is_empty()
            && domain.split('.').all(|label| {
                !label.is_empty()
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            });

        // Address literals such as `[192.0.2.1]` are accepted as-is.
        let literal = domain.starts_with('[') && domain.ends_with(']') && domain.len() > 2;

        if !valid_domain && !literal {
            return Err(AddressError::InvalidDomain(domain));
        }

        Ok(Self {
            local_part: local_part.to_owned(),
            domain,
        })
    }

    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Re-checks an address that may have been deserialized from an untrusted source.
    pub fn validate(&self) -> Result<(), AddressError> {
        Self::new(&self.local_part, &self.domain).map(|_| ())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('<').trim_end_matches('>');
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        let (local, domain) = trimmed
            .rsplit_once('@')
            .ok_or_else(|| AddressError::MissingAt(trimmed.to_owned()))?;

        Self::new(local, domain)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

/// Ordered recipient list. Order is kept so that splits are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressList(pub Vec<Address>);

impl AddressList {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// True when both lists hold the same addresses, regardless of order or
    /// repetition.
    pub fn same_members(&self, other: &Self) -> bool {
        self.iter().all(|a| other.contains(a)) && other.iter().all(|a| self.contains(a))
    }

    pub fn is_disjoint(&self, other: &Self) -> bool {
        !self.iter().any(|a| other.contains(a))
    }

    /// Removes every address contained in `other`, returning how many were removed.
    pub fn remove_all(&mut self, other: &Self) -> usize {
        let before = self.len();
        self.retain(|a| !other.contains(a));
        before - self.len()
    }

    /// Returns the first address that appears more than once.
    pub fn first_duplicate(&self) -> Option<&Address> {
        self.iter()
            .enumerate()
            .find(|(i, a)| self[..*i].contains(a))
            .map(|(_, a)| a)
    }
}

impl Display for AddressList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, addr) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            Display::fmt(addr, f)?;
        }
        Ok(())
    }
}

impl From<Vec<Address>> for AddressList {
    fn from(value: Vec<Address>) -> Self {
        Self(value)
    }
}

impl FromIterator<Address> for AddressList {
    fn from_iter<T: IntoIterator<Item = Address>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for AddressList {
    type Item = Address;
    type IntoIter = std::vec::IntoIter<Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a AddressList {
    type Item = &'a Address;
    type IntoIter = std::slice::Iter<'a, Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromStr for AddressList {
    type Err = AddressError;

    /// Parses a comma separated list, as found in matcher conditions.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Address::from_str)
            .collect()
    }
}

impl Deref for AddressList {
    type Target = Vec<Address>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for AddressList {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
