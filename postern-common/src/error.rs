//! Error types for the postern-common crate.

use thiserror::Error;

use crate::Address;

/// Errors raised while parsing or validating mail addresses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Address is empty")]
    Empty,

    #[error("Address {0:?} has no domain separator")]
    MissingAt(String),

    #[error("Address has an empty local part")]
    EmptyLocalPart,

    #[error("Invalid local part: {0:?}")]
    InvalidLocalPart(String),

    #[error("Invalid domain: {0:?}")]
    InvalidDomain(String),

    /// A recipient list holds the same address twice.
    #[error("Recipient {0} appears more than once")]
    Duplicate(Address),
}
