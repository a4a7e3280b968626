pub mod address;
pub mod attribute;
pub mod error;
pub mod logging;
pub mod mail;
pub mod state;

pub use address::{Address, AddressList};
pub use attribute::{AttributeName, AttributeValue};
pub use mail::{Diagnostic, Mail, MailBuilder};
pub use state::State;
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
