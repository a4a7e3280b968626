use std::{
    fmt,
    sync::Arc,
    time::SystemTime,
};

use ahash::AHashMap;
use mailparse::MailHeaderMap;
use serde::{Deserialize, Serialize};

use crate::{Address, AddressList, AttributeName, AttributeValue, State, error::AddressError};

/// Error cause attached to a mail while it is being processed. It lives only in
/// memory and is cleared whenever the mail crosses a queue or repository.
pub type Diagnostic = Arc<dyn std::error::Error + Send + Sync + 'static>;

const MAX_NAME_LENGTH: usize = 76;

fn empty_message() -> Arc<[u8]> {
    Arc::from(Vec::new())
}

/// The unit of work routed through the processors.
///
/// The message payload is shared between a mail and the clones split off it;
/// it is released when the last mail referencing it is dropped. Replacing the
/// payload of one mail never affects the others.
///
/// The payload is not part of the serialized form. Storage backends persist it
/// separately, next to the envelope.
#[derive(Clone, Serialize, Deserialize)]
pub struct Mail {
    name: String,
    sender: Option<Address>,
    recipients: AddressList,
    #[serde(skip, default = "empty_message")]
    message: Arc<[u8]>,
    #[serde(default)]
    state: State,
    #[serde(default)]
    attributes: AHashMap<AttributeName, AttributeValue>,
    error_message: Option<String>,
    last_updated: SystemTime,
    #[serde(skip)]
    diagnostic: Option<Diagnostic>,
}

impl fmt::Debug for Mail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mail")
            .field("name", &self.name)
            .field("sender", &self.sender)
            .field("recipients", &self.recipients)
            .field("message", &format_args!("<{} bytes>", self.message.len()))
            .field("state", &self.state)
            .field("attributes", &self.attributes)
            .field("error_message", &self.error_message)
            .field("diagnostic", &self.diagnostic.as_ref().map(ToString::to_string))
            .finish_non_exhaustive()
    }
}

impl Mail {
    pub fn builder() -> MailBuilder {
        MailBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sender(&self) -> Option<&Address> {
        self.sender.as_ref()
    }

    pub fn set_sender(&mut self, sender: Option<Address>) {
        self.sender = sender;
    }

    pub const fn recipients(&self) -> &AddressList {
        &self.recipients
    }

    pub const fn recipients_mut(&mut self) -> &mut AddressList {
        &mut self.recipients
    }

    pub fn set_recipients(&mut self, recipients: AddressList) {
        self.recipients = recipients;
    }

    /// Checks the recipients are all valid and appear only once.
    pub fn verify_recipients(&self) -> Result<(), AddressError> {
        if let Some(duplicate) = self.recipients.first_duplicate() {
            return Err(AddressError::Duplicate(duplicate.clone()));
        }

        self.recipients.iter().try_for_each(Address::validate)
    }

    pub const fn message(&self) -> &Arc<[u8]> {
        &self.message
    }

    pub fn set_message(&mut self, message: impl Into<Arc<[u8]>>) {
        self.message = message.into();
    }

    /// Value of the first header called `name` in the message, if any.
    pub fn header(&self, name: &str) -> Option<String> {
        mailparse::parse_headers(&self.message)
            .ok()
            .and_then(|(headers, _)| headers.get_first_value(name))
    }

    /// Adds a header to the top of the message. The payload is copied, so
    /// other mails sharing it are unaffected.
    pub fn prepend_header(&mut self, name: &str, value: &str) {
        let mut message = Vec::with_capacity(name.len() + value.len() + 4 + self.message.len());
        message.extend_from_slice(name.as_bytes());
        message.extend_from_slice(b": ");
        message.extend_from_slice(value.as_bytes());
        message.extend_from_slice(b"\r\n");
        message.extend_from_slice(&self.message);

        self.message = Arc::from(message);
    }

    pub const fn state(&self) -> &State {
        &self.state
    }

    pub fn set_state(&mut self, state: State) {
        self.state = state;
        self.last_updated = SystemTime::now();
    }

    pub fn is_ghost(&self) -> bool {
        self.state.is_ghost()
    }

    pub const fn last_updated(&self) -> SystemTime {
        self.last_updated
    }

    pub fn attribute(&self, name: &AttributeName) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn set_attribute(
        &mut self,
        name: impl Into<AttributeName>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.attributes.insert(name.into(), value.into())
    }

    pub fn remove_attribute(&mut self, name: &AttributeName) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&AttributeName, &AttributeValue)> {
        self.attributes.iter()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    pub const fn diagnostic(&self) -> Option<&Diagnostic> {
        self.diagnostic.as_ref()
    }

    pub fn set_diagnostic(&mut self, cause: Diagnostic) {
        self.diagnostic = Some(cause);
    }

    /// Drops the in-memory error cause. Must be called before the mail is
    /// handed to a queue or repository.
    pub fn clear_diagnostic(&mut self) -> Option<Diagnostic> {
        self.diagnostic.take()
    }

    /// Consecutive spooler failures recorded on this mail.
    pub fn failure_count(&self) -> u32 {
        self.attribute(&AttributeName::FAILURE_COUNT)
            .and_then(AttributeValue::as_int)
            .and_then(|count| u32::try_from(count).ok())
            .unwrap_or_default()
    }

    pub fn set_failure_count(&mut self, count: u32) {
        self.set_attribute(AttributeName::FAILURE_COUNT, i64::from(count));
    }

    pub fn mark_matched(&mut self) {
        self.set_attribute(AttributeName::MATCHED, true);
    }

    pub fn is_matched(&self) -> bool {
        self.attribute(&AttributeName::MATCHED)
            .and_then(AttributeValue::as_bool)
            .unwrap_or(false)
    }

    /// Clears the matched flag, returning whether it was set.
    pub fn take_matched(&mut self) -> bool {
        self.remove_attribute(&AttributeName::MATCHED)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    /// Moves `recipients` out of this mail into a new mail that otherwise
    /// carries the same state, attributes and payload.
    ///
    /// Addresses in `recipients` that are not recipients of this mail are
    /// ignored, so the two mails always hold disjoint recipient lists whose
    /// union is the original list.
    pub fn split_off(&mut self, recipients: &AddressList) -> Self {
        let (moved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.recipients.0)
            .into_iter()
            .partition(|address| recipients.contains(address));

        self.recipients = AddressList(kept);

        Self {
            name: derive_name(&self.name),
            sender: self.sender.clone(),
            recipients: AddressList(moved),
            message: Arc::clone(&self.message),
            state: self.state.clone(),
            attributes: self.attributes.clone(),
            error_message: self.error_message.clone(),
            last_updated: SystemTime::now(),
            diagnostic: self.diagnostic.clone(),
        }
    }

    /// Consumes the mail, releasing its hold on the payload.
    pub fn dispose(self) {
        tracing::trace!(mail = %self.name, state = %self.state, "Disposing mail");
    }
}

/// Name for a mail split off `base`. Long chains of splits are kept bounded by
/// truncating the base name.
fn derive_name(base: &str) -> String {
    let suffix = format!("-!{}", rand::random::<u32>());
    let keep = MAX_NAME_LENGTH.saturating_sub(suffix.len());

    let mut end = base.len().min(keep);
    while !base.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}{suffix}", &base[..end])
}

#[derive(Debug, Default)]
pub struct MailBuilder {
    name: Option<String>,
    sender: Option<Address>,
    recipients: AddressList,
    message: Option<Arc<[u8]>>,
    state: Option<State>,
    attributes: AHashMap<AttributeName, AttributeValue>,
}

impl MailBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    #[must_use]
    pub fn recipient(mut self, recipient: Address) -> Self {
        self.recipients.push(recipient);
        self
    }

    #[must_use]
    pub fn recipients(mut self, recipients: AddressList) -> Self {
        self.recipients = recipients;
        self
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<Arc<[u8]>>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn attribute(mut self, name: impl Into<AttributeName>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Mails built without a name get a unique generated one.
    pub fn build(self) -> Mail {
        Mail {
            name: self
                .name
                .unwrap_or_else(|| format!("Mail{}", ulid::Ulid::new())),
            sender: self.sender,
            recipients: self.recipients,
            message: self.message.unwrap_or_else(empty_message),
            state: self.state.unwrap_or_default(),
            attributes: self.attributes,
            error_message: None,
            last_updated: SystemTime::now(),
            diagnostic: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn mail(recipients: &str) -> Mail {
        Mail::builder()
            .name("test-mail")
            .recipients(recipients.parse().expect("valid recipients"))
            .message(b"Subject: hello\r\n\r\nbody".to_vec())
            .attribute("custom", 7_i64)
            .build()
    }

    #[test]
    fn split_keeps_recipients_disjoint() {
        let mut original = mail("a@x.org, b@x.org, c@x.org");
        let clone = original.split_off(&"c@x.org, a@x.org, z@x.org".parse().expect("valid"));

        assert_eq!(original.recipients().to_string(), "b@x.org");
        assert_eq!(clone.recipients().to_string(), "a@x.org, c@x.org");
        assert!(original.recipients().is_disjoint(clone.recipients()));
        assert_ne!(original.name(), clone.name());
        assert!(clone.name().starts_with("test-mail-!"));
        assert_eq!(clone.attribute(&"custom".into()), Some(&AttributeValue::Int(7)));
    }

    #[test]
    fn split_shares_payload_until_modified() {
        let mut original = mail("a@x.org, b@x.org");
        let mut clone = original.split_off(&"b@x.org".parse().expect("valid"));

        assert!(Arc::ptr_eq(original.message(), clone.message()));

        clone.prepend_header("X-Seen", "yes");
        assert!(!Arc::ptr_eq(original.message(), clone.message()));
        assert_eq!(clone.header("X-Seen").as_deref(), Some("yes"));
        assert_eq!(original.header("X-Seen"), None);
        assert_eq!(original.header("Subject").as_deref(), Some("hello"));

        drop(clone);
        assert_eq!(Arc::strong_count(original.message()), 1);
    }

    #[test]
    fn derived_names_stay_bounded() {
        let long = "é".repeat(100);
        let derived = derive_name(&long);
        assert!(derived.len() <= MAX_NAME_LENGTH);
        assert!(derived.contains("-!"));
    }

    #[test]
    fn failure_count_and_matched_flag() {
        let mut mail = mail("a@x.org");
        assert_eq!(mail.failure_count(), 0);
        mail.set_failure_count(3);
        assert_eq!(mail.failure_count(), 3);

        assert!(!mail.take_matched());
        mail.mark_matched();
        assert!(mail.is_matched());
        assert!(mail.take_matched());
        assert!(!mail.is_matched());
    }

    #[test]
    fn verify_recipients_rejects_duplicates() {
        let mut mail = mail("a@x.org, b@x.org");
        assert!(mail.verify_recipients().is_ok());

        mail.recipients_mut().push("a@x.org".parse().expect("valid"));
        assert!(matches!(
            mail.verify_recipients(),
            Err(AddressError::Duplicate(_))
        ));
    }

    #[test]
    fn serialization_skips_payload_and_diagnostic() {
        let mut mail = mail("a@x.org");
        mail.set_state(State::TRANSPORT);
        mail.set_diagnostic(Arc::new(std::io::Error::other("boom")));

        let bytes = bincode::serde::encode_to_vec(&mail, bincode::config::standard())
            .expect("encodes");
        let (decoded, _): (Mail, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .expect("decodes");

        assert_eq!(decoded.name(), "test-mail");
        assert_eq!(decoded.state(), &State::TRANSPORT);
        assert!(decoded.message().is_empty());
        assert!(decoded.diagnostic().is_none());
        assert_eq!(decoded.recipients(), mail.recipients());
    }
}
