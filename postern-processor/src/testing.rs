//! Test doubles for matchers, mailets and listeners.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use postern_common::{AddressList, Mail, State};

use crate::{
    error::{MailetError, MatcherError},
    listener::{MailetEvent, MatcherEvent, ProcessorListener},
    plugin::{Mailet, Matcher},
};

/// An owned copy of a listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Matcher {
        processor: State,
        matcher: String,
        mail: String,
        matched: Option<AddressList>,
        failed: bool,
    },
    Mailet {
        processor: State,
        mailet: String,
        mail: String,
        state: State,
        failed: bool,
    },
    FellThrough {
        processor: State,
        mail: String,
    },
}

/// Listener keeping every event it receives.
#[derive(Debug, Default, Clone)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl RecordingListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    /// Names of the mails that fell through, in order.
    #[must_use]
    pub fn fell_through(&self) -> Vec<(State, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Recorded::FellThrough { processor, mail } => Some((processor.clone(), mail.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of times the named mailet ran.
    #[must_use]
    pub fn mailet_calls(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, Recorded::Mailet { mailet, .. } if mailet == name))
            .count()
    }
}

impl ProcessorListener for RecordingListener {
    fn after_matcher(&self, event: &MatcherEvent<'_>) {
        self.events.lock().push(Recorded::Matcher {
            processor: event.processor.clone(),
            matcher: event.matcher.to_owned(),
            mail: event.mail.to_owned(),
            matched: event.matched.cloned(),
            failed: event.error.is_some(),
        });
    }

    fn after_mailet(&self, event: &MailetEvent<'_>) {
        self.events.lock().push(Recorded::Mailet {
            processor: event.processor.clone(),
            mailet: event.mailet.to_owned(),
            mail: event.mail.to_owned(),
            state: event.state.clone(),
            failed: event.error.is_some(),
        });
    }

    fn fell_through(&self, processor: &State, mail: &Mail) {
        self.events.lock().push(Recorded::FellThrough {
            processor: processor.clone(),
            mail: mail.name().to_owned(),
        });
    }
}

/// Matcher that always fails.
#[derive(Debug, Default)]
pub struct FailingMatcher;

#[async_trait]
impl Matcher for FailingMatcher {
    fn name(&self) -> &str {
        "FailingMatcher"
    }

    async fn matched(&self, _mail: &Mail) -> Result<AddressList, MatcherError> {
        Err(MatcherError::Failed(String::from("matcher failure")))
    }
}

/// Matcher returning a fixed list, whatever the mail's recipients are.
#[derive(Debug)]
pub struct FixedMatcher(pub AddressList);

#[async_trait]
impl Matcher for FixedMatcher {
    fn name(&self) -> &str {
        "FixedMatcher"
    }

    async fn matched(&self, _mail: &Mail) -> Result<AddressList, MatcherError> {
        Ok(self.0.clone())
    }
}

/// Mailet that always fails, counting its calls.
#[derive(Debug, Default)]
pub struct FailingMailet {
    calls: AtomicUsize,
}

impl FailingMailet {
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Mailet for FailingMailet {
    fn name(&self) -> &str {
        "FailingMailet"
    }

    async fn service(&self, _mail: &mut Mail) -> Result<(), MailetError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        Err(MailetError::Failed(String::from("mailet failure")))
    }
}

/// Mailet that counts its calls and does nothing else.
#[derive(Debug, Default)]
pub struct CountingMailet {
    calls: AtomicUsize,
}

impl CountingMailet {
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Mailet for CountingMailet {
    fn name(&self) -> &str {
        "CountingMailet"
    }

    async fn service(&self, _mail: &mut Mail) -> Result<(), MailetError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Mailet that clears the recipient list.
#[derive(Debug, Default)]
pub struct ClearRecipients;

#[async_trait]
impl Mailet for ClearRecipients {
    fn name(&self) -> &str {
        "ClearRecipients"
    }

    async fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        mail.recipients_mut().clear();
        Ok(())
    }
}

/// Mailet that panics on every call.
#[derive(Debug, Default)]
pub struct PanickingMailet;

#[async_trait]
impl Mailet for PanickingMailet {
    fn name(&self) -> &str {
        "PanickingMailet"
    }

    async fn service(&self, _mail: &mut Mail) -> Result<(), MailetError> {
        panic!("mailet bug")
    }
}

/// Mailet that takes `delay` to complete.
#[derive(Debug)]
pub struct SlowMailet {
    pub delay: Duration,
    started: AtomicUsize,
}

impl SlowMailet {
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn started(&self) -> usize {
        self.started.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Mailet for SlowMailet {
    fn name(&self) -> &str {
        "SlowMailet"
    }

    async fn service(&self, _mail: &mut Mail) -> Result<(), MailetError> {
        self.started.fetch_add(1, Ordering::AcqRel);
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
