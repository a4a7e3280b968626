//! A matcher paired with a mailet, plus what to do when either fails.

use std::{fmt, sync::Arc};

use postern_common::State;
use serde::{Deserialize, Serialize};

use crate::plugin::{Mailet, Matcher};

/// What happens to a mail when the matcher of a step fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OnMatchError {
    /// Treat it as matching no recipient.
    NoMatch,
    /// Treat it as matching every recipient.
    MatchAll,
    /// Abort processing of the mail.
    Propagate,
    /// Send the mail to the given processor, recording the error on it.
    Reroute(State),
}

impl Default for OnMatchError {
    fn default() -> Self {
        Self::Reroute(State::ERROR)
    }
}

impl From<&str> for OnMatchError {
    fn from(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("nomatch") {
            Self::NoMatch
        } else if value.eq_ignore_ascii_case("matchall") {
            Self::MatchAll
        } else if value.eq_ignore_ascii_case("propagate") {
            Self::Propagate
        } else {
            Self::Reroute(State::from(value))
        }
    }
}

impl From<String> for OnMatchError {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<OnMatchError> for String {
    fn from(value: OnMatchError) -> Self {
        value.to_string()
    }
}

impl fmt::Display for OnMatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatch => f.write_str("nomatch"),
            Self::MatchAll => f.write_str("matchall"),
            Self::Propagate => f.write_str("propagate"),
            Self::Reroute(state) => fmt::Display::fmt(state, f),
        }
    }
}

/// What happens to a mail when the mailet of a step fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OnMailetError {
    /// Log and continue with the next step.
    Ignore,
    /// Abort processing of the mail.
    Propagate,
    /// Send the mail to the given processor, recording the error on it.
    Reroute(State),
}

impl Default for OnMailetError {
    fn default() -> Self {
        Self::Reroute(State::ERROR)
    }
}

impl From<&str> for OnMailetError {
    fn from(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("ignore") {
            Self::Ignore
        } else if value.eq_ignore_ascii_case("propagate") {
            Self::Propagate
        } else {
            Self::Reroute(State::from(value))
        }
    }
}

impl From<String> for OnMailetError {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<OnMailetError> for String {
    fn from(value: OnMailetError) -> Self {
        value.to_string()
    }
}

impl fmt::Display for OnMailetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => f.write_str("ignore"),
            Self::Propagate => f.write_str("propagate"),
            Self::Reroute(state) => fmt::Display::fmt(state, f),
        }
    }
}

/// One step of a processor. Steps are immutable once the pipeline is built.
#[derive(Debug, Clone)]
pub struct PipelineStep {
    matcher: Arc<dyn Matcher>,
    mailet: Arc<dyn Mailet>,
    on_match_error: OnMatchError,
    on_mailet_error: OnMailetError,
}

impl PipelineStep {
    pub fn new(matcher: Arc<dyn Matcher>, mailet: Arc<dyn Mailet>) -> Self {
        Self {
            matcher,
            mailet,
            on_match_error: OnMatchError::default(),
            on_mailet_error: OnMailetError::default(),
        }
    }

    #[must_use]
    pub fn on_match_error(mut self, policy: OnMatchError) -> Self {
        self.on_match_error = policy;
        self
    }

    #[must_use]
    pub fn on_mailet_error(mut self, policy: OnMailetError) -> Self {
        self.on_mailet_error = policy;
        self
    }

    pub fn matcher(&self) -> &dyn Matcher {
        self.matcher.as_ref()
    }

    pub fn mailet(&self) -> &dyn Mailet {
        self.mailet.as_ref()
    }

    pub const fn match_error_policy(&self) -> &OnMatchError {
        &self.on_match_error
    }

    pub const fn mailet_error_policy(&self) -> &OnMailetError {
        &self.on_mailet_error
    }

    /// Every state this step can send mail to, other than its own processor.
    pub fn targets(&self) -> Vec<State> {
        let mut targets = self.mailet.next_states();

        if let OnMatchError::Reroute(state) = &self.on_match_error {
            targets.push(state.clone());
        }
        if let OnMailetError::Reroute(state) = &self.on_mailet_error {
            targets.push(state.clone());
        }

        targets.retain(|state| !state.is_ghost());
        targets
    }
}
