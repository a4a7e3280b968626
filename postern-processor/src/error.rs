//! Typed errors for the processing engine.
//!
//! Plugin failures ([`MatcherError`], [`MailetError`]) are contained by the
//! step's error policy. Those a policy lets through become a
//! [`ProcessingError`], which aborts the traversal and is handled by the
//! spooler. [`ConfigurationError`] is raised while building the pipeline,
//! before any mail is processed.

use postern_common::{State, error::AddressError};
use postern_spool::{QueueError, RepositoryError};
use thiserror::Error;

/// Failure of a matcher while evaluating a mail.
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure of a mailet while servicing a mail.
#[derive(Debug, Error)]
pub enum MailetError {
    #[error("{0}")]
    Failed(String),

    /// The worker was asked to stop while the mailet was running.
    #[error("Interrupted while servicing the mail")]
    Interrupted,

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A failure that aborts the traversal of one mail.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Matcher {matcher} in processor {processor} failed for mail {mail}: {source}")]
    Matcher {
        processor: State,
        matcher: String,
        mail: String,
        #[source]
        source: MatcherError,
    },

    #[error("Mailet {mailet} in processor {processor} failed for mail {mail}: {source}")]
    Mailet {
        processor: State,
        mailet: String,
        mail: String,
        #[source]
        source: MailetError,
    },

    /// A mail was routed to a state with no processor.
    #[error("No processor is configured for state {state} (mail {mail})")]
    MisconfiguredPipeline { state: State, mail: String },

    /// A mail kept being rerouted between processors.
    #[error("Mail {mail} was rerouted {hops} times, last to {state}; the pipeline likely loops")]
    TooManyHops {
        mail: String,
        state: State,
        hops: usize,
    },

    /// Processing stopped at a step boundary because the spooler is shutting
    /// down. The mail was not fully processed.
    #[error("Processing of mail {mail} in processor {processor} was interrupted")]
    Interrupted { processor: State, mail: String },

    /// A matcher or mailet panicked while the mail was being routed.
    #[error("Processing of mail {mail} panicked: {message}")]
    Panicked { mail: String, message: String },

    /// A mailet error was ignored, but left the recipients unusable.
    #[error("Mail {mail} has invalid recipients after an ignored mailet error: {source}")]
    InvalidRecipients {
        mail: String,
        #[source]
        source: AddressError,
    },
}

impl ProcessingError {
    /// Returns `true` if processing was stopped by the spooler shutting down.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Interrupted { .. }
                | Self::Mailet {
                    source: MailetError::Interrupted,
                    ..
                }
        )
    }

    /// Returns `true` if the error points at the pipeline rather than the mail.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MisconfiguredPipeline { .. } | Self::TooManyHops { .. }
        )
    }
}

/// Errors raised while assembling processors from configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Processor state of {0} is reserved for internal use, choose a different one")]
    ReservedState(State),

    #[error("Processor {0} is defined more than once")]
    DuplicateProcessor(State),

    #[error("A processor named {0} is required")]
    MissingProcessor(State),

    /// An error policy or a mailet routes to a state nothing handles.
    #[error("Processor {processor} routes mail to {target}, which has no processor")]
    UnknownState { processor: State, target: State },

    #[error("Unknown matcher {0}")]
    UnknownMatcher(String),

    #[error("Unknown mailet {0}")]
    UnknownMailet(String),

    #[error("Please configure only match or notmatch for mailet {mailet} in processor {processor}")]
    MatchAndNotMatch { processor: State, mailet: String },

    #[error("Composite matcher {name} is already defined in processor {processor}")]
    DuplicateCompositeMatcher { processor: State, name: String },

    #[error("Composite matcher in processor {0} needs either match or notmatch")]
    EmptyCompositeMatcher(State),

    #[error("{plugin} requires the {parameter} parameter")]
    MissingParameter {
        plugin: String,
        parameter: &'static str,
    },

    #[error("Invalid value for {parameter} of {plugin}: {reason}")]
    InvalidParameter {
        plugin: String,
        parameter: String,
        reason: String,
    },

    /// A plugin needs something the container was not given.
    #[error("{plugin} needs a {resource}, but none is available")]
    Unavailable {
        plugin: String,
        resource: &'static str,
    },

    #[error("The maximum hop count must be at least 1")]
    InvalidHopLimit,

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Errors surfaced by the spooler itself.
#[derive(Debug, Error)]
pub enum SpoolerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}
