//! The two halves of running a step: splitting a mail by what the matcher
//! selected, and running the mailet on the matched part.

mod action;
mod split;

use std::sync::Arc;

use postern_common::{AttributeName, Mail, State};

pub(crate) use action::service;
pub(crate) use split::split;

use crate::{interrupt::Interrupt, listener::ProcessorListener};

/// What a step runs against: the owning processor and its observers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepContext<'a> {
    pub state: &'a State,
    pub listeners: &'a [Arc<dyn ProcessorListener>],
    pub interrupt: &'a Interrupt,
}

/// Records a contained plugin failure on the mail: the message, the error
/// attribute and the in-memory cause.
fn record_failure<E>(mail: &mut Mail, attribute: AttributeName, plugin: &str, error: &Arc<E>)
where
    E: std::error::Error + Send + Sync + 'static,
{
    mail.set_error_message(format!("Exception calling {plugin}: {error}"));
    mail.set_attribute(attribute, error.to_string());
    mail.set_diagnostic(Arc::clone(error) as postern_common::Diagnostic);
}
