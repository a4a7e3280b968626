//! A named processor: the ordered steps applied to mails in one state.

use std::sync::Arc;

use postern_common::{Mail, State, processing};

use crate::{
    error::{ConfigurationError, ProcessingError},
    executor::{self, StepContext},
    interrupt::Interrupt,
    listener::ProcessorListener,
    step::PipelineStep,
};

/// What became of a mail handed to [`StateProcessor::service`].
#[derive(Debug, Default)]
pub struct Traversal {
    /// Mails (the original and any clones) that left for another processor.
    pub rerouted: Vec<Mail>,
    /// Mails that were ghosted and released.
    pub disposed: usize,
    /// Mails that reached the end of the processor without being routed.
    pub fell_through: usize,
}

/// Applies its steps, in order, to mails whose state is the processor's state.
#[derive(Debug)]
pub struct StateProcessor {
    state: State,
    steps: Vec<PipelineStep>,
    listeners: Vec<Arc<dyn ProcessorListener>>,
}

impl StateProcessor {
    /// # Errors
    /// If `state` is [`State::GHOST`], which no processor may claim
    pub fn new(state: State, steps: Vec<PipelineStep>) -> Result<Self, ConfigurationError> {
        if state.is_ghost() {
            return Err(ConfigurationError::ReservedState(state));
        }

        Ok(Self {
            state,
            steps,
            listeners: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ProcessorListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub(crate) fn add_listener(&mut self, listener: Arc<dyn ProcessorListener>) {
        self.listeners.push(listener);
    }

    pub const fn state(&self) -> &State {
        &self.state
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Runs `mail` through every step.
    ///
    /// After each step, mails still in this processor's state move on to the
    /// next step; ghosted mails are disposed; the rest are returned in
    /// [`Traversal::rerouted`] for the dispatcher to hand on. Mails left over
    /// after the last step are ghosted, with a warning unless this is the error
    /// processor.
    ///
    /// Once `interrupt` fires, the traversal stops at the next step boundary
    /// rather than letting mails run on or fall through.
    ///
    /// # Errors
    /// - If a step's policy propagates a failure. Processing of every mail in
    ///   this traversal stops, and mails already split off are dropped.
    /// - If the traversal is interrupted with mails still in this processor
    pub async fn service(
        &self,
        mail: Mail,
        interrupt: &Interrupt,
    ) -> Result<Traversal, ProcessingError> {
        let ctx = StepContext {
            state: &self.state,
            listeners: &self.listeners,
            interrupt,
        };

        let mut traversal = Traversal::default();
        let mut in_flight = vec![mail];

        for step in &self.steps {
            if in_flight.is_empty() {
                break;
            }
            self.check_interrupt(&in_flight, interrupt)?;

            let mut after_split = Vec::with_capacity(in_flight.len());
            for mail in in_flight.drain(..) {
                after_split.extend(executor::split(&ctx, step, mail).await?);
            }

            for mail in &mut after_split {
                if mail.take_matched() {
                    executor::service(&ctx, step, mail).await?;
                }
            }

            for mail in after_split {
                if mail.state() == &self.state {
                    in_flight.push(mail);
                } else if mail.is_ghost() {
                    traversal.disposed += 1;
                    mail.dispose();
                } else {
                    processing!(
                        mail = %mail.name(),
                        "Leaving {} for {}",
                        self.state,
                        mail.state()
                    );
                    traversal.rerouted.push(mail);
                }
            }
        }

        self.check_interrupt(&in_flight, interrupt)?;

        for mut mail in in_flight {
            if self.state.is_error() {
                processing!(
                    level = DEBUG,
                    mail = %mail.name(),
                    "Mail reached the end of the error processor, ghosting it"
                );
            } else {
                tracing::warn!(
                    mail = %mail.name(),
                    processor = %self.state,
                    "Mail reached the end of the processor without being routed, ghosting it. \
                     End the processor with a mailet that routes or ghosts every mail."
                );
            }

            for listener in &self.listeners {
                listener.fell_through(&self.state, &mail);
            }

            mail.set_state(State::GHOST);
            traversal.fell_through += 1;
            traversal.disposed += 1;
            mail.dispose();
        }

        Ok(traversal)
    }

    fn check_interrupt(
        &self,
        in_flight: &[Mail],
        interrupt: &Interrupt,
    ) -> Result<(), ProcessingError> {
        match in_flight.first() {
            Some(mail) if interrupt.is_interrupted() => Err(ProcessingError::Interrupted {
                processor: self.state.clone(),
                mail: mail.name().to_owned(),
            }),
            _ => Ok(()),
        }
    }
}
