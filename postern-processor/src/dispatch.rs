//! Routing of mails to the processor matching their state.

use std::sync::Arc;

use ahash::AHashMap;
use postern_common::{Mail, State, processing};
use postern_tracing::traced;

use crate::{
    error::{ConfigurationError, ProcessingError},
    interrupt::Interrupt,
    listener::ProcessorListener,
    processor::StateProcessor,
};

pub const DEFAULT_MAX_HOPS: usize = 64;

/// Summary of one call to [`DispatchTable::route`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouteSummary {
    /// Processor traversals performed, over the mail and its clones.
    pub traversals: usize,
    /// Mails ghosted and released.
    pub disposed: usize,
}

/// Maps states to processors. Built once, then shared read-only between workers.
#[derive(Debug)]
pub struct DispatchTable {
    processors: AHashMap<State, StateProcessor>,
    max_hops: usize,
}

impl DispatchTable {
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    pub fn processor(&self, state: &State) -> Option<&StateProcessor> {
        self.processors.get(state)
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.processors.keys()
    }

    pub const fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Routes `mail` until it and every clone split off it are ghosted.
    ///
    /// # Errors
    /// See [`DispatchTable::route_with`]
    pub async fn route(&self, mail: Mail) -> Result<RouteSummary, ProcessingError> {
        self.route_with(mail, &Interrupt::never()).await
    }

    /// Routes `mail` until it and every clone split off it are ghosted, giving
    /// up on running mailets when `interrupt` fires.
    ///
    /// A mail that is already ghosted is released without being processed.
    ///
    /// # Errors
    /// - If a processor propagates a failure
    /// - If a mail is sent to a state with no processor
    /// - If a mail is rerouted more than the configured number of hops
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(mail = %mail.name())), timing(precision = "us"))]
    pub async fn route_with(
        &self,
        mail: Mail,
        interrupt: &Interrupt,
    ) -> Result<RouteSummary, ProcessingError> {
        let mut summary = RouteSummary::default();

        if mail.is_ghost() {
            processing!(mail = %mail.name(), "Mail is already ghosted, nothing to route");
            summary.disposed += 1;
            mail.dispose();
            return Ok(summary);
        }

        // Depth first, so clones are finished in the order they were produced.
        let mut pending = vec![(mail, 0_usize)];

        while let Some((mail, hops)) = pending.pop() {
            if hops > self.max_hops {
                return Err(ProcessingError::TooManyHops {
                    mail: mail.name().to_owned(),
                    state: mail.state().clone(),
                    hops,
                });
            }

            let Some(processor) = self.processors.get(mail.state()) else {
                return Err(ProcessingError::MisconfiguredPipeline {
                    state: mail.state().clone(),
                    mail: mail.name().to_owned(),
                });
            };

            let traversal = processor.service(mail, interrupt).await?;

            summary.traversals += 1;
            summary.disposed += traversal.disposed;
            pending.extend(
                traversal
                    .rerouted
                    .into_iter()
                    .rev()
                    .map(|mail| (mail, hops + 1)),
            );
        }

        Ok(summary)
    }
}

/// Collects processors and validates them into a [`DispatchTable`].
#[derive(Debug)]
pub struct DispatchTableBuilder {
    processors: Vec<StateProcessor>,
    listeners: Vec<Arc<dyn ProcessorListener>>,
    max_hops: usize,
}

impl Default for DispatchTableBuilder {
    fn default() -> Self {
        Self {
            processors: Vec::new(),
            listeners: Vec::new(),
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

impl DispatchTableBuilder {
    #[must_use]
    pub fn processor(mut self, processor: StateProcessor) -> Self {
        self.processors.push(processor);
        self
    }

    /// Attaches `listener` to every processor.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn ProcessorListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    #[must_use]
    pub const fn max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// # Errors
    /// - If a state is claimed by more than one processor
    /// - If the `root` or `error` processor is missing
    /// - If a step routes to a state that has no processor
    /// - If the hop limit is zero
    pub fn build(self) -> Result<DispatchTable, ConfigurationError> {
        if self.max_hops == 0 {
            return Err(ConfigurationError::InvalidHopLimit);
        }

        let mut processors = AHashMap::with_capacity(self.processors.len());
        for mut processor in self.processors {
            if processor.state().is_ghost() {
                return Err(ConfigurationError::ReservedState(processor.state().clone()));
            }

            for listener in &self.listeners {
                processor.add_listener(Arc::clone(listener));
            }

            let state = processor.state().clone();
            if processors.insert(state.clone(), processor).is_some() {
                return Err(ConfigurationError::DuplicateProcessor(state));
            }
        }

        for required in [State::ROOT, State::ERROR] {
            if !processors.contains_key(&required) {
                return Err(ConfigurationError::MissingProcessor(required));
            }
        }

        for processor in processors.values() {
            for target in processor.steps().iter().flat_map(|step| step.targets()) {
                if !processors.contains_key(&target) {
                    return Err(ConfigurationError::UnknownState {
                        processor: processor.state().clone(),
                        target,
                    });
                }
            }
        }

        processing!(
            level = INFO,
            "Built dispatch table with processors [{}]",
            processors
                .keys()
                .map(State::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(DispatchTable {
            processors,
            max_hops: self.max_hops,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        builtin::{All, Null, ToProcessor},
        step::{OnMailetError, PipelineStep},
        testing::{FailingMailet, RecordingListener},
    };

    fn mail(state: State) -> Mail {
        Mail::builder()
            .name("m")
            .recipients("a@x.org".parse().unwrap())
            .state(state)
            .build()
    }

    fn forward(from: State, to: State) -> StateProcessor {
        StateProcessor::new(
            from,
            vec![PipelineStep::new(Arc::new(All), Arc::new(ToProcessor::new(to)))],
        )
        .unwrap()
    }

    fn ghost_all(state: State) -> StateProcessor {
        StateProcessor::new(state, vec![PipelineStep::new(Arc::new(All), Arc::new(Null))]).unwrap()
    }

    #[tokio::test]
    async fn routes_through_processors_until_ghosted() {
        let table = DispatchTable::builder()
            .processor(forward(State::ROOT, State::TRANSPORT))
            .processor(ghost_all(State::TRANSPORT))
            .processor(ghost_all(State::ERROR))
            .build()
            .unwrap();

        let summary = table.route(mail(State::ROOT)).await.unwrap();

        assert_eq!(
            summary,
            RouteSummary {
                traversals: 2,
                disposed: 1,
            }
        );
    }

    #[tokio::test]
    async fn ghost_input_is_a_no_op() {
        let recorder = RecordingListener::new();
        let table = DispatchTable::builder()
            .processor(ghost_all(State::ROOT))
            .processor(ghost_all(State::ERROR))
            .listener(Arc::new(recorder.clone()))
            .build()
            .unwrap();

        let summary = table.route(mail(State::GHOST)).await.unwrap();

        assert_eq!(summary.traversals, 0);
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn unknown_state_at_runtime_is_misconfiguration() {
        let table = DispatchTable::builder()
            .processor(ghost_all(State::ROOT))
            .processor(ghost_all(State::ERROR))
            .build()
            .unwrap();

        let error = table.route(mail(State::from("spam"))).await.unwrap_err();

        assert!(error.is_configuration_error());
        assert!(matches!(
            error,
            ProcessingError::MisconfiguredPipeline { ref state, .. } if *state == State::from("spam")
        ));
    }

    #[tokio::test]
    async fn loops_are_cut_off() {
        let table = DispatchTable::builder()
            .processor(forward(State::ROOT, State::TRANSPORT))
            .processor(forward(State::TRANSPORT, State::ROOT))
            .processor(ghost_all(State::ERROR))
            .max_hops(10)
            .build()
            .unwrap();

        let error = table.route(mail(State::ROOT)).await.unwrap_err();

        assert!(matches!(error, ProcessingError::TooManyHops { hops: 11, .. }));
    }

    #[test]
    fn validation() {
        let missing_error = DispatchTable::builder()
            .processor(ghost_all(State::ROOT))
            .build();
        assert!(matches!(
            missing_error,
            Err(ConfigurationError::MissingProcessor(ref state)) if state.is_error()
        ));

        let duplicate = DispatchTable::builder()
            .processor(ghost_all(State::ROOT))
            .processor(ghost_all(State::ROOT))
            .processor(ghost_all(State::ERROR))
            .build();
        assert!(matches!(
            duplicate,
            Err(ConfigurationError::DuplicateProcessor(_))
        ));

        let dangling = DispatchTable::builder()
            .processor(forward(State::ROOT, State::TRANSPORT))
            .processor(ghost_all(State::ERROR))
            .build();
        assert!(matches!(
            dangling,
            Err(ConfigurationError::UnknownState { ref target, .. }) if *target == State::TRANSPORT
        ));

        let dangling_policy = DispatchTable::builder()
            .processor(
                StateProcessor::new(
                    State::ROOT,
                    vec![
                        PipelineStep::new(Arc::new(All), Arc::new(FailingMailet::default()))
                            .on_mailet_error(OnMailetError::Reroute(State::from("quarantine"))),
                    ],
                )
                .unwrap(),
            )
            .processor(ghost_all(State::ERROR))
            .build();
        assert!(matches!(
            dangling_policy,
            Err(ConfigurationError::UnknownState { .. })
        ));

        assert!(matches!(
            DispatchTable::builder()
                .processor(ghost_all(State::ROOT))
                .processor(ghost_all(State::ERROR))
                .max_hops(0)
                .build(),
            Err(ConfigurationError::InvalidHopLimit)
        ));
    }
}
