#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use postern_common::{Address, Mail, State};
use postern_processor::{
    DispatchTable, Mailet, MailetError, PipelineStep, PluginConfig, StateProcessor,
    builtin::{All, HostIs, Null},
};

pub fn mail(name: &str, recipients: &str) -> Mail {
    Mail::builder()
        .name(name)
        .sender("sender@example.com".parse().unwrap())
        .recipients(recipients.parse().unwrap())
        .message(b"Subject: test\r\n\r\nHello".to_vec())
        .build()
}

pub fn host(domains: &str) -> Arc<HostIs> {
    Arc::new(
        HostIs::from_config(&PluginConfig::new("HostIs").with_condition(Some(domains.into())))
            .unwrap(),
    )
}

pub fn processor(state: State, steps: Vec<PipelineStep>) -> StateProcessor {
    StateProcessor::new(state, steps).unwrap()
}

pub fn ghost_all(state: State) -> StateProcessor {
    processor(state, vec![PipelineStep::new(Arc::new(All), Arc::new(Null))])
}

/// A table with the given root processor, and error/transport processors
/// that ghost everything.
pub fn table(root: Vec<PipelineStep>) -> DispatchTable {
    DispatchTable::builder()
        .processor(processor(State::ROOT, root))
        .processor(ghost_all(State::TRANSPORT))
        .processor(ghost_all(State::ERROR))
        .build()
        .unwrap()
}

/// Mailet that remembers the recipients of every mail it sees, with the state
/// the mail was in, then ghosts the mail.
#[derive(Debug, Default)]
pub struct Collect {
    seen: Mutex<Vec<(State, String, Vec<Address>)>>,
}

impl Collect {
    pub fn seen(&self) -> Vec<(State, String, Vec<Address>)> {
        self.seen.lock().clone()
    }

    pub fn recipients(&self) -> Vec<Address> {
        let mut all: Vec<Address> = self
            .seen
            .lock()
            .iter()
            .flat_map(|(_, _, recipients)| recipients.clone())
            .collect();
        all.sort();
        all
    }
}

#[async_trait]
impl Mailet for Collect {
    fn name(&self) -> &str {
        "Collect"
    }

    async fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        self.seen.lock().push((
            mail.state().clone(),
            mail.name().to_owned(),
            mail.recipients().to_vec(),
        ));
        mail.set_state(State::GHOST);
        Ok(())
    }
}
