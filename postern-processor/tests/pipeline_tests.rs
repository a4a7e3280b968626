#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::sync::Arc;

use postern_common::{Address, State};
use postern_processor::{
    DispatchTable, MailetContext, OnMailetError, PipelineStep, ProcessingError, ProcessorsConfig,
    Registry,
    builtin::{All, Null, ToProcessor},
    testing::{ClearRecipients, CountingMailet, FailingMailet, FixedMatcher, RecordingListener},
};
use postern_spool::{MailRepository, MailRepositoryStore, Protocol};
use pretty_assertions::assert_eq;
use support::{Collect, ghost_all, host, mail, processor, table};

fn sorted(recipients: &str) -> Vec<Address> {
    let mut list = recipients
        .parse::<postern_common::AddressList>()
        .unwrap()
        .0;
    list.sort();
    list
}

#[tokio::test]
async fn split_recipients_reach_their_processors() {
    let local = Arc::new(Collect::default());
    let remote = Arc::new(Collect::default());

    let table = DispatchTable::builder()
        .processor(processor(
            State::ROOT,
            vec![
                PipelineStep::new(host("local.test"), Arc::new(ToProcessor::new(State::from("local")))),
                PipelineStep::new(Arc::new(All), Arc::new(ToProcessor::new(State::TRANSPORT))),
            ],
        ))
        .processor(processor(
            State::from("local"),
            vec![PipelineStep::new(Arc::new(All), local.clone())],
        ))
        .processor(processor(
            State::TRANSPORT,
            vec![PipelineStep::new(Arc::new(All), remote.clone())],
        ))
        .processor(ghost_all(State::ERROR))
        .build()
        .unwrap();

    let summary = table
        .route(mail("m1", "a@local.test, b@remote.test"))
        .await
        .unwrap();

    let local_seen = local.seen();
    assert_eq!(local_seen.len(), 1);
    assert_eq!(local_seen[0].2, sorted("a@local.test"));
    assert_ne!(local_seen[0].1, "m1", "the matched part travels as a clone");

    let remote_seen = remote.seen();
    assert_eq!(remote_seen.len(), 1);
    assert_eq!(remote_seen[0].1, "m1");
    assert_eq!(remote_seen[0].2, sorted("b@remote.test"));

    assert_eq!(summary.traversals, 3);
    assert_eq!(summary.disposed, 2);
}

#[tokio::test]
async fn recipients_are_conserved_across_splits() {
    let cases = [
        "a@one.test",
        "a@one.test, b@two.test",
        "a@one.test, b@two.test, c@three.test, d@one.test",
        "a@two.test, b@two.test, c@two.test",
        "a@four.test, b@five.test",
    ];

    for recipients in cases {
        let sink = Arc::new(Collect::default());
        let table = DispatchTable::builder()
            .processor(processor(
                State::ROOT,
                vec![
                    PipelineStep::new(host("one.test"), Arc::new(ToProcessor::new(State::TRANSPORT))),
                    PipelineStep::new(host("two.test, three.test"), sink.clone()),
                    PipelineStep::new(Arc::new(All), Arc::new(ToProcessor::new(State::TRANSPORT))),
                ],
            ))
            .processor(processor(
                State::TRANSPORT,
                vec![PipelineStep::new(Arc::new(All), sink.clone())],
            ))
            .processor(ghost_all(State::ERROR))
            .build()
            .unwrap();

        table.route(mail("m", recipients)).await.unwrap();

        assert_eq!(sink.recipients(), sorted(recipients), "recipients {recipients}");
    }
}

#[tokio::test]
async fn mails_without_recipients_are_ghosted() {
    let after = Arc::new(CountingMailet::default());
    let table = table(vec![
        PipelineStep::new(Arc::new(All), Arc::new(ClearRecipients)),
        PipelineStep::new(Arc::new(All), after.clone()),
    ]);

    let summary = table.route(mail("m", "a@x.test")).await.unwrap();

    assert_eq!(after.calls(), 0);
    assert_eq!(summary.disposed, 1);
}

#[tokio::test]
async fn repeated_recipients_travel_as_one_mail() {
    let counter = Arc::new(CountingMailet::default());
    let table = table(vec![
        PipelineStep::new(Arc::new(All), counter.clone()),
        PipelineStep::new(Arc::new(All), Arc::new(Null)),
    ]);

    let summary = table.route(mail("m", "a@x.test, a@x.test")).await.unwrap();

    assert_eq!(counter.calls(), 1);
    assert_eq!(summary.traversals, 1);
    assert_eq!(summary.disposed, 1);
}

#[tokio::test]
async fn empty_processor_falls_through_with_a_warning() {
    let recorder = RecordingListener::new();
    let table = DispatchTable::builder()
        .processor(processor(State::ROOT, Vec::new()))
        .processor(ghost_all(State::ERROR))
        .listener(Arc::new(recorder.clone()))
        .build()
        .unwrap();

    let summary = table.route(mail("m", "a@x.test")).await.unwrap();

    assert_eq!(summary.traversals, 1);
    assert_eq!(summary.disposed, 1);
    assert_eq!(recorder.fell_through(), vec![(State::ROOT, String::from("m"))]);
}

#[tokio::test]
async fn propagated_failure_aborts_before_later_steps() {
    let failing = Arc::new(FailingMailet::default());
    let after = Arc::new(CountingMailet::default());
    let table = table(vec![
        PipelineStep::new(Arc::new(All), failing.clone()).on_mailet_error(OnMailetError::Propagate),
        PipelineStep::new(Arc::new(All), after.clone()),
    ]);

    let error = table.route(mail("m", "a@x.test")).await.unwrap_err();

    assert!(matches!(error, ProcessingError::Mailet { .. }));
    assert!(!error.is_configuration_error());
    assert_eq!(failing.calls(), 1);
    assert_eq!(after.calls(), 0);
}

#[tokio::test]
async fn failures_go_through_the_error_processor() {
    let errors = Arc::new(Collect::default());
    let table = DispatchTable::builder()
        .processor(processor(
            State::ROOT,
            vec![PipelineStep::new(Arc::new(All), Arc::new(FailingMailet::default()))],
        ))
        .processor(processor(
            State::ERROR,
            vec![PipelineStep::new(Arc::new(All), errors.clone())],
        ))
        .build()
        .unwrap();

    table.route(mail("m", "a@x.test")).await.unwrap();

    let seen = errors.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, State::ERROR);
}

#[tokio::test]
async fn matcher_results_outside_the_recipients_are_dropped() {
    let sink = Arc::new(Collect::default());
    let table = table(vec![PipelineStep::new(
        Arc::new(FixedMatcher("b@x.test, stranger@y.test".parse().unwrap())),
        sink.clone(),
    )]);

    table.route(mail("m", "a@x.test, b@x.test")).await.unwrap();

    assert_eq!(sink.recipients(), sorted("b@x.test"));
}

#[tokio::test]
async fn configured_pipeline_stores_split_mails() {
    let dir = tempfile::tempdir().unwrap();
    let local = format!("file://{}", dir.path().join("local").display());
    let outgoing = format!("file://{}", dir.path().join("outgoing").display());

    let config: ProcessorsConfig = ron::from_str(&format!(
        r#"[
            (
                state: "root",
                mailets: [
                    (class: "AddHeader", params: {{"name": "X-Seen", "value": "yes"}}),
                    (matcher: Some("HostIs=local.test"), class: "ToRepository", params: {{"repository": "{local}"}}),
                    (class: "ToProcessor", params: {{"processor": "transport"}}),
                ],
            ),
            (
                state: "transport",
                mailets: [(class: "ToRepository", params: {{"repository": "{outgoing}"}})],
            ),
            (state: "error", mailets: [(class: "Null")]),
        ]"#
    ))
    .unwrap();

    let store = Arc::new(MailRepositoryStore::new(Protocol::File));
    let table = config
        .load(&Registry::builtin(), &MailetContext::new(Arc::clone(&store)))
        .unwrap()
        .build()
        .unwrap();

    table
        .route(mail("m", "a@local.test, b@remote.test, c@local.test"))
        .await
        .unwrap();

    let local = store.select(&local).await.unwrap();
    let keys = local.list().await.unwrap();
    assert_eq!(keys.len(), 1);
    let stored = local.retrieve(&keys[0]).await.unwrap();
    let mut recipients = stored.recipients().to_vec();
    recipients.sort();
    assert_eq!(recipients, sorted("a@local.test, c@local.test"));
    assert_eq!(stored.header("X-Seen").as_deref(), Some("yes"));

    let outgoing = store.select(&outgoing).await.unwrap();
    let keys = outgoing.list().await.unwrap();
    assert_eq!(keys.len(), 1);
    let stored = outgoing.retrieve(&keys[0]).await.unwrap();
    assert_eq!(stored.name(), "m");
    assert_eq!(stored.recipients().to_vec(), sorted("b@remote.test"));
}
