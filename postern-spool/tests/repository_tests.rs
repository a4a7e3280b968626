#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use postern_common::{Mail, State};
use postern_spool::{
    MailRepository, MailRepositoryStore, Protocol, RepositoryError, TestMailRepository,
};

fn failed_mail(name: &str) -> Mail {
    let mut mail = Mail::builder()
        .name(name)
        .sender("sender@example.org".parse().unwrap())
        .recipients("a@example.com, b@example.com".parse().unwrap())
        .message(b"Subject: failing\r\n\r\nbody\r\n".to_vec())
        .state(State::TRANSPORT)
        .build();
    mail.set_failure_count(5);
    mail.set_error_message("processing failed");
    mail
}

#[tokio::test]
async fn test_file_url_opens_directory_repository() {
    let dir = tempfile::tempdir().unwrap();
    let store = MailRepositoryStore::new(Protocol::File);
    let url = format!("file://{}", dir.path().join("error").display());

    let repository = store.select(&url).await.unwrap();
    let key = repository.store(&failed_mail("archived")).await.unwrap();

    assert!(dir.path().join("error").join(format!("{key}.bin")).exists());
    assert!(dir.path().join("error").join(format!("{key}.eml")).exists());

    let reopened = MailRepositoryStore::new(Protocol::File)
        .select(&url)
        .await
        .unwrap();
    let stored = reopened.retrieve(&key).await.unwrap();
    assert_eq!(stored.name(), "archived");
    assert_eq!(stored.failure_count(), 5);
    assert_eq!(stored.error_message(), Some("processing failed"));
    assert_eq!(&stored.message()[..], b"Subject: failing\r\n\r\nbody\r\n");
}

#[tokio::test]
async fn test_file_url_rejects_system_directories() {
    let store = MailRepositoryStore::default();

    let result = store.select("file:///etc/postern/error").await;
    assert!(matches!(result, Err(RepositoryError::Validation(_))));
    assert!(result.unwrap_err().to_string().contains("system directory"));
}

#[tokio::test]
async fn test_injected_failures_then_recovery() {
    let repository = TestMailRepository::new();
    repository.fail_next(2);

    assert!(repository.store(&failed_mail("one")).await.is_err());
    assert!(repository.store(&failed_mail("two")).await.is_err());
    repository.store(&failed_mail("three")).await.unwrap();

    let mails = repository.mails().await.unwrap();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].name(), "three");
}

#[tokio::test]
async fn test_wait_for_count_sees_concurrent_stores() {
    let repository = TestMailRepository::new();
    let writer = {
        let repository = repository.clone();
        tokio::spawn(async move {
            for i in 0..3 {
                repository.store(&failed_mail(&format!("m{i}"))).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    repository
        .wait_for_count(3, Duration::from_secs(5))
        .await
        .unwrap();
    writer.await.unwrap();

    assert_eq!(repository.len(), 3);
}

#[tokio::test]
async fn test_wait_for_count_times_out() {
    let repository = Arc::new(TestMailRepository::new());
    let result = repository
        .wait_for_count(1, Duration::from_millis(20))
        .await;

    assert!(matches!(result, Err(RepositoryError::Internal(_))));
}
