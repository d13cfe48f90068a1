//! Integration tests for streamed queries

mod common;

use common::{customers, init_test_logging, repository, Customer, MockDb};
use futures::StreamExt;
use rivven_repo::prelude::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn all_customers() -> CommandSpec {
    CommandSpec::new("SELECT Id, Name, Email FROM Customers")
}

async fn wait_for_close(db: &Arc<MockDb>) {
    for _ in 0..16 {
        if db.closes() > 0 {
            return;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_cancel_after_five_rows() {
    init_test_logging();
    let db = MockDb::new();
    db.returns_rows(customers(10_000));

    let cancel = CancellationToken::new();
    let mut stream = repository(&db)
        .query_stream::<Customer>(&all_customers(), &cancel)
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(item) = stream.next().await {
        let customer = item.unwrap();
        seen.push(customer.id);
        if seen.len() == 5 {
            cancel.cancel();
            break;
        }
    }

    assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
    assert!(stream.next().await.is_none());
    assert!(stream.is_finished());

    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    assert_eq!(stream.yielded(), 5);
    assert_eq!(db.rows_fetched.load(Ordering::SeqCst), 5);
    assert_eq!(db.streams_dropped.load(Ordering::SeqCst), 1);
    assert_eq!(db.closes(), 1);
}

#[tokio::test]
async fn test_exhausted_stream_releases_connection() {
    init_test_logging();
    let db = MockDb::new();
    db.returns_rows(customers(3));

    let mut stream = repository(&db)
        .query_stream::<Customer>(&all_customers(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(db.closes(), 0);

    let mut count = 0;
    while let Some(item) = stream.next().await {
        item.unwrap();
        count += 1;
    }

    assert_eq!(count, 3);
    assert!(stream.is_finished());
    assert_eq!(db.closes(), 1);
    // a finished stream stays finished
    assert!(stream.next().await.is_none());
    assert_eq!(db.closes(), 1);
}

#[tokio::test]
async fn test_close_early() {
    init_test_logging();
    let db = MockDb::new();
    db.returns_rows(customers(100));

    let mut stream = repository(&db)
        .query_stream::<Customer>(&all_customers(), &CancellationToken::new())
        .await
        .unwrap();
    stream.next().await.unwrap().unwrap();
    stream.close().await;

    assert_eq!(db.closes(), 1);
    assert_eq!(db.streams_dropped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_drop_early_releases_connection() {
    init_test_logging();
    let db = MockDb::new();
    db.returns_rows(customers(100));

    {
        let mut stream = repository(&db)
            .query_stream::<Customer>(&all_customers(), &CancellationToken::new())
            .await
            .unwrap();
        stream.next().await.unwrap().unwrap();
    }

    wait_for_close(&db).await;
    assert_eq!(db.closes(), 1);
    assert_eq!(db.streams_dropped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_into_stream() {
    init_test_logging();
    let db = MockDb::new();
    db.returns_rows(customers(4));

    let ids: Vec<i64> = repository(&db)
        .query_stream::<Customer>(&all_customers(), &CancellationToken::new())
        .await
        .unwrap()
        .into_stream()
        .map(|item| item.map(|c| c.id))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_>>()
        .unwrap();

    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(db.closes(), 1);
}

#[tokio::test]
async fn test_mapping_failure_ends_stream() {
    init_test_logging();
    let db = MockDb::new();
    let mut rows = customers(2);
    rows.push(Row::new(
        vec!["Id".into(), "Name".into()],
        vec![Value::String("three".into()), Value::String("x".into())],
    ));
    rows.extend(customers(2));
    db.returns_rows(rows);

    let mut stream = repository(&db)
        .with_mapping(MappingMode::Strict)
        .query_stream::<Customer>(&all_customers(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(stream.next().await.unwrap().is_ok());
    assert!(stream.next().await.unwrap().is_ok());
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TypeConversion);
    assert!(stream.next().await.is_none());
    assert_eq!(db.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_is_retried() {
    init_test_logging();
    let db = MockDb::new();
    db.returns_rows(customers(2));
    db.fail_next(Error::Deadlock);

    let mut stream = repository(&db)
        .query_stream::<Customer>(&all_customers(), &CancellationToken::new())
        .await
        .unwrap();

    // the failed attempt released its own connection
    assert_eq!(db.opens(), 2);
    assert_eq!(db.closes(), 1);

    while let Some(item) = stream.next().await {
        item.unwrap();
    }
    assert_eq!(db.closes(), 2);
}

#[tokio::test]
async fn test_enlisted_stream_keeps_unit_connection() {
    init_test_logging();
    let db = MockDb::new();
    db.returns_rows(customers(3));

    let repo = repository(&db);
    let uow = repo.begin_unit_of_work().await.unwrap();
    let mut stream = repo
        .enlist(&uow)
        .query_stream::<Customer>(&all_customers(), &CancellationToken::new())
        .await
        .unwrap();

    while let Some(item) = stream.next().await {
        item.unwrap();
    }
    drop(stream);
    assert_eq!(db.closes(), 0);

    uow.commit().await.unwrap();
    assert_eq!(db.closes(), 1);
    assert_eq!(db.commits.load(Ordering::SeqCst), 1);
}
