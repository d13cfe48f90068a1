//! Integration tests for bulk loads

mod common;

use common::{repository, MockDb, Reply};
use rivven_repo::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn orders(n: usize) -> TabularData {
    TabularData::new(
        vec!["OrderId".into(), "Customer".into(), "Total".into()],
        (0..n)
            .map(|i| {
                vec![
                    Value::Int64(i as i64),
                    Value::String(format!("c{}", i % 7)),
                    Value::Float64(i as f64 * 1.5),
                ]
            })
            .collect(),
    )
}

struct Order {
    id: i64,
    note: Option<String>,
}

impl BulkRecord for Order {
    fn columns() -> Vec<String> {
        vec!["Id".into(), "Note".into()]
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Int64(self.id),
            self.note.clone().map(Value::String).unwrap_or(Value::Null),
        ]
    }
}

#[tokio::test]
async fn test_empty_input_touches_nothing() {
    let db = MockDb::new();
    let repo = repository(&db);

    let written = repo
        .bulk_insert(
            &TabularData::default(),
            &BulkLoadSpec::new("dbo.Orders"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(written, 0);
    assert_eq!(db.opens(), 0);
    assert_eq!(db.commands(), 0);

    let none: Vec<Order> = Vec::new();
    // an invalid table name is not even looked at for empty input
    let written = repo
        .bulk_insert_records(&none, &BulkLoadSpec::new("bad name;"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(written, 0);
    assert_eq!(db.opens(), 0);
}

#[tokio::test]
async fn test_batches_in_own_transaction() {
    let db = MockDb::new();
    let repo = repository(&db);

    let written = repo
        .bulk_insert(&orders(25_000), &repo.bulk_spec("dbo.Orders"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(written, 25_000);
    let batches = db.bulk.lock().unwrap();
    assert_eq!(
        batches.iter().map(|(_, _, rows)| rows.len()).collect::<Vec<_>>(),
        vec![10_000, 10_000, 5_000]
    );
    assert!(batches.iter().all(|(table, _, _)| table == "dbo.Orders"));
    assert_eq!(db.begins.load(Ordering::SeqCst), 1);
    assert_eq!(db.commits.load(Ordering::SeqCst), 1);
    assert_eq!(db.opens(), 1);
    assert_eq!(db.closes(), 1);
}

#[tokio::test]
async fn test_identity_mapping_keeps_columns() {
    let db = MockDb::new();

    repository(&db)
        .bulk_insert(&orders(3), &BulkLoadSpec::new("Orders"), &CancellationToken::new())
        .await
        .unwrap();

    let batches = db.bulk.lock().unwrap();
    assert_eq!(batches[0].1, vec!["OrderId", "Customer", "Total"]);
    assert_eq!(batches[0].2[2][0], Value::Int64(2));
}

#[tokio::test]
async fn test_explicit_mapping() {
    let db = MockDb::new();
    let spec = BulkLoadSpec::new("sales.Orders")
        .with_mapping(ColumnMapping::explicit([("Total", "Amount"), ("OrderId", "Id")]))
        .with_batch_size(2);

    let written = repository(&db)
        .bulk_insert(&orders(3), &spec, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(written, 3);
    let batches = db.bulk.lock().unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].1, vec!["Amount", "Id"]);
    assert_eq!(batches[1].2, vec![vec![Value::Float64(3.0), Value::Int64(2)]]);
}

#[tokio::test]
async fn test_bad_mapping_rejected_before_io() {
    let db = MockDb::new();
    let repo = repository(&db);
    let cancel = CancellationToken::new();

    let spec = BulkLoadSpec::new("Orders").with_mapping(ColumnMapping::explicit([("Missing", "X")]));
    let err = repo.bulk_insert(&orders(1), &spec, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "column_mapping"));

    let err = repo
        .bulk_insert(&orders(1), &BulkLoadSpec::new("Orders; DROP TABLE Orders"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);

    let err = repo
        .bulk_insert(&orders(1), &BulkLoadSpec::new("Orders").with_batch_size(0), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "batch_size"));

    assert_eq!(db.opens(), 0);
}

#[tokio::test]
async fn test_failed_batch_rolls_back() {
    let db = MockDb::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    db.on_command(move |_, _| {
        if seen.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(Error::Constraint {
                code: 2627,
                message: "Violation of PRIMARY KEY constraint".into(),
            });
        }
        Ok(Reply::Affected(0))
    });

    let spec = BulkLoadSpec::new("Orders").with_batch_size(10);
    let err = repository(&db)
        .bulk_insert(&orders(30), &spec, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.operation(), Some("bulk_insert"));
    assert_eq!(err.attempts(), 1);
    assert_eq!(err.category(), ErrorCategory::Constraint);
    assert_eq!(db.rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(db.commits.load(Ordering::SeqCst), 0);
    assert_eq!(db.closes(), 1);
}

#[tokio::test]
async fn test_joins_unit_of_work() {
    let db = MockDb::new();
    let repo = repository(&db);
    let cancel = CancellationToken::new();

    let uow = repo.begin_unit_of_work().await.unwrap();
    let enlisted = repo.enlist(&uow);
    enlisted
        .execute_non_query(&CommandSpec::new("DELETE FROM Orders"), &cancel)
        .await
        .unwrap();
    let written = enlisted
        .bulk_insert(&orders(5), &BulkLoadSpec::new("Orders"), &cancel)
        .await
        .unwrap();

    assert_eq!(written, 5);
    // only the unit's own transaction was begun
    assert_eq!(db.begins.load(Ordering::SeqCst), 1);
    assert_eq!(db.opens(), 1);
    assert_eq!(db.closes(), 0);

    uow.commit().await.unwrap();
    assert_eq!(db.commits.load(Ordering::SeqCst), 1);
    assert_eq!(db.closes(), 1);
}

#[tokio::test]
async fn test_typed_records() {
    let db = MockDb::new();
    let records = vec![
        Order {
            id: 1,
            note: Some("rush".into()),
        },
        Order { id: 2, note: None },
    ];

    let written = repository(&db)
        .bulk_insert_records(&records, &BulkLoadSpec::new("Orders"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(written, 2);
    let batches = db.bulk.lock().unwrap();
    assert_eq!(batches[0].1, vec!["Id", "Note"]);
    assert_eq!(batches[0].2[1], vec![Value::Int64(2), Value::Null]);
}
