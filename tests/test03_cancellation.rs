mod common;

use std::time::Duration;

use sql_mapper::SqlMapperError;
use sql_mapper::prelude::*;

use common::isolated_options;
use common::mock::{MockBehavior, MockConnection, numbered_rows};

#[derive(Debug)]
struct Item {
    id: i64,
    name: String,
}

impl_from_row!(Item { id, name });

struct Row {
    id: i64,
}

impl_sql_params!(Row { id });

fn rows(count: i64) -> MockBehavior {
    MockBehavior {
        columns: vec!["Id", "Name"],
        rows: numbered_rows(count),
        ..MockBehavior::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn pre_cancelled_calls_never_touch_the_connection() {
    let (raw, state) = MockConnection::new(rows(3));
    let conn = DbConnection::with_options(raw, isolated_options());
    let token = CancellationToken::new();
    token.cancel();

    let err = conn
        .sql("SELECT Id, Name FROM T")
        .cancellation(&token)
        .query::<Item>()
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    let err = conn
        .sql("UPDATE T SET Name = 'n'")
        .cancellation(&token)
        .execute()
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    let items = [Row { id: 1 }];
    let err = conn
        .sql("DELETE FROM T WHERE Id = :id")
        .cancellation(&token)
        .bind_each(&items)
        .execute()
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    let err = conn
        .sql("SELECT Id, Name FROM T")
        .cancellation(&token)
        .stream::<Item>()
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    assert_eq!(state.opens(), 0);
    assert_eq!(state.executes(), 0);
    assert!(conn.plan_cache().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_mid_command_aborts_it_and_reports_cancellation() {
    let (raw, state) = MockConnection::new(MockBehavior {
        latency: Duration::from_secs(10),
        ..MockBehavior::default()
    });
    let conn = DbConnection::with_options(raw, isolated_options());
    let token = CancellationToken::new();

    let pending = conn
        .sql("UPDATE T SET Name = 'slow'")
        .cancellation(&token)
        .execute();
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("cancellation should interrupt the command")
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(state.cancels() >= 1);
    // the scope opened the connection, so it closed it again
    assert_eq!(state.opens(), 1);
    assert_eq!(state.closes(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn genuine_faults_are_not_reported_as_cancellation() {
    let (raw, _state) = MockConnection::new(MockBehavior {
        fail_with: Some("disk full".into()),
        ..MockBehavior::default()
    });
    let conn = DbConnection::with_options(raw, isolated_options());
    let token = CancellationToken::new();

    let err = conn
        .sql("UPDATE T SET Name = 'n'")
        .cancellation(&token)
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, SqlMapperError::ExecutionError(msg) if msg == "disk full"));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_a_stream_stops_it_and_releases_the_connection() -> Result<(), SqlMapperError> {
    let (raw, state) = MockConnection::new(MockBehavior {
        row_latency: Duration::from_millis(5),
        ..rows(1_000)
    });
    let conn = DbConnection::with_options(raw, isolated_options());
    let token = CancellationToken::new();

    let mut stream = conn
        .sql("SELECT Id, Name FROM T")
        .cancellation(&token)
        .stream::<Item>()
        .await?;

    let mut seen = Vec::new();
    for _ in 0..3 {
        let item = stream.next().await.expect("row")?;
        seen.push(item.id);
    }
    assert_eq!(seen, vec![1, 2, 3]);

    token.cancel();
    let err = stream.next().await.expect("cancellation element").unwrap_err();
    assert!(err.is_cancelled());
    assert!(stream.next().await.is_none());
    stream.close().await?;

    assert!(state.rows_read() < 1_000);
    assert_eq!(state.opens(), 1);
    assert_eq!(state.closes(), 1);
    assert!(!conn.is_open().await?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn call_cancelled_while_waiting_for_the_connection_never_runs() -> Result<(), SqlMapperError> {
    let (raw, state) = MockConnection::opened(rows(3));
    let conn = DbConnection::with_options(raw, isolated_options());
    let token = CancellationToken::new();

    // the stream's worker holds the connection until the stream is closed
    let mut stream = conn.sql("SELECT Id, Name FROM T").stream::<Item>().await?;
    assert_eq!(stream.next().await.expect("row")?.id, 1);

    let waiting = conn
        .sql("UPDATE T SET Name = 'late'")
        .cancellation(&token)
        .execute();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    token.cancel();
    stream.close().await?;

    let err = waiting.await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(state.executes(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn triggering_after_completion_changes_nothing() -> Result<(), SqlMapperError> {
    let (raw, state) = MockConnection::new(rows(2));
    let conn = DbConnection::with_options(raw, isolated_options());
    let token = CancellationToken::new();

    let items: Vec<Item> = conn
        .sql("SELECT Id, Name FROM T")
        .cancellation(&token)
        .query()
        .await?;
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].name, "row-2");

    token.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(state.cancels(), 0);
    Ok(())
}
