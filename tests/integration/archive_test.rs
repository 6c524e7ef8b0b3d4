//! Message archive fed by the running pipeline.

use sqlx::Row;

use reactobus::db::connect_pool;
use reactobus::Context;

use crate::common::{envelope, eventually, start};

#[tokio::test]
async fn test_archive_stores_relayed_messages() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("messages.db").display());
    let yaml = format!(
        r#"
inputs:
  - {{ class: Pull, name: producers, options: {{ url: inproc://producers }} }}
db:
  url: "{url}"
  flush_interval: 0.05
"#
    );

    let ctx = Context::new();
    let running = start(&yaml, &ctx).await;
    let pool = connect_pool(&url).await.unwrap();

    let producer = ctx.connect_push("inproc://producers").await.unwrap();
    producer
        .send(envelope("org.reactobus.db", "alice", r#"{"id": 1}"#))
        .await
        .unwrap();
    producer
        .send(envelope("org.reactobus.db", "alice", "not json"))
        .await
        .unwrap();
    producer
        .send(envelope("org.reactobus.db", "bob", r#"{"id": 2}"#))
        .await
        .unwrap();

    eventually(|| {
        let pool = pool.clone();
        async move {
            sqlx::query("SELECT COUNT(*) FROM messages")
                .fetch_one(&pool)
                .await
                .map(|row| row.get::<i64, _>(0) == 2)
                .unwrap_or(false)
        }
    })
    .await;

    running.stop().await;

    let rows = sqlx::query("SELECT username, data, datetime FROM messages ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(rows[0].get::<String, _>("username"), "alice");
    assert_eq!(rows[1].get::<String, _>("data"), r#"{"id": 2}"#);
    // Relay stamp, not the producer's.
    assert!(!rows[0].get::<String, _>("datetime").starts_with("1970"));
}
