//! End to end relay over inproc endpoints.

use std::time::Duration;

use bytes::Bytes;

use reactobus::envelope::parse_timestamp;
use reactobus::{Context, Envelope};

use crate::common::{envelope, recv, start};

const BUS: &str = r#"
inputs:
  - { class: Pull, name: producers, options: { url: inproc://producers } }
  - { class: ZMQPull, name: legacy, options: { url: inproc://legacy } }
outputs:
  - { class: Pub, name: everything, options: { url: inproc://everything } }
  - class: Pub
    name: lava
    options:
      url: inproc://lava
      filters:
        - { field: topic, pattern: '^org\.lavasoftware\.' }
        - { field: data.status, pattern: '^(complete|incomplete)$' }
"#;

#[tokio::test]
async fn test_relay_preserves_fields_and_stamps() {
    let ctx = Context::new();
    let mut everything = ctx.connect_sub("inproc://everything").await.unwrap();
    let running = start(BUS, &ctx).await;

    let producer = ctx.connect_push("inproc://producers").await.unwrap();
    let sent = envelope("org.reactobus.test", "alice", r#"{"id": 1}"#);
    let before = chrono::Utc::now().naive_utc();
    producer.send(sent.clone()).await.unwrap();

    let received = Envelope::decode(&recv(&mut everything).await).unwrap();
    let sent = Envelope::decode(&sent).unwrap();
    assert_eq!(received.topic(), sent.topic());
    assert_eq!(received.uuid(), sent.uuid());
    assert_eq!(received.username(), sent.username());
    assert_eq!(received.payload(), sent.payload());
    // Stamps are truncated to microseconds.
    let stamped = parse_timestamp(received.timestamp()).unwrap();
    assert!(stamped >= before - chrono::Duration::milliseconds(1));

    running.stop().await;
}

#[tokio::test]
async fn test_inputs_fan_in_and_drop_malformed() {
    let ctx = Context::new();
    let mut everything = ctx.connect_sub("inproc://everything").await.unwrap();
    let running = start(BUS, &ctx).await;

    let producers = ctx.connect_push("inproc://producers").await.unwrap();
    let legacy = ctx.connect_push("inproc://legacy").await.unwrap();

    producers
        .send(vec![Bytes::from_static(b"only"), Bytes::from_static(b"two")])
        .await
        .unwrap();
    producers.send(envelope("first", "a", "{}")).await.unwrap();
    legacy.send(envelope("second", "b", "{}")).await.unwrap();

    let mut topics = Vec::new();
    for _ in 0..2 {
        let received = Envelope::decode(&recv(&mut everything).await).unwrap();
        topics.push(received.topic().to_string());
    }
    topics.sort();
    assert_eq!(topics, vec!["first", "second"]);

    running.stop().await;
}

#[tokio::test]
async fn test_output_filters() {
    let ctx = Context::new();
    let mut lava = ctx.connect_sub("inproc://lava").await.unwrap();
    let mut everything = ctx.connect_sub("inproc://everything").await.unwrap();
    let running = start(BUS, &ctx).await;

    let producer = ctx.connect_push("inproc://producers").await.unwrap();
    let messages = [
        ("org.lavasoftware.job", r#"{"status": "running"}"#),
        ("org.example.job", r#"{"status": "complete"}"#),
        ("org.lavasoftware.job", "not json"),
        ("org.lavasoftware.job", r#"{"status": "complete"}"#),
    ];
    for (topic, payload) in messages {
        producer.send(envelope(topic, "lava", payload)).await.unwrap();
    }

    // Everything reaches the unfiltered output, in order.
    for (topic, payload) in messages {
        let received = Envelope::decode(&recv(&mut everything).await).unwrap();
        assert_eq!(received.topic(), topic);
        assert_eq!(received.payload(), &Bytes::copy_from_slice(payload.as_bytes()));
    }

    let received = Envelope::decode(&recv(&mut lava).await).unwrap();
    assert_eq!(received.payload(), &Bytes::from_static(br#"{"status": "complete"}"#));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), lava.recv())
            .await
            .is_err(),
        "filtered output forwarded an extra message"
    );

    running.stop().await;
}

#[tokio::test]
async fn test_heartbeat_output() {
    const HEARTBEAT: &str = r#"
outputs:
  - class: Pub
    name: beats
    options:
      url: inproc://beats
      heartbeat: { topic: org.reactobus.heartbeat, timeout: 0.1 }
"#;
    let ctx = Context::new();
    let mut beats = ctx.connect_sub("inproc://beats").await.unwrap();
    let running = start(HEARTBEAT, &ctx).await;

    for _ in 0..2 {
        let frames = recv(&mut beats).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Bytes::from_static(b"org.reactobus.heartbeat"));
        let elapsed: f64 = std::str::from_utf8(&frames[1]).unwrap().parse().unwrap();
        assert!(elapsed >= 0.09, "elapsed {}", elapsed);
    }

    running.stop().await;
}

#[tokio::test]
async fn test_stop_without_traffic() {
    let ctx = Context::new();
    let running = start(BUS, &ctx).await;
    running.stop().await;
}
