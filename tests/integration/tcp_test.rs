//! Relay across TCP endpoints, as external producers and consumers see it.

use std::time::Duration;

use reactobus::{Context, Envelope};

use crate::common::{envelope, recv, start};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_tcp_pull_to_push_output() {
    let input = free_port();
    let output = free_port();
    let yaml = format!(
        r#"
inputs:
  - {{ class: Pull, name: producers, options: {{ url: "tcp://127.0.0.1:{input}" }} }}
outputs:
  - {{ class: Push, name: worker, options: {{ url: "tcp://127.0.0.1:{output}" }} }}
"#
    );

    // External consumers bind first: the push output connects to them.
    let consumers = Context::new();
    let mut worker = consumers
        .bind_pull(&format!("tcp://127.0.0.1:{}", output))
        .await
        .unwrap();

    let bus = Context::new();
    let running = start(&yaml, &bus).await;

    let producer = Context::new()
        .connect_push(&format!("tcp://127.0.0.1:{}", input))
        .await
        .unwrap();
    for i in 0..3 {
        producer
            .send(envelope("org.reactobus.tcp", "tcp", &format!(r#"{{"id": {}}}"#, i)))
            .await
            .unwrap();
    }

    for i in 0..3 {
        let received = Envelope::decode(&recv(&mut worker).await).unwrap();
        assert_eq!(received.topic(), "org.reactobus.tcp");
        assert_eq!(
            received.payload().as_ref(),
            format!(r#"{{"id": {}}}"#, i).as_bytes()
        );
    }

    running.stop().await;
}

#[tokio::test]
async fn test_tcp_pub_output() {
    let output = free_port();
    let yaml = format!(
        r#"
inputs:
  - {{ class: Pull, name: producers, options: {{ url: inproc://producers }} }}
outputs:
  - {{ class: Pub, name: public, options: {{ url: "tcp://127.0.0.1:{output}" }} }}
"#
    );

    let bus = Context::new();
    let running = start(&yaml, &bus).await;
    let mut subscriber = Context::new()
        .connect_sub(&format!("tcp://127.0.0.1:{}", output))
        .await
        .unwrap();
    let producer = bus.connect_push("inproc://producers").await.unwrap();

    // A late subscriber misses what was published before it joined.
    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            producer
                .send(envelope("org.reactobus.pub", "tcp", "{}"))
                .await
                .unwrap();
            if let Ok(Ok(frames)) =
                tokio::time::timeout(Duration::from_millis(50), subscriber.recv()).await
            {
                return frames;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(
        Envelope::decode(&received).unwrap().topic(),
        "org.reactobus.pub"
    );

    running.stop().await;
}
