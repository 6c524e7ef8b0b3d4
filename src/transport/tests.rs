use std::time::Duration;

use bytes::Bytes;

use super::*;

fn message(parts: &[&str]) -> Frames {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

/// Reserve a local port for a tcp test.
fn free_tcp_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    format!("tcp://127.0.0.1:{}", port)
}

// ============================================================================
// Address parsing
// ============================================================================

#[test]
fn test_parse_addresses() {
    assert_eq!(
        "inproc://core".parse::<Address>().unwrap(),
        Address::Inproc("core".to_string())
    );
    assert_eq!(
        "tcp://0.0.0.0:5555".parse::<Address>().unwrap(),
        Address::Tcp("0.0.0.0:5555".to_string())
    );
    assert_eq!(
        "tcp://localhost:5555".parse::<Address>().unwrap().to_string(),
        "tcp://localhost:5555"
    );
}

#[test]
fn test_parse_invalid_addresses() {
    for address in ["", "core", "inproc://", "ipc:///tmp/sock", "udp://1.2.3.4:5"] {
        assert!(
            matches!(
                address.parse::<Address>(),
                Err(TransportError::InvalidAddress(_))
            ),
            "{} should be rejected",
            address
        );
    }
}

// ============================================================================
// In-process
// ============================================================================

#[tokio::test]
async fn test_inproc_push_pull_preserves_order() {
    let ctx = Context::new();
    let mut pull = ctx.bind_pull("inproc://pipe").await.unwrap();
    let push = ctx.connect_push("inproc://pipe").await.unwrap();

    for i in 0..10 {
        push.send(message(&["topic", &i.to_string()])).await.unwrap();
    }
    for i in 0..10 {
        assert_eq!(pull.recv().await.unwrap(), message(&["topic", &i.to_string()]));
    }
}

#[tokio::test]
async fn test_inproc_connect_before_bind() {
    let ctx = Context::new();
    let push = ctx.connect_push("inproc://early").await.unwrap();
    push.send(message(&["first"])).await.unwrap();

    let mut pull = ctx.bind_pull("inproc://early").await.unwrap();
    assert_eq!(pull.recv().await.unwrap(), message(&["first"]));
}

#[tokio::test]
async fn test_inproc_many_pushers_one_puller() {
    let ctx = Context::new();
    let mut pull = ctx.bind_pull("inproc://fan-in").await.unwrap();
    let a = ctx.connect_push("inproc://fan-in").await.unwrap();
    let b = ctx.connect_push("inproc://fan-in").await.unwrap();

    a.send(message(&["a"])).await.unwrap();
    b.send(message(&["b"])).await.unwrap();

    let mut received = vec![pull.recv().await.unwrap(), pull.recv().await.unwrap()];
    received.sort();
    assert_eq!(received, vec![message(&["a"]), message(&["b"])]);
}

#[tokio::test]
async fn test_inproc_push_blocks_when_queue_full() {
    let ctx = Context::with_pull_capacity(1);
    let mut pull = ctx.bind_pull("inproc://small").await.unwrap();
    let push = ctx.connect_push("inproc://small").await.unwrap();

    push.send(message(&["1"])).await.unwrap();
    let blocked = tokio::time::timeout(Duration::from_millis(50), push.send(message(&["2"]))).await;
    assert!(blocked.is_err(), "second send should wait for room");

    assert_eq!(pull.recv().await.unwrap(), message(&["1"]));
    push.send(message(&["3"])).await.unwrap();
    assert_eq!(pull.recv().await.unwrap(), message(&["3"]));
}

#[tokio::test]
async fn test_inproc_pub_fans_out_to_every_subscriber() {
    let ctx = Context::new();
    let publisher = ctx.bind_pub("inproc://events").await.unwrap();
    let mut first = ctx.connect_sub("inproc://events").await.unwrap();
    let mut second = ctx.connect_sub("inproc://events").await.unwrap();

    publisher.send(message(&["hello"])).await.unwrap();

    assert_eq!(first.recv().await.unwrap(), message(&["hello"]));
    assert_eq!(second.recv().await.unwrap(), message(&["hello"]));
}

#[tokio::test]
async fn test_inproc_pub_without_subscribers_drops() {
    let ctx = Context::new();
    let publisher = ctx.bind_pub("inproc://nobody").await.unwrap();
    publisher.send(message(&["lost"])).await.unwrap();

    let mut late = ctx.connect_sub("inproc://nobody").await.unwrap();
    publisher.send(message(&["seen"])).await.unwrap();
    assert_eq!(late.recv().await.unwrap(), message(&["seen"]));
}

#[tokio::test]
async fn test_inproc_pub_prunes_dropped_subscribers() {
    let ctx = Context::new();
    let publisher = ctx.bind_pub("inproc://prune").await.unwrap();
    let gone = ctx.connect_sub("inproc://prune").await.unwrap();
    let mut kept = ctx.connect_sub("inproc://prune").await.unwrap();
    drop(gone);

    publisher.send(message(&["still delivered"])).await.unwrap();
    assert_eq!(kept.recv().await.unwrap(), message(&["still delivered"]));
}

#[tokio::test]
async fn test_inproc_double_bind_fails() {
    let ctx = Context::new();
    let _pull = ctx.bind_pull("inproc://once").await.unwrap();
    assert!(matches!(
        ctx.bind_pull("inproc://once").await,
        Err(TransportError::AlreadyBound(_))
    ));

    let _publisher = ctx.bind_pub("inproc://once-pub").await.unwrap();
    assert!(matches!(
        ctx.bind_pub("inproc://once-pub").await,
        Err(TransportError::AlreadyBound(_))
    ));
}

#[tokio::test]
async fn test_inproc_pub_rebind_after_drop() {
    let ctx = Context::new();
    let mut subscriber = ctx.connect_sub("inproc://restarted").await.unwrap();

    let publisher = ctx.bind_pub("inproc://restarted").await.unwrap();
    drop(publisher);

    let publisher = ctx.bind_pub("inproc://restarted").await.unwrap();
    assert!(matches!(
        ctx.bind_pub("inproc://restarted").await,
        Err(TransportError::AlreadyBound(_))
    ));
    publisher.send(message(&["again"])).await.unwrap();
    assert_eq!(subscriber.recv().await.unwrap(), message(&["again"]));
}

#[tokio::test]
async fn test_inproc_pattern_mismatch() {
    let ctx = Context::new();
    let _pull = ctx.bind_pull("inproc://shared").await.unwrap();
    assert!(matches!(
        ctx.connect_sub("inproc://shared").await,
        Err(TransportError::PatternMismatch(_))
    ));
    assert!(matches!(
        ctx.bind_pub("inproc://shared").await,
        Err(TransportError::PatternMismatch(_))
    ));
}

#[tokio::test]
async fn test_contexts_are_isolated() {
    let first = Context::new();
    let second = Context::new();
    let _pull = first.bind_pull("inproc://same-name").await.unwrap();
    assert!(second.bind_pull("inproc://same-name").await.is_ok());
}

// ============================================================================
// TCP
// ============================================================================

#[tokio::test]
async fn test_tcp_push_pull() {
    let ctx = Context::new();
    let address = free_tcp_address();
    let mut pull = ctx.bind_pull(&address).await.unwrap();
    let push = ctx.connect_push(&address).await.unwrap();

    let frames = message(&["org.reactobus.test", "uuid", "", "user", "{}"]);
    push.send(frames.clone()).await.unwrap();
    push.send(message(&["second"])).await.unwrap();

    assert_eq!(pull.recv().await.unwrap(), frames);
    assert_eq!(pull.recv().await.unwrap(), message(&["second"]));
}

#[tokio::test]
async fn test_tcp_pub_sub() {
    let ctx = Context::new();
    let address = free_tcp_address();
    let publisher = ctx.bind_pub(&address).await.unwrap();
    let mut subscriber = ctx.connect_sub(&address).await.unwrap();

    // The subscription registers asynchronously: publish until it lands.
    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            publisher.send(message(&["tick"])).await.unwrap();
            if let Ok(frames) =
                tokio::time::timeout(Duration::from_millis(20), subscriber.recv()).await
            {
                return frames.unwrap();
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(received, message(&["tick"]));
}

#[tokio::test]
async fn test_tcp_double_bind_fails() {
    let ctx = Context::new();
    let address = free_tcp_address();
    let _pull = ctx.bind_pull(&address).await.unwrap();
    assert!(matches!(
        ctx.bind_pull(&address).await,
        Err(TransportError::AlreadyBound(_))
    ));
}

/// Publish `topic` until the subscriber sees it, skipping older messages.
async fn publish_until_received(
    publisher: &dyn FrameSink,
    subscriber: &mut Box<dyn FrameSource>,
    topic: &str,
) {
    let expected = message(&[topic]);
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            publisher.send(expected.clone()).await.unwrap();
            if let Ok(frames) =
                tokio::time::timeout(Duration::from_millis(20), subscriber.recv()).await
            {
                if frames.unwrap() == expected {
                    return;
                }
            }
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_tcp_subscriber_survives_publisher_restart() {
    let ctx = Context::new();
    let address = free_tcp_address();
    // Nothing listens yet: the subscriber keeps dialing.
    let mut subscriber = ctx.connect_sub(&address).await.unwrap();

    let publisher = ctx.bind_pub(&address).await.unwrap();
    publish_until_received(&*publisher, &mut subscriber, "before").await;
    drop(publisher);

    // The old listener closes asynchronously.
    let publisher = loop {
        match ctx.bind_pub(&address).await {
            Ok(publisher) => break publisher,
            Err(TransportError::AlreadyBound(_)) => {
                tokio::time::sleep(Duration::from_millis(10)).await
            }
            Err(e) => panic!("rebind failed: {}", e),
        }
    };
    publish_until_received(&*publisher, &mut subscriber, "after").await;
}

#[tokio::test]
async fn test_tcp_push_survives_puller_restart() {
    let ctx = Context::new();
    let address = free_tcp_address();
    let push = ctx.connect_push(&address).await.unwrap();

    let mut pull = ctx.bind_pull(&address).await.unwrap();
    push.send(message(&["before"])).await.unwrap();
    assert_eq!(pull.recv().await.unwrap(), message(&["before"]));
    drop(pull);

    let mut pull = loop {
        match ctx.bind_pull(&address).await {
            Ok(pull) => break pull,
            Err(TransportError::AlreadyBound(_)) => {
                tokio::time::sleep(Duration::from_millis(10)).await
            }
            Err(e) => panic!("rebind failed: {}", e),
        }
    };

    // Writes to the stale connection are lost until the reset is noticed.
    let received = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            push.send(message(&["after"])).await.unwrap();
            if let Ok(frames) = tokio::time::timeout(Duration::from_millis(20), pull.recv()).await
            {
                return frames.unwrap();
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(received, message(&["after"]));
}

#[tokio::test]
async fn test_tcp_push_send_waits_for_peer() {
    let ctx = Context::new();
    let address = free_tcp_address();
    let push = ctx.connect_push(&address).await.unwrap();

    let send = push.send(message(&["late"]));
    tokio::pin!(send);
    assert!(tokio::time::timeout(Duration::from_millis(200), &mut send)
        .await
        .is_err());

    let mut pull = ctx.bind_pull(&address).await.unwrap();
    tokio::time::timeout(Duration::from_secs(20), send)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pull.recv().await.unwrap(), message(&["late"]));
}
