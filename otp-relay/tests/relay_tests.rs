#![allow(missing_docs)]
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use otp_relay::{
    Broker, ClientError, Inbound, OverflowPolicy, QueueConfig, RelayClient, RelayConfig,
    RelayServer, UnknownRecipientPolicy,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct Relay {
    addr: SocketAddr,
    broker: Arc<Broker>,
    shutdown: Option<oneshot::Sender<()>>,
}

async fn start(config: RelayConfig) -> Relay {
    let config = RelayConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..config
    };
    let server = RelayServer::bind(&config).await.expect("Failed to bind relay");
    let addr = server.local_addr().unwrap();
    let broker = server.broker();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(server.run(async move {
        let _ = rx.await;
    }));
    Relay {
        addr,
        broker,
        shutdown: Some(tx),
    }
}

async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}

async fn eventually(mut check: impl FnMut() -> bool) {
    within(async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

fn message(sender: &str, payload: &str) -> Inbound {
    Inbound::Message {
        sender: sender.into(),
        payload: payload.into(),
    }
}

#[tokio::test]
async fn test_live_peers_exchange_payloads_untouched() {
    let relay = start(RelayConfig::default()).await;
    let mut alice = RelayClient::connect(relay.addr, "alice").await.unwrap();
    let mut bob = RelayClient::connect(relay.addr, "bob").await.unwrap();

    alice.send("bob", "K3Y9ZQ0A:2048:00ff|odd:bytes").await.unwrap();
    assert_eq!(
        within(bob.recv()).await.unwrap(),
        Some(message("alice", "K3Y9ZQ0A:2048:00ff|odd:bytes"))
    );

    bob.send("alice", "reply").await.unwrap();
    assert_eq!(within(alice.recv()).await.unwrap(), Some(message("bob", "reply")));
}

#[tokio::test]
async fn test_store_and_forward_preserves_order_without_duplicates() {
    let relay = start(RelayConfig::default()).await;

    // Bob has been seen once, so he is offline rather than unknown.
    drop(RelayClient::connect(relay.addr, "bob").await.unwrap());
    eventually(|| !relay.broker.is_registered("bob")).await;

    let mut alice = RelayClient::connect(relay.addr, "alice").await.unwrap();
    for m in ["m1", "m2", "m3"] {
        alice.send("bob", m).await.unwrap();
    }
    eventually(|| relay.broker.pending_len("bob") == 3).await;

    let mut bob = RelayClient::connect(relay.addr, "bob").await.unwrap();
    for m in ["m1", "m2", "m3"] {
        assert_eq!(within(bob.recv()).await.unwrap(), Some(message("alice", m)));
    }
    assert_eq!(relay.broker.pending_len("bob"), 0);

    alice.send("bob", "m4").await.unwrap();
    assert_eq!(within(bob.recv()).await.unwrap(), Some(message("alice", "m4")));
}

#[tokio::test]
async fn test_unknown_recipient_is_reported_and_sender_stays_connected() {
    let relay = start(RelayConfig::default()).await;
    let mut alice = RelayClient::connect(relay.addr, "alice").await.unwrap();

    alice.send("carol", "ABCDEFGH:00").await.unwrap();
    assert_eq!(
        within(alice.recv()).await.unwrap(),
        Some(Inbound::Notice("Recipient 'carol' not found.".into()))
    );
    assert_eq!(relay.broker.pending_len("carol"), 0);

    alice.send("alice", "still here").await.unwrap();
    assert_eq!(within(alice.recv()).await.unwrap(), Some(message("alice", "still here")));
}

#[tokio::test]
async fn test_queue_policy_holds_mail_for_never_seen_recipient() {
    let relay = start(RelayConfig {
        unknown_recipient: UnknownRecipientPolicy::Queue,
        ..RelayConfig::default()
    })
    .await;
    let mut alice = RelayClient::connect(relay.addr, "alice").await.unwrap();
    alice.send("carol", "hello").await.unwrap();
    eventually(|| relay.broker.pending_len("carol") == 1).await;

    let mut carol = RelayClient::connect(relay.addr, "carol").await.unwrap();
    assert_eq!(within(carol.recv()).await.unwrap(), Some(message("alice", "hello")));
}

#[tokio::test]
async fn test_reject_new_policy_answers_queue_full() {
    let relay = start(RelayConfig {
        unknown_recipient: UnknownRecipientPolicy::Queue,
        queue: QueueConfig {
            max_per_recipient: 1,
            overflow: OverflowPolicy::RejectNew,
            ..QueueConfig::default()
        },
        ..RelayConfig::default()
    })
    .await;
    let mut alice = RelayClient::connect(relay.addr, "alice").await.unwrap();
    alice.send("bob", "m1").await.unwrap();
    alice.send("bob", "m2").await.unwrap();
    assert_eq!(
        within(alice.recv()).await.unwrap(),
        Some(Inbound::Notice("Recipient 'bob' queue full.".into()))
    );

    let mut bob = RelayClient::connect(relay.addr, "bob").await.unwrap();
    assert_eq!(within(bob.recv()).await.unwrap(), Some(message("alice", "m1")));
}

#[tokio::test]
async fn test_concurrent_registration_has_exactly_one_winner() {
    let relay = start(RelayConfig::default()).await;
    let attempts: Vec<_> = (0..16)
        .map(|_| tokio::spawn(RelayClient::connect(relay.addr, "alice")))
        .collect();

    let mut winners = Vec::new();
    let mut refused = 0;
    for attempt in attempts {
        match within(attempt).await.unwrap() {
            Ok(client) => winners.push(client),
            Err(ClientError::Rejected(reply)) => {
                assert_eq!(reply, "UserID already taken. Connection closed.");
                refused += 1;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(refused, 15);
    assert_eq!(relay.broker.peer_count(), 1);
}

#[tokio::test]
async fn test_identifier_is_free_again_after_disconnect() {
    let relay = start(RelayConfig::default()).await;
    let alice = RelayClient::connect(relay.addr, "alice").await.unwrap();
    assert!(matches!(
        RelayClient::connect(relay.addr, "alice").await,
        Err(ClientError::Rejected(_))
    ));

    drop(alice);
    eventually(|| !relay.broker.is_registered("alice")).await;
    let again = RelayClient::connect(relay.addr, "alice").await.unwrap();
    assert_eq!(again.id(), "alice");
}

#[tokio::test]
async fn test_empty_identifier_is_refused() {
    let relay = start(RelayConfig::default()).await;
    match RelayClient::connect(relay.addr, "   ").await {
        Err(ClientError::Rejected(reply)) => {
            assert_eq!(reply, "Invalid userID. Connection closed.");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(relay.broker.peer_count(), 0);
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let relay = start(RelayConfig::default()).await;
    let stream = TcpStream::connect(relay.addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write.write_all(b"alice\r\n").await.unwrap();
    assert_eq!(
        within(lines.next_line()).await.unwrap().as_deref(),
        Some("Connected successfully.")
    );
    write.write_all(b"just some text\n").await.unwrap();
    assert_eq!(
        within(lines.next_line()).await.unwrap().as_deref(),
        Some("Invalid message format.")
    );
    write.write_all(b"alice|echo\n").await.unwrap();
    assert_eq!(
        within(lines.next_line()).await.unwrap().as_deref(),
        Some("alice|echo")
    );
}

#[tokio::test]
async fn test_close_collects_trailing_notices() {
    let relay = start(RelayConfig::default()).await;
    let mut alice = RelayClient::connect(relay.addr, "alice").await.unwrap();
    alice.send("nobody", "x").await.unwrap();
    let rest = within(alice.close()).await.unwrap();
    assert_eq!(rest, vec![Inbound::Notice("Recipient 'nobody' not found.".into())]);
    eventually(|| relay.broker.peer_count() == 0).await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let mut relay = start(RelayConfig::default()).await;
    let _ = relay.shutdown.take().unwrap().send(());
    within(async {
        while TcpStream::connect(relay.addr).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}
