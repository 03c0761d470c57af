//! Two peers wired back to back over in-memory datagram links.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use tokio::sync::mpsc;
use tokio::time::timeout;

use p2pke::application::Settings;
use p2pke::crypto_impl::{DefaultSuite, Ed25519Authenticator};
use p2pke::result::SendError;
use p2pke::Channel;

type Link = Box<dyn Fn(&[u8]) + Send + Sync>;
type TestChannel = Channel<DefaultSuite, Link>;

struct Peer {
    channel: TestChannel,
    received: mpsc::UnboundedReceiver<Vec<u8>>,
}

fn test_settings(retry_ms: u64) -> Settings {
    Settings::new_ms(retry_ms, 500, 3_600_000, 120_000)
}

fn identities() -> (Ed25519Authenticator, Ed25519Authenticator) {
    let a = SigningKey::generate(&mut OsRng);
    let b = SigningKey::generate(&mut OsRng);
    (
        Ed25519Authenticator::new(a.clone(), b.verifying_key()),
        Ed25519Authenticator::new(b, a.verifying_key()),
    )
}

/// Forward every datagram arriving on `rx` into `channel`, pushing decrypted
/// payloads into the returned receiver. Delivery errors are ignored, the
/// same way a real socket loop would drop bad datagrams.
fn pump(channel: &TestChannel, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (payload_tx, payload_rx) = mpsc::unbounded_channel();
    let channel = channel.clone();
    tokio::spawn(async move {
        while let Some(datagram) = rx.recv().await {
            let mut out = Vec::new();
            if let Ok(true) = channel.deliver(&datagram, &mut out) {
                let _ = payload_tx.send(out);
            }
        }
    });
    payload_rx
}

/// Build two channels joined by lossless in-memory links. The retry
/// intervals are deliberately identical: simultaneous opens must converge
/// even when both peers retry in perfect lockstep.
fn connected_pair() -> (Peer, Peer) {
    let (auth_a, auth_b) = identities();
    let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let a: TestChannel = Channel::new(
        Arc::new(auth_a),
        OsRng,
        test_settings(20),
        Box::new(move |datagram: &[u8]| {
            let _ = a_to_b_tx.send(datagram.to_vec());
        }) as Link,
    );
    let b: TestChannel = Channel::new(
        Arc::new(auth_b),
        OsRng,
        test_settings(20),
        Box::new(move |datagram: &[u8]| {
            let _ = b_to_a_tx.send(datagram.to_vec());
        }) as Link,
    );

    let a_received = pump(&a, b_to_a_rx);
    let b_received = pump(&b, a_to_b_rx);
    (
        Peer { channel: a, received: a_received },
        Peer { channel: b, received: b_received },
    )
}

async fn recv(peer: &mut Peer) -> Vec<u8> {
    timeout(Duration::from_secs(5), peer.received.recv())
        .await
        .expect("timed out waiting for a payload")
        .expect("link closed")
}

#[tokio::test]
async fn send_establishes_a_session_and_delivers() {
    let (mut a, mut b) = connected_pair();

    timeout(Duration::from_secs(5), a.channel.send(b"first contact"))
        .await
        .expect("send timed out")
        .unwrap();
    assert_eq!(recv(&mut b).await, b"first contact");

    // The responder side can answer over the same session without any
    // further handshaking.
    b.channel.send(b"reply").await.unwrap();
    assert_eq!(recv(&mut a).await, b"reply");

    assert!(a.channel.is_ready() && b.channel.is_ready());
    assert_eq!(a.channel.channel_binding(), b.channel.channel_binding());
    assert!(a.channel.channel_binding().is_some());
}

#[tokio::test]
async fn concurrent_senders_all_complete() {
    let (a, mut b) = connected_pair();

    let mut handles = Vec::new();
    for i in 0u8..8 {
        let channel = a.channel.clone();
        handles.push(tokio::spawn(async move { channel.send(&[i]).await }));
    }
    for handle in handles {
        timeout(Duration::from_secs(5), handle).await.expect("send timed out").unwrap().unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..8 {
        let payload = recv(&mut b).await;
        assert_eq!(payload.len(), 1);
        seen.push(payload[0]);
    }
    seen.sort_unstable();
    assert_eq!(seen, (0u8..8).collect::<Vec<u8>>());
}

#[tokio::test]
async fn handshake_survives_datagram_loss() {
    let (auth_a, auth_b) = identities();
    let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    // Drop the first three datagrams A emits; the retry timer has to carry
    // the handshake through.
    let dropped = AtomicUsize::new(0);
    let a: TestChannel = Channel::new(
        Arc::new(auth_a),
        OsRng,
        test_settings(20),
        Box::new(move |datagram: &[u8]| {
            if dropped.fetch_add(1, Ordering::Relaxed) >= 3 {
                let _ = a_to_b_tx.send(datagram.to_vec());
            }
        }) as Link,
    );
    let b: TestChannel = Channel::new(
        Arc::new(auth_b),
        OsRng,
        test_settings(20),
        Box::new(move |datagram: &[u8]| {
            let _ = b_to_a_tx.send(datagram.to_vec());
        }) as Link,
    );
    let _a_received = pump(&a, b_to_a_rx);
    let mut b_received = pump(&b, a_to_b_rx);

    timeout(Duration::from_secs(5), a.send(b"persistent"))
        .await
        .expect("send timed out")
        .unwrap();
    let payload = timeout(Duration::from_secs(5), b_received.recv())
        .await
        .expect("timed out waiting for a payload")
        .unwrap();
    assert_eq!(payload, b"persistent");
}

#[tokio::test]
async fn simultaneous_open_converges() {
    let (mut a, mut b) = connected_pair();

    let from_a = {
        let channel = a.channel.clone();
        tokio::spawn(async move { channel.send(b"from a").await })
    };
    let from_b = {
        let channel = b.channel.clone();
        tokio::spawn(async move { channel.send(b"from b").await })
    };
    timeout(Duration::from_secs(5), from_a).await.expect("send timed out").unwrap().unwrap();
    timeout(Duration::from_secs(5), from_b).await.expect("send timed out").unwrap().unwrap();

    assert_eq!(recv(&mut b).await, b"from a");
    assert_eq!(recv(&mut a).await, b"from b");
}

#[tokio::test]
async fn close_fails_new_and_parked_sends() {
    // No peer at all: sends park forever until close wakes them.
    let (auth_a, _) = identities();
    let channel: TestChannel = Channel::new(
        Arc::new(auth_a),
        OsRng,
        test_settings(20),
        Box::new(|_: &[u8]| {}) as Link,
    );

    let parked = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.send(b"never").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    channel.close();

    let result = timeout(Duration::from_secs(5), parked).await.expect("close did not wake the sender").unwrap();
    assert_eq!(result, Err(SendError::ChannelClosed));
    assert_eq!(channel.send(b"after close").await, Err(SendError::ChannelClosed));
}
