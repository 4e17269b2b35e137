//! Teardown paths: explicit, server-initiated, fatal errors and cancellation.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use cablecar_client::transport::{DialRequest, Dialed, Dialer};
use cablecar_client::{connect, connect_with, ConnectionState, ExecContext};
use cablecar_core::error::{CableError, Result};
use cablecar_core::protocol::{Codec, Envelope, Kind};

use support::{options, MockCable, Push, ALL_CODECS};

const SETTLE: Duration = Duration::from_secs(2);

#[tokio::test]
async fn concurrent_disconnects_close_once() {
    let mock = MockCable::start(Codec::Json).await;
    let client = connect(&mock.url, options(Codec::Json), ExecContext::default())
        .await
        .unwrap();

    let calls: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.disconnect().await })
        })
        .collect();
    for call in calls {
        call.await.unwrap();
    }
    client.disconnect().await;

    assert!(mock.eventually(SETTLE, |m| m.close_frames() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.close_frames(), 1);
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn sends_fail_after_disconnect() {
    let mock = MockCable::start(Codec::Msgpack).await;
    let client = connect(&mock.url, options(Codec::Msgpack), ExecContext::default())
        .await
        .unwrap();
    let room = client.subscribe("Room", json!({"id": 1})).await.unwrap();

    client.disconnect().await;
    assert!(client.is_closed());

    let err = room.perform("speak", json!({"text": "late"})).await.unwrap_err();
    assert_eq!(err.code().as_str(), "SEND");
    let err = client.subscribe("Room", json!({"id": 2})).await.unwrap_err();
    assert_eq!(err.code().as_str(), "SEND");
}

#[tokio::test]
async fn server_disconnect_tears_down() {
    let mock = MockCable::start(Codec::Protobuf).await;
    let client = connect(&mock.url, options(Codec::Protobuf), ExecContext::default())
        .await
        .unwrap();

    mock.push_envelope(Envelope {
        reason: Some("server_restart".into()),
        reconnect: Some(true),
        ..Envelope::control(Kind::Disconnect)
    });

    tokio::time::timeout(SETTLE, client.closed()).await.unwrap();
    assert!(client.is_closed());
    assert!(mock.eventually(SETTLE, |m| m.close_frames() == 1).await);
}

#[tokio::test]
async fn server_disconnect_delivers_frames_read_before_it() {
    const SENT: usize = 200;
    for codec in ALL_CODECS {
        let mock = MockCable::start(codec).await;
        let client = connect(&mock.url, options(codec), ExecContext::default())
            .await
            .unwrap();
        let room = client.subscribe("Room", json!({"id": 1})).await.unwrap();
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = handled.clone();
        room.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for n in 0..SENT {
            mock.push_envelope(Envelope::broadcast(room.identifier(), json!({ "n": n })));
        }
        mock.push_envelope(Envelope::control(Kind::Disconnect));

        tokio::time::timeout(SETTLE, client.closed()).await.unwrap();
        let got = room.receive_n(SENT, Value::Null).await.unwrap();
        let expected: Vec<Value> = (0..SENT).map(|n| json!({ "n": n })).collect();
        assert_eq!(got, expected, "codec={}", codec.as_str());
        assert_eq!(handled.load(Ordering::SeqCst), SENT, "codec={}", codec.as_str());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_may_query_the_client() {
    let mock = MockCable::start(Codec::Json).await;
    let client = connect(&mock.url, options(Codec::Json), ExecContext::default())
        .await
        .unwrap();
    let room = client.subscribe("Room", json!({"id": 1})).await.unwrap();

    let observed = Arc::new(AtomicUsize::new(0));
    {
        let client = client.clone();
        let observed = observed.clone();
        room.on_message(move |_| {
            if !client.is_closed() && client.state() == ConnectionState::Open {
                observed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
    }

    mock.push_envelope(Envelope::broadcast(room.identifier(), json!("hello")));
    let deadline = tokio::time::Instant::now() + SETTLE;
    while observed.load(Ordering::SeqCst) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "handler never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tokio::time::timeout(SETTLE, client.disconnect()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(mock.eventually(SETTLE, |m| m.close_frames() == 1).await);
}

#[tokio::test]
async fn peer_close_frame_marks_closed() {
    let mock = MockCable::start(Codec::Json).await;
    let client = connect(&mock.url, options(Codec::Json), ExecContext::default())
        .await
        .unwrap();

    mock.push(Push::Close(1000));
    tokio::time::timeout(SETTLE, client.closed()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn undecodable_frame_is_fatal() {
    let mock = MockCable::start(Codec::Msgpack).await;
    let client = connect(&mock.url, options(Codec::Msgpack), ExecContext::default())
        .await
        .unwrap();

    // Text frame on a binary profile.
    mock.push(Push::Text("{}".into()));
    tokio::time::timeout(SETTLE, client.closed()).await.unwrap();
    assert!(client.is_closed());
}

#[tokio::test]
async fn cancellation_closes_the_socket() {
    let mock = MockCable::start(Codec::Json).await;
    let cancel = CancellationToken::new();
    let client = connect(&mock.url, options(Codec::Json), ExecContext::new(cancel.clone()))
        .await
        .unwrap();

    cancel.cancel();
    tokio::time::timeout(SETTLE, client.closed()).await.unwrap();
    assert!(mock.eventually(SETTLE, |m| m.close_frames() == 1).await);
}

#[tokio::test]
async fn run_loop_stops_when_predicate_is_done() {
    let mock = MockCable::start(Codec::Json).await;
    let client = connect(&mock.url, options(Codec::Json), ExecContext::default())
        .await
        .unwrap();

    let rounds = AtomicUsize::new(0);
    let counter = &rounds;
    client
        .run_loop(move || async move { counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 })
        .await;
    assert_eq!(rounds.load(Ordering::SeqCst), 3);
    assert_eq!(client.state(), ConnectionState::Open);
    client.disconnect().await;
}

#[tokio::test]
async fn run_loop_disconnects_on_cancellation() {
    let mock = MockCable::start(Codec::Json).await;
    let cancel = CancellationToken::new();
    let client = connect(&mock.url, options(Codec::Json), ExecContext::new(cancel.clone()))
        .await
        .unwrap();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    tokio::time::timeout(
        SETTLE,
        client.run_loop(|| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            false
        }),
    )
    .await
    .unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn missing_welcome_is_a_connect_error() {
    let mock = MockCable::builder(Codec::Json)
        .greeting(vec![Envelope::broadcast("x", json!("too early"))])
        .start()
        .await;
    let err = connect(&mock.url, options(Codec::Json), ExecContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "CONNECT");
}

#[tokio::test]
async fn pings_before_welcome_are_skipped() {
    let mock = MockCable::builder(Codec::Protobuf)
        .greeting(vec![
            Envelope::control(Kind::Ping),
            Envelope::control(Kind::Ping),
            Envelope::control(Kind::Welcome),
        ])
        .start()
        .await;
    let client = connect(&mock.url, options(Codec::Protobuf), ExecContext::default())
        .await
        .unwrap();
    assert_eq!(client.state(), ConnectionState::Open);
    client.disconnect().await;
}

#[tokio::test]
async fn silent_server_hits_the_handshake_timeout() {
    let mock = MockCable::builder(Codec::Json).greeting(vec![]).start().await;
    let mut opts = options(Codec::Json);
    opts.handshake_timeout_s = 1;

    let err = connect(&mock.url, opts, ExecContext::default()).await.unwrap_err();
    assert_eq!(err.code().as_str(), "CONNECT");
}

struct RefusingDialer {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Dialer for RefusingDialer {
    async fn dial(&self, req: &DialRequest) -> Result<Dialed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(req.subprotocol, "actioncable-v1-msgpack");
        Err(CableError::Connect("refused".into()))
    }
}

#[tokio::test]
async fn dial_failures_surface_as_connect_errors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dialer = RefusingDialer { calls: calls.clone() };
    let err = connect_with(
        &dialer,
        "ws://127.0.0.1:9/cable",
        options(Codec::Msgpack),
        ExecContext::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code().as_str(), "CONNECT");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_options_fail_before_dialing() {
    let mut opts = options(Codec::Json);
    opts.receive_timeout_ms = 0;
    let err = connect("ws://127.0.0.1:9/cable", opts, ExecContext::default())
        .await
        .unwrap_err();
    assert_eq!(err.code().as_str(), "CONFIG");
}
