//! Wire-level relay tests: raw WebSocket clients speaking the envelope
//! protocol against a relay on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use farsight_relay::RelayServer;
use weft_core::envelope::{
    self, ClientJoin, ClientJoined, Disconnect, EnvelopeTag, ErrorPayload, HostRegister,
    HostRegistered, Notice,
};
use weft_core::{is_valid_session_code, now_ms, FrameMessage, SESSION_CODE_LEN};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay() -> (Arc<RelayServer>, String) {
    let server = Arc::new(
        RelayServer::bind("127.0.0.1:0".parse().expect("addr"), Duration::from_secs(5))
            .await
            .expect("bind relay"),
    );
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(server.clone().run());
    (server, format!("ws://{addr}"))
}

async fn connect(url: &str) -> Ws {
    let (ws, _) = connect_async(url).await.expect("connect");
    ws
}

/// Next data message, or panic. Skips keepalive frames.
async fn recv(ws: &mut Ws) -> Vec<u8> {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Binary(data) => return data,
            Message::Text(text) => return text.into_bytes(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

/// Expect the stream to end (close frame or EOF) within the budget.
async fn expect_closed(ws: &mut Ws) {
    loop {
        match timeout(WAIT, ws.next()).await.expect("timed out waiting for close") {
            None => return,
            Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => continue,
            Some(Err(_)) => return,
        }
    }
}

async fn register_host(url: &str) -> (Ws, String) {
    let mut ws = connect(url).await;
    let register = envelope::encode(
        EnvelopeTag::HostRegister,
        &HostRegister {
            screen_width: Some(1280),
            screen_height: Some(720),
            fps: Some(30),
        },
    );
    ws.send(Message::Binary(register)).await.expect("register");

    let raw = recv(&mut ws).await;
    assert_eq!(envelope::tag_of(&raw), Some(EnvelopeTag::HostRegistered));
    let payload: HostRegistered = envelope::decode(&raw).expect("registered payload");
    (ws, payload.session_code)
}

async fn join_viewer(url: &str, code: &str) -> Ws {
    let mut ws = connect(url).await;
    let join = envelope::encode(
        EnvelopeTag::ClientJoin,
        &ClientJoin {
            session_code: code.to_string(),
        },
    );
    ws.send(Message::Binary(join)).await.expect("join");

    let raw = recv(&mut ws).await;
    assert_eq!(envelope::tag_of(&raw), Some(EnvelopeTag::ClientJoined));
    let payload: ClientJoined = envelope::decode(&raw).expect("joined payload");
    assert_eq!(payload.session_code, code.trim().to_ascii_uppercase());
    ws
}

async fn expect_error(ws: &mut Ws, expected: &str) {
    let raw = recv(ws).await;
    assert_eq!(envelope::tag_of(&raw), Some(EnvelopeTag::Error));
    let payload: ErrorPayload = envelope::decode(&raw).expect("error payload");
    assert_eq!(payload.error, expected);
}

fn sample_frame(frame_number: u32) -> Vec<u8> {
    FrameMessage {
        width: 1280,
        height: 720,
        frame_number,
        data: Bytes::from(vec![0xC3; 512]),
    }
    .encode(now_ms())
}

#[tokio::test]
async fn pairing_hands_out_a_valid_code_and_bridges_both_directions() {
    let (_server, url) = start_relay().await;

    let (mut host, code) = register_host(&url).await;
    assert_eq!(code.len(), SESSION_CODE_LEN);
    assert!(is_valid_session_code(&code));

    // The viewer may type the code sloppily; the relay normalizes.
    let sloppy = format!("  {}  ", code.to_ascii_lowercase());
    let mut viewer = join_viewer(&url, &sloppy).await;

    // Host learns about the attachment.
    let raw = recv(&mut host).await;
    assert_eq!(envelope::tag_of(&raw), Some(EnvelopeTag::ClientConnected));

    // Host -> viewer: frames arrive byte-identical.
    let wire = sample_frame(1);
    host.send(Message::Binary(wire.clone())).await.expect("send frame");
    assert_eq!(recv(&mut viewer).await, wire);

    // Viewer -> host: a control request envelope is forwarded opaquely.
    let request = envelope::encode(
        EnvelopeTag::RequestControl,
        &Notice::new("Requesting remote control"),
    );
    viewer
        .send(Message::Binary(request.clone()))
        .await
        .expect("send request");
    assert_eq!(recv(&mut host).await, request);
}

#[tokio::test]
async fn join_with_unknown_code_is_rejected_and_closed() {
    let (_server, url) = start_relay().await;

    let mut viewer = connect(&url).await;
    let join = envelope::encode(
        EnvelopeTag::ClientJoin,
        &ClientJoin {
            session_code: "AAAAAA".into(),
        },
    );
    viewer.send(Message::Binary(join)).await.expect("join");

    expect_error(&mut viewer, "Session not found: AAAAAA").await;
    expect_closed(&mut viewer).await;
}

#[tokio::test]
async fn join_without_code_is_rejected() {
    let (_server, url) = start_relay().await;

    let mut viewer = connect(&url).await;
    let join = envelope::encode(
        EnvelopeTag::ClientJoin,
        &ClientJoin {
            session_code: "   ".into(),
        },
    );
    viewer.send(Message::Binary(join)).await.expect("join");

    expect_error(&mut viewer, "Session code required").await;
    expect_closed(&mut viewer).await;
}

#[tokio::test]
async fn second_viewer_is_rejected_without_disturbing_the_pair() {
    let (_server, url) = start_relay().await;

    let (mut host, code) = register_host(&url).await;
    let mut viewer = join_viewer(&url, &code).await;
    let _ = recv(&mut host).await; // CLIENT_CONNECTED

    let mut intruder = connect(&url).await;
    let join = envelope::encode(
        EnvelopeTag::ClientJoin,
        &ClientJoin {
            session_code: code.clone(),
        },
    );
    intruder.send(Message::Binary(join)).await.expect("join");
    expect_error(&mut intruder, "Session already has a client connected").await;
    expect_closed(&mut intruder).await;

    // The established pair still forwards.
    let wire = sample_frame(2);
    host.send(Message::Binary(wire.clone())).await.expect("send frame");
    assert_eq!(recv(&mut viewer).await, wire);
}

#[tokio::test]
async fn viewer_drop_keeps_the_session_open_for_rejoin() {
    let (_server, url) = start_relay().await;

    let (mut host, code) = register_host(&url).await;
    let viewer = join_viewer(&url, &code).await;
    let _ = recv(&mut host).await; // CLIENT_CONNECTED

    // Abrupt viewer exit.
    drop(viewer);

    let raw = recv(&mut host).await;
    assert_eq!(envelope::tag_of(&raw), Some(EnvelopeTag::Disconnect));
    let bye: Disconnect = envelope::decode(&raw).expect("disconnect payload");
    assert_eq!(bye.why(), "Client disconnected");

    // The same code admits a new viewer and forwarding resumes.
    let mut second = join_viewer(&url, &code).await;
    let raw = recv(&mut host).await;
    assert_eq!(envelope::tag_of(&raw), Some(EnvelopeTag::ClientConnected));

    let wire = sample_frame(3);
    host.send(Message::Binary(wire.clone())).await.expect("send frame");
    assert_eq!(recv(&mut second).await, wire);
}

#[tokio::test]
async fn host_drop_collapses_the_session() {
    let (_server, url) = start_relay().await;

    let (host, code) = register_host(&url).await;
    let mut viewer = join_viewer(&url, &code).await;

    drop(host);

    let raw = recv(&mut viewer).await;
    assert_eq!(envelope::tag_of(&raw), Some(EnvelopeTag::Disconnect));
    let bye: Disconnect = envelope::decode(&raw).expect("disconnect payload");
    assert_eq!(bye.why(), "Host disconnected");
    expect_closed(&mut viewer).await;

    // The code is gone from the registry.
    let mut late = connect(&url).await;
    let join = envelope::encode(
        EnvelopeTag::ClientJoin,
        &ClientJoin {
            session_code: code.clone(),
        },
    );
    late.send(Message::Binary(join)).await.expect("join");
    expect_error(&mut late, &format!("Session not found: {code}")).await;
}

#[tokio::test]
async fn wrong_first_message_is_rejected() {
    let (_server, url) = start_relay().await;

    let mut ws = connect(&url).await;
    ws.send(Message::Binary(vec![0x99, 1, 2, 3]))
        .await
        .expect("send");
    expect_error(&mut ws, "Expected HOST_REGISTER or CLIENT_JOIN, got 153").await;
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn empty_first_message_is_rejected() {
    let (_server, url) = start_relay().await;

    let mut ws = connect(&url).await;
    ws.send(Message::Binary(Vec::new())).await.expect("send");
    expect_error(&mut ws, "Empty message").await;
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn host_traffic_before_a_viewer_attaches_is_dropped() {
    let (_server, url) = start_relay().await;

    let (mut host, code) = register_host(&url).await;

    // No receiver yet: these frames go nowhere.
    for n in 0..3 {
        host.send(Message::Binary(sample_frame(n)))
            .await
            .expect("send frame");
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut viewer = join_viewer(&url, &code).await;
    let _ = recv(&mut host).await; // CLIENT_CONNECTED

    let wire = sample_frame(42);
    host.send(Message::Binary(wire.clone())).await.expect("send frame");

    // The first thing the viewer sees is the post-join frame.
    assert_eq!(recv(&mut viewer).await, wire);
}
