//! Drives the signaling server over real sockets.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use telecall_common::Signal;
use telecall_common::config::LimitsConfig;
use telecall_common::models::{ConnectionId, OutgoingMessage, RoomMessage, SessionDescription};
use telecall_common::signal::{OfferPayload, Route, UserRegistration};
use telecall_signal::{SignalState, build_router};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

async fn spawn_server() -> SocketAddr {
    let limits = LimitsConfig {
        max_message_length: 20,
        max_history: 100,
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(SignalState::new(limits));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct TestPeer {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    id: ConnectionId,
}

impl TestPeer {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}/signal")).await.unwrap();
        let mut peer = Self { ws, id: ConnectionId::from("") };
        match peer.recv().await {
            Signal::ConnectionAssigned(id) => peer.id = id,
            other => panic!("expected socket-id first, got {other:?}"),
        }
        peer
    }

    async fn send(&mut self, signal: Signal) {
        self.ws.send(Message::text(signal.encode().unwrap())).await.unwrap();
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::text(text)).await.unwrap();
    }

    async fn recv(&mut self) -> Signal {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let msg = self.ws.next().await.expect("socket closed").unwrap();
                if let Message::Text(text) = msg {
                    return Signal::decode(text.as_str()).unwrap();
                }
            }
        })
        .await
        .expect("timed out waiting for a signal")
    }

    async fn register(&mut self, name: &str) -> Vec<ConnectionId> {
        self.send(Signal::RegisterUser(UserRegistration {
            username: name.into(),
            user_id: None,
        }))
        .await;
        self.roster().await
    }

    /// Next roster broadcast's connection ids.
    async fn roster(&mut self) -> Vec<ConnectionId> {
        match self.recv().await {
            Signal::UserJoined(u) | Signal::UserLeft(u) => {
                u.users.into_iter().map(|e| e.id).collect()
            }
            other => panic!("expected roster broadcast, got {other:?}"),
        }
    }

    async fn say(&mut self, room: &str, content: &str) {
        self.send(Signal::SendMessage(OutgoingMessage {
            room_id: room.into(),
            sender_user_id: None,
            sender_display_name: "Tester".into(),
            content: content.into(),
        }))
        .await;
    }

    async fn expect_message(&mut self) -> RoomMessage {
        match self.recv().await {
            Signal::ReceiveMessage(m) => m,
            other => panic!("expected receive-message, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn every_socket_gets_its_own_id() {
    let addr = spawn_server().await;
    let a = TestPeer::connect(addr).await;
    let b = TestPeer::connect(addr).await;
    assert!(!a.id.as_str().is_empty());
    assert_ne!(a.id, b.id);
}

#[tokio::test]
async fn registration_broadcasts_roster_to_all_sockets() {
    let addr = spawn_server().await;
    let mut a = TestPeer::connect(addr).await;
    let mut b = TestPeer::connect(addr).await;

    assert_eq!(a.register("Alice").await, vec![a.id.clone()]);
    // b has not registered yet but still hears about a
    assert_eq!(b.roster().await, vec![a.id.clone()]);

    let both = vec![a.id.clone(), b.id.clone()];
    assert_eq!(b.register("Bob").await, both);
    assert_eq!(a.roster().await, both);
}

#[tokio::test]
async fn bare_string_registration_is_accepted() {
    let addr = spawn_server().await;
    let mut a = TestPeer::connect(addr).await;
    a.send_raw(r#"{"event":"register-user","data":"Alice"}"#).await;
    match a.recv().await {
        Signal::UserJoined(u) => {
            assert_eq!(u.user_id, a.id);
            assert_eq!(u.users[0].username, "Alice");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn directed_signals_carry_the_real_sender() {
    let addr = spawn_server().await;
    let mut a = TestPeer::connect(addr).await;
    let mut b = TestPeer::connect(addr).await;

    a.send(Signal::Offer(OfferPayload {
        to: b.id.clone(),
        from: "spoofed".into(),
        offer: SessionDescription::offer("v=0"),
        username: "Alice".into(),
    }))
    .await;

    match b.recv().await {
        Signal::Offer(offer) => {
            assert_eq!(offer.from, a.id);
            assert_eq!(offer.username, "Alice");
            assert_eq!(offer.offer.sdp, "v=0");
        }
        other => panic!("unexpected {other:?}"),
    }

    b.send(Signal::EndCall(Route { to: a.id.clone(), from: b.id.clone() })).await;
    assert_eq!(
        a.recv().await,
        Signal::EndCall(Route { to: a.id.clone(), from: b.id.clone() })
    );
}

#[tokio::test]
async fn unknown_targets_and_garbage_are_dropped() {
    let addr = spawn_server().await;
    let mut a = TestPeer::connect(addr).await;

    a.send(Signal::EndCall(Route { to: "nobody".into(), from: a.id.clone() })).await;
    a.send_raw("not json").await;
    a.send_raw(r#"{"event":"user-joined","data":{"userId":"x","users":[]}}"#).await;

    // socket is still usable and nothing was echoed back
    assert_eq!(a.register("Alice").await, vec![a.id.clone()]);
}

#[tokio::test]
async fn closing_a_socket_broadcasts_user_left() {
    let addr = spawn_server().await;
    let mut a = TestPeer::connect(addr).await;
    let mut b = TestPeer::connect(addr).await;
    a.register("Alice").await;
    b.roster().await;
    b.register("Bob").await;
    a.roster().await;

    let gone = b.id.clone();
    b.ws.close(None).await.unwrap();

    match a.recv().await {
        Signal::UserLeft(u) => {
            assert_eq!(u.user_id, gone);
            let ids: Vec<_> = u.users.into_iter().map(|e| e.id).collect();
            assert_eq!(ids, vec![a.id.clone()]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn room_messages_reach_members_and_history() {
    let addr = spawn_server().await;
    let mut a = TestPeer::connect(addr).await;
    let mut b = TestPeer::connect(addr).await;
    let mut outsider = TestPeer::connect(addr).await;

    // each join is confirmed by the member's own echo
    a.send(Signal::JoinAppointment("appt-1".into())).await;
    a.say("appt-1", "here").await;
    let here = a.expect_message().await;
    b.send(Signal::JoinAppointment("appt-1".into())).await;
    b.say("appt-1", "ready").await;
    let ready = b.expect_message().await;
    assert_eq!(a.expect_message().await, ready);

    a.say("appt-1", "hello").await;
    let hello = a.expect_message().await;
    assert_eq!(b.expect_message().await, hello);
    assert!(here.id < ready.id && ready.id < hello.id);
    assert_eq!(hello.room_id, "appt-1");

    // blank and over-long lines are rejected without an echo
    a.say("appt-1", "   ").await;
    a.say("appt-1", &"x".repeat(21)).await;
    a.send(Signal::JoinAppointment("sync".into())).await;
    a.say("sync", "done").await;
    assert_eq!(a.expect_message().await.content, "done");

    // non-members may post but get no echo
    outsider.say("appt-1", "not a member").await;
    outsider.send(Signal::JoinAppointment("lobby".into())).await;
    outsider.say("lobby", "sync").await;
    assert_eq!(outsider.expect_message().await.content, "sync");

    let history: Vec<RoomMessage> =
        reqwest::get(format!("http://{addr}/api/appointments/appt-1/messages"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[..3], [here, ready, hello]);
    assert_eq!(history[3].content, "not a member");
}

#[tokio::test]
async fn history_of_unknown_room_is_empty() {
    let addr = spawn_server().await;
    let resp = reqwest::get(format!("http://{addr}/api/appointments/nothing/messages"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let history: Vec<RoomMessage> = resp.json().await.unwrap();
    assert!(history.is_empty());

    let long = "r".repeat(300);
    let resp = reqwest::get(format!("http://{addr}/api/appointments/{long}/messages"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_counts() {
    let addr = spawn_server().await;
    let mut a = TestPeer::connect(addr).await;
    let _b = TestPeer::connect(addr).await;
    a.register("Alice").await;

    let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["connections"], 2);
    assert_eq!(health["registered"], 1);
}
