//! End-to-end tests: real WebSocket clients against a running server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use quizroom::prelude::*;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

const CORRECT: usize = 1;

fn questions() -> QuestionList {
    QuestionList::new(
        (1..=5)
            .map(|i| Question {
                id: format!("q{i}").as_str().into(),
                prompt: format!("Question {i}?"),
                options: vec!["no".into(), "yes".into(), "maybe".into()],
                correct_index: CORRECT,
                media_url: None,
            })
            .collect(),
    )
}

fn one_round() -> GameConfig {
    GameConfig {
        total_rounds: 1,
        round_time_limit: Duration::from_secs(5),
        ..GameConfig::default()
    }
}

/// Starts a server on a random port and returns the address.
async fn start_server(idle_timeout: Duration) -> String {
    let server = QuizServer::builder()
        .bind("127.0.0.1:0")
        .source(questions())
        .game_config(one_round())
        .idle_timeout(idle_timeout)
        .build()
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();

    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

struct Client {
    ws: ClientWs,
    seq: u64,
}

impl Client {
    /// Connects and consumes the `Welcome` frame.
    async fn connect(addr: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("should connect");
        let mut client = Self { ws, seq: 0 };
        match client.recv().await {
            ServerMessage::Welcome {
                protocol_version, ..
            } => assert_eq!(protocol_version, PROTOCOL_VERSION),
            other => panic!("expected Welcome, got {other:?}"),
        }
        client
    }

    async fn send(&mut self, payload: ClientMessage) {
        let envelope = Envelope {
            seq: self.seq,
            timestamp: 0,
            payload,
        };
        self.seq += 1;
        let text = serde_json::to_string(&envelope).expect("encode");
        self.ws
            .send(Message::Text(text.into()))
            .await
            .expect("send");
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_owned().into()))
            .await
            .expect("send");
    }

    async fn recv(&mut self) -> ServerMessage {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(10), self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("recv failed");
            if msg.is_text() || msg.is_binary() {
                let env: Envelope<ServerMessage> =
                    serde_json::from_slice(&msg.into_data()).expect("decode");
                return env.payload;
            }
        }
    }

    async fn recv_until(
        &mut self,
        pred: impl Fn(&ServerMessage) -> bool,
    ) -> ServerMessage {
        loop {
            let msg = self.recv().await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    /// Round-trips a heartbeat and returns everything received before
    /// the ack.
    async fn sync(&mut self) -> Vec<ServerMessage> {
        self.send(ClientMessage::Heartbeat { client_time: 77 }).await;
        let mut before = Vec::new();
        loop {
            match self.recv().await {
                ServerMessage::HeartbeatAck { client_time, .. } => {
                    assert_eq!(client_time, 77);
                    return before;
                }
                other => before.push(other),
            }
        }
    }
}

async fn create(client: &mut Client, room: &str, name: &str) -> PlayerId {
    client
        .send(ClientMessage::CreateRoom {
            room_id: RoomId::new(room),
            player_name: name.into(),
        })
        .await;
    joined(client).await
}

async fn join(client: &mut Client, room: &str, name: &str) -> PlayerId {
    client
        .send(ClientMessage::JoinRoom {
            room_id: RoomId::new(room),
            player_name: name.into(),
        })
        .await;
    joined(client).await
}

async fn joined(client: &mut Client) -> PlayerId {
    match client.recv().await {
        ServerMessage::RoomJoined { player_id, .. } => player_id,
        other => panic!("expected RoomJoined, got {other:?}"),
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_connect_receives_welcome() {
    let addr = start_server(Duration::from_secs(60)).await;
    let mut client = Client::connect(&addr).await;
    assert!(client.sync().await.is_empty());
}

#[tokio::test]
async fn test_join_notifies_existing_members() {
    let addr = start_server(Duration::from_secs(60)).await;
    let mut alice = Client::connect(&addr).await;
    let mut bob = Client::connect(&addr).await;

    let alice_id = create(&mut alice, "R1", "Alice").await;
    let bob_id = join(&mut bob, "R1", "Bob").await;
    assert_ne!(alice_id, bob_id);

    match alice.recv().await {
        ServerMessage::PlayerJoined { player } => {
            assert_eq!(player.id, bob_id);
            assert_eq!(player.name, "Bob");
        }
        other => panic!("expected PlayerJoined, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_game_over_websocket() {
    let addr = start_server(Duration::from_secs(60)).await;
    let mut alice = Client::connect(&addr).await;
    let mut bob = Client::connect(&addr).await;
    let alice_id = create(&mut alice, "R1", "Alice").await;
    join(&mut bob, "R1", "Bob").await;

    alice.send(ClientMessage::StartGame).await;
    let round = match bob
        .recv_until(|m| matches!(m, ServerMessage::RoundStarted { .. }))
        .await
    {
        ServerMessage::RoundStarted { round } => round,
        _ => unreachable!(),
    };
    assert_eq!(round.ordinal, 1);
    assert_eq!(round.total_rounds, 1);
    assert_eq!(round.question.options.len(), 3);

    alice
        .send(ClientMessage::SubmitAnswer {
            round: 1,
            choice: CORRECT,
        })
        .await;
    let accepted = alice
        .recv_until(|m| matches!(m, ServerMessage::AnswerAccepted { .. }))
        .await;
    assert!(matches!(
        accepted,
        ServerMessage::AnswerAccepted { correct: true, .. }
    ));

    bob.send(ClientMessage::SubmitAnswer { round: 1, choice: 0 })
        .await;

    let ended = bob
        .recv_until(|m| matches!(m, ServerMessage::RoundEnded { .. }))
        .await;
    let ServerMessage::RoundEnded { result } = ended else {
        unreachable!()
    };
    assert_eq!(result.correct_option, "yes");
    assert_eq!(result.results.len(), 2);

    let over = alice
        .recv_until(|m| matches!(m, ServerMessage::GameEnded { .. }))
        .await;
    let ServerMessage::GameEnded {
        winner, standings, ..
    } = over
    else {
        unreachable!()
    };
    assert_eq!(winner.unwrap().id, alice_id);
    assert_eq!(standings.len(), 2);
}

#[tokio::test]
async fn test_malformed_frames_get_error_and_connection_survives() {
    let addr = start_server(Duration::from_secs(60)).await;
    let mut client = Client::connect(&addr).await;

    client.send_raw("{not json").await;
    assert!(matches!(
        client.recv().await,
        ServerMessage::Error { code: 400, .. }
    ));

    client
        .send_raw(r#"{"seq":1,"timestamp":0,"payload":{"type":"Teleport"}}"#)
        .await;
    assert!(matches!(
        client.recv().await,
        ServerMessage::Error { code: 400, .. }
    ));

    client
        .send(ClientMessage::CreateRoom {
            room_id: RoomId::new("R1"),
            player_name: "   ".into(),
        })
        .await;
    assert!(matches!(
        client.recv().await,
        ServerMessage::Error { code: 400, .. }
    ));

    assert!(client.sync().await.is_empty());
}

#[tokio::test]
async fn test_rejected_request_errors_only_the_caller() {
    let addr = start_server(Duration::from_secs(60)).await;
    let mut alice = Client::connect(&addr).await;
    let mut bob = Client::connect(&addr).await;
    create(&mut alice, "R1", "Alice").await;
    join(&mut bob, "R1", "Bob").await;

    bob.send(ClientMessage::StartGame).await;
    assert!(matches!(
        bob.recv().await,
        ServerMessage::Error { code: 403, .. }
    ));

    let alice_saw = alice.sync().await;
    assert!(
        alice_saw
            .iter()
            .all(|m| !matches!(m, ServerMessage::Error { .. }))
    );
}

#[tokio::test]
async fn test_commands_outside_a_room_are_rejected() {
    let addr = start_server(Duration::from_secs(60)).await;
    let mut client = Client::connect(&addr).await;

    client
        .send(ClientMessage::SubmitAnswer { round: 1, choice: 0 })
        .await;
    assert!(matches!(
        client.recv().await,
        ServerMessage::Error { code: 400, .. }
    ));

    client
        .send(ClientMessage::JoinRoom {
            room_id: RoomId::new("missing"),
            player_name: "Alice".into(),
        })
        .await;
    assert!(matches!(
        client.recv().await,
        ServerMessage::Error { code: 404, .. }
    ));
}

#[tokio::test]
async fn test_disconnect_leaves_room() {
    let addr = start_server(Duration::from_secs(60)).await;
    let mut alice = Client::connect(&addr).await;
    let mut bob = Client::connect(&addr).await;
    let alice_id = create(&mut alice, "R1", "Alice").await;
    join(&mut bob, "R1", "Bob").await;
    alice
        .recv_until(|m| matches!(m, ServerMessage::PlayerJoined { .. }))
        .await;

    alice.ws.close(None).await.expect("close");
    drop(alice);

    let left = bob
        .recv_until(|m| matches!(m, ServerMessage::PlayerLeft { .. }))
        .await;
    let ServerMessage::PlayerLeft {
        player_id,
        new_host,
    } = left
    else {
        unreachable!()
    };
    assert_eq!(player_id, alice_id);
    assert!(new_host.is_some());
}

#[tokio::test]
async fn test_leave_room_then_create_another() {
    let addr = start_server(Duration::from_secs(60)).await;
    let mut client = Client::connect(&addr).await;
    create(&mut client, "R1", "Alice").await;

    client
        .send(ClientMessage::CreateRoom {
            room_id: RoomId::new("R2"),
            player_name: "Alice".into(),
        })
        .await;
    assert!(matches!(
        client.recv().await,
        ServerMessage::Error { code: 400, .. }
    ));

    client.send(ClientMessage::LeaveRoom).await;
    assert_eq!(
        client.recv().await,
        ServerMessage::RoomLeft {
            room_id: RoomId::new("R1")
        }
    );

    create(&mut client, "R2", "Alice").await;
}

#[tokio::test]
async fn test_get_state_from_any_connection() {
    let addr = start_server(Duration::from_secs(60)).await;
    let mut alice = Client::connect(&addr).await;
    let mut watcher = Client::connect(&addr).await;
    create(&mut alice, "R1", "Alice").await;

    watcher
        .send(ClientMessage::GetState {
            room_id: RoomId::new("R1"),
        })
        .await;
    match watcher.recv().await {
        ServerMessage::State { state } => {
            assert_eq!(state.state, SessionState::Waiting);
            assert_eq!(state.players.len(), 1);
            assert_eq!(state.max_players, 4);
        }
        other => panic!("expected State, got {other:?}"),
    }
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let addr = start_server(Duration::from_millis(200)).await;
    let mut client = Client::connect(&addr).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.ws.next().await {
                None | Some(Err(_)) => return,
                Some(Ok(msg)) if msg.is_close() => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server should close an idle connection");
}
