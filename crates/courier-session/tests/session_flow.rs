use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use uuid::Uuid;

use courier_client::{RelayClient, RelayConfig};
use courier_rest::ApiClient;
use courier_session::{SessionCommand, SessionDriver, SessionUpdate};
use courier_types::models::{ConversationId, UserId};

/// Relay stand-in: records the client's frames, pushes whatever a test
/// hands it.
struct StubRelay {
    addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<serde_json::Value>,
    push: broadcast::Sender<String>,
}

#[derive(Clone)]
struct RelayState {
    frame_tx: mpsc::UnboundedSender<serde_json::Value>,
    push: broadcast::Sender<String>,
}

async fn spawn_relay() -> StubRelay {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frame_tx, frames) = mpsc::unbounded_channel();
    let (push, _) = broadcast::channel(64);

    let state = RelayState {
        frame_tx,
        push: push.clone(),
    };
    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    StubRelay { addr, frames, push }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| relay_connection(socket, state))
}

async fn relay_connection(socket: WebSocket, state: RelayState) {
    let (mut sink, mut stream) = socket.split();
    let mut push = state.push.subscribe();
    loop {
        tokio::select! {
            frame = push.recv() => match frame {
                Ok(text) => {
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    let value = serde_json::from_str(&text).unwrap();
                    let _ = state.frame_tx.send(value);
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
}

/// REST stand-in serving conversation 7 (peer 9) and recording deletes.
async fn spawn_api() -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let deletes: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route("/conversations", get(list_conversations))
        .route(
            "/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/conversations/{id}/messages", get(get_messages))
        .with_state(deletes.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, deletes)
}

fn conversation_json() -> serde_json::Value {
    serde_json::json!({
        "id": 7,
        "peer": {"id": 9, "username": "recruiter"},
        "unread_count": 1,
        "created_at": "2025-04-01T08:00:00Z"
    })
}

async fn list_conversations() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "count": 1,
        "next": null,
        "previous": null,
        "results": [conversation_json()]
    }))
}

async fn get_conversation(Path(_id): Path<i64>) -> Json<serde_json::Value> {
    Json(conversation_json())
}

async fn get_messages(Path(_id): Path<i64>) -> Json<serde_json::Value> {
    // Newest first, as the backend pages it.
    Json(serde_json::json!({
        "count": 2,
        "next": null,
        "previous": null,
        "results": [
            {
                "id": "20", "sender_id": 1, "recipient_id": 9,
                "content": "second", "status": "read",
                "created_at": "2025-04-01T08:02:00Z"
            },
            {
                "id": "10", "sender_id": 9, "recipient_id": 1,
                "content": "first", "status": "read",
                "created_at": "2025-04-01T08:01:00Z"
            }
        ]
    }))
}

async fn delete_conversation(
    State(deletes): State<Arc<Mutex<Vec<String>>>>,
    Path(id): Path<i64>,
) -> StatusCode {
    deletes.lock().unwrap().push(format!("/conversations/{}", id));
    StatusCode::NO_CONTENT
}

fn relay_config(addr: SocketAddr) -> RelayConfig {
    RelayConfig {
        relay_url: Some(format!("ws://{}/ws", addr)),
        base_reconnect_delay: Duration::from_millis(10),
        max_reconnect_delay: Duration::from_millis(50),
        max_reconnect_attempts: 20,
        heartbeat_interval: Duration::from_secs(5),
        missed_pong_limit: 0,
    }
}

async fn next_frame(relay: &mut StubRelay) -> serde_json::Value {
    timeout(Duration::from_secs(2), relay.frames.recv())
        .await
        .expect("timed out waiting for a frame at the relay")
        .expect("relay stub went away")
}

async fn wait_until_open(client: &RelayClient, relay: &StubRelay) {
    let mut state = client.watch_state();
    timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == courier_client::LinkState::Open),
    )
    .await
    .expect("timed out waiting for the link to open")
    .unwrap();

    // The stub's handler task subscribes to `push` as it starts; pushing
    // before that would find no receiver.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while relay.push.receiver_count() == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "relay handler never subscribed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn await_update<F>(
    updates: &mut mpsc::UnboundedReceiver<SessionUpdate>,
    mut wanted: F,
) -> SessionUpdate
where
    F: FnMut(&SessionUpdate) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            let update = updates.recv().await.expect("session driver went away");
            if wanted(&update) {
                return update;
            }
        }
    })
    .await
    .expect("timed out waiting for a session update")
}

#[tokio::test]
async fn select_chat_ack_send_and_reconcile() {
    let mut relay = spawn_relay().await;
    let (api_addr, _deletes) = spawn_api().await;

    let client = RelayClient::new(relay_config(relay.addr));
    client.connect();
    let api = ApiClient::new(format!("http://{}", api_addr), "sekrit");
    let (commands, mut updates) = SessionDriver::spawn(UserId(1), client.clone(), api);
    wait_until_open(&client, &relay).await;

    // Selecting installs the conversation and its history, oldest first.
    commands.send(SessionCommand::Select(ConversationId(7))).unwrap();
    let update = await_update(&mut updates, |u| {
        matches!(u, SessionUpdate::Conversation(Some(_)))
    })
    .await;
    match update {
        SessionUpdate::Conversation(Some(conversation)) => {
            assert_eq!(conversation.id, ConversationId(7));
            assert_eq!(conversation.peer.id, UserId(9));
        }
        _ => unreachable!(),
    }
    let update = await_update(&mut updates, |u| matches!(u, SessionUpdate::Messages(_))).await;
    match update {
        SessionUpdate::Messages(messages) => {
            let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
            assert_eq!(contents, vec!["first", "second"]);
        }
        _ => unreachable!(),
    }

    // The peer starts typing.
    relay
        .push
        .send(r#"{"type":"typing","user_id":9}"#.to_string())
        .unwrap();
    await_update(&mut updates, |u| {
        matches!(u, SessionUpdate::PeerTyping(true))
    })
    .await;

    // A message from the peer clears the indicator and is acked delivered.
    let inbound = serde_json::json!({
        "type": "new_message",
        "message": {
            "id": "100", "sender_id": 9, "recipient_id": 1,
            "content": "are you free thursday?", "status": "sent",
            "created_at": "2025-04-01T08:03:00Z"
        },
        "conversation_id": 7
    });
    relay.push.send(inbound.to_string()).unwrap();

    let ack = next_frame(&mut relay).await;
    assert_eq!(ack["action"], "mark_delivered");
    assert_eq!(ack["message_id"], "100");
    let update = await_update(&mut updates, |u| {
        matches!(u, SessionUpdate::Messages(m) if m.len() == 3)
    })
    .await;
    match update {
        SessionUpdate::Messages(messages) => {
            assert_eq!(messages[2].content, "are you free thursday?")
        }
        _ => unreachable!(),
    }
    // The arrival also refreshed the conversation list.
    await_update(&mut updates, |u| {
        matches!(u, SessionUpdate::Conversations(_))
    })
    .await;

    // Optimistic send: the entry shows up locally before any echo.
    commands
        .send(SessionCommand::Send {
            content: "yes, morning works".into(),
            media: None,
        })
        .unwrap();
    let sent = next_frame(&mut relay).await;
    assert_eq!(sent["action"], "send_message");
    assert_eq!(sent["recipient_id"], 9);
    assert_eq!(sent["content"], "yes, morning works");
    let update = await_update(&mut updates, |u| {
        matches!(u, SessionUpdate::Messages(m) if m.len() == 4)
    })
    .await;
    match update {
        SessionUpdate::Messages(messages) => assert!(messages[3].id.is_local()),
        _ => unreachable!(),
    }

    // The relay's echo carries our client key and replaces the optimistic
    // entry instead of appending a fifth message.
    let client_key = Uuid::parse_str(sent["client_key"].as_str().unwrap()).unwrap();
    let echo = serde_json::json!({
        "type": "new_message",
        "message": {
            "id": "900", "sender_id": 1, "recipient_id": 9,
            "content": "yes, morning works", "status": "sent",
            "created_at": "2025-04-01T08:04:00Z",
            "client_key": client_key
        },
        "conversation_id": 7
    });
    relay.push.send(echo.to_string()).unwrap();
    let update = await_update(&mut updates, |u| {
        matches!(u, SessionUpdate::Messages(m) if m.len() == 4 && !m[3].id.is_local())
    })
    .await;
    match update {
        SessionUpdate::Messages(messages) => {
            assert_eq!(messages[3].id.0, "900");
            assert_eq!(messages[3].content, "yes, morning works");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn composer_input_drives_typing_signals() {
    let mut relay = spawn_relay().await;
    let (api_addr, _deletes) = spawn_api().await;

    let client = RelayClient::new(relay_config(relay.addr));
    client.connect();
    let api = ApiClient::new(format!("http://{}", api_addr), "sekrit");
    let (commands, mut updates) = SessionDriver::spawn(UserId(1), client.clone(), api);

    commands.send(SessionCommand::Select(ConversationId(7))).unwrap();
    await_update(&mut updates, |u| {
        matches!(u, SessionUpdate::Conversation(Some(_)))
    })
    .await;

    commands.send(SessionCommand::Input("h".into())).unwrap();
    let frame = next_frame(&mut relay).await;
    assert_eq!(frame["action"], "typing");
    assert_eq!(frame["recipient_id"], 9);

    // More keystrokes only re-arm the deadline.
    commands.send(SessionCommand::Input("he".into())).unwrap();
    commands.send(SessionCommand::Input("hel".into())).unwrap();

    // Emptying the composer stops immediately.
    commands.send(SessionCommand::Input(String::new())).unwrap();
    let frame = next_frame(&mut relay).await;
    assert_eq!(frame["action"], "stop_typing");
    assert_eq!(frame["recipient_id"], 9);
}

#[tokio::test]
async fn delete_clears_the_session_via_rest() {
    let mut relay = spawn_relay().await;
    let (api_addr, deletes) = spawn_api().await;

    let client = RelayClient::new(relay_config(relay.addr));
    client.connect();
    let api = ApiClient::new(format!("http://{}", api_addr), "sekrit");
    let (commands, mut updates) = SessionDriver::spawn(UserId(1), client.clone(), api);

    commands.send(SessionCommand::Select(ConversationId(7))).unwrap();
    await_update(&mut updates, |u| {
        matches!(u, SessionUpdate::Conversation(Some(_)))
    })
    .await;

    commands.send(SessionCommand::Delete).unwrap();
    await_update(&mut updates, |u| {
        matches!(u, SessionUpdate::Conversation(None))
    })
    .await;
    assert_eq!(
        deletes.lock().unwrap().as_slice(),
        ["/conversations/7".to_string()]
    );

    // With the session cleared, typing input has no recipient to signal.
    commands.send(SessionCommand::Input("h".into())).unwrap();
    assert!(
        timeout(Duration::from_millis(150), relay.frames.recv())
            .await
            .is_err()
    );
}
