use std::sync::Arc;
use std::time::Duration;

use axum::{
    debug_handler,
    extract::{Query, State, WebSocketUpgrade, ws::WebSocket},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::IdentityVerifier;
use crate::chats::proto::{ClientEvent, OutboundMessage, ServerEvent, WireMessage};
use crate::chats::registry::Rooms;
use crate::chats::store::ChatStore;
use crate::db::now_millis;
use crate::error::{ChatError, MAX_CONTENT_LEN};

/// An idle unauthenticated socket is cut loose after this long.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
pub struct WsAuth {
    token: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub async fn chat_ws(
    State(store): State<ChatStore>,
    State(rooms): State<Rooms>,
    State(verifier): State<Arc<dyn IdentityVerifier>>,
    Query(WsAuth { token }): Query<WsAuth>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(async move |socket| {
        session(socket, store, rooms, verifier, token).await;
    })
}

async fn session(
    socket: WebSocket,
    store: ChatStore,
    rooms: Rooms,
    verifier: Arc<dyn IdentityVerifier>,
    token: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();

    // handshake: no session exists until the credential checks out
    let user_id = match authenticate(verifier.as_ref(), token.as_deref()).await {
        Ok(user_id) => user_id,
        Err(reason) => {
            let event = ServerEvent::ConnectError { reason: reason.to_owned() };
            if let Ok(text) = serde_json::to_string(&event) {
                let _ = sender.send(text.into()).await;
            }
            return;
        }
    };

    let conn_id = Uuid::now_v7();
    tracing::debug!(%user_id, %conn_id, "session active");

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let write_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(text.into()).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = receiver.next().await {
        let Ok(event) = serde_json::from_slice::<ClientEvent>(&frame.into_data()) else {
            continue;
        };

        match event {
            ClientEvent::JoinChat { conversation_id } => {
                handle_join(&store, &rooms, &tx, conn_id, user_id, conversation_id).await;
            }
            ClientEvent::SendMessage(out) => {
                handle_send(&store, &rooms, &tx, conn_id, user_id, out).await;
            }
        }
    }

    // teardown is immediate: no grace period, no queueing for this client
    rooms.disconnect(conn_id);
    write_task.abort();
    tracing::debug!(%user_id, %conn_id, "session closed");
}

async fn authenticate(
    verifier: &dyn IdentityVerifier,
    token: Option<&str>,
) -> Result<Uuid, &'static str> {
    let Some(token) = token else {
        return Err("missing credential");
    };
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, verifier.verify(token)).await {
        Ok(Ok(user_id)) => Ok(user_id),
        Ok(Err(_)) => Err("invalid credential"),
        Err(_) => Err("authentication timed out"),
    }
}

/// A join is admitted only for participants of a live conversation.
async fn handle_join(
    store: &ChatStore,
    rooms: &Rooms,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    conn_id: Uuid,
    user_id: Uuid,
    conversation_id: Uuid,
) {
    match store.ensure_participant(conversation_id, user_id).await {
        Ok(_) => {
            rooms.join(conversation_id, conn_id, tx.clone());
            tracing::debug!(%user_id, %conversation_id, "joined room");
        }
        Err(err) => {
            let _ = tx.send(ServerEvent::Error { reason: err.to_string() });
        }
    }
}

/// Relay-then-persist. Validation happens before the relay, so peers never
/// see an invalid message; a store failure after the relay is logged and the
/// inconsistency surfaces only on the next fetch.
async fn handle_send(
    store: &ChatStore,
    rooms: &Rooms,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    conn_id: Uuid,
    user_id: Uuid,
    out: OutboundMessage,
) {
    if !rooms.is_joined(conn_id, out.conversation_id) {
        let _ = tx.send(ServerEvent::Error {
            reason: "join the conversation before sending".to_owned(),
        });
        return;
    }

    let content = out.content.trim();
    if content.is_empty() {
        let _ = tx.send(ServerEvent::Error { reason: ChatError::EmptyContent.to_string() });
        return;
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        let _ = tx.send(ServerEvent::Error { reason: ChatError::ContentTooLong.to_string() });
        return;
    }

    let convo = match store.conversation(out.conversation_id).await {
        Ok(convo) => convo,
        Err(err) => {
            let _ = tx.send(ServerEvent::Error { reason: err.to_string() });
            return;
        }
    };
    if !convo.participants.contains(&out.receiver_id) {
        let _ = tx.send(ServerEvent::Error { reason: ChatError::NotParticipant.to_string() });
        return;
    }

    let wire = WireMessage {
        id: None,
        conversation_id: out.conversation_id,
        // sender and timestamp are server-stamped, client claims are ignored
        sender_id: user_id,
        receiver_id: out.receiver_id,
        content: content.to_owned(),
        is_read: false,
        created_at: now_millis(),
        client_tag: out.client_tag,
    };
    rooms.relay(out.conversation_id, Some(conn_id), &ServerEvent::ReceiveMessage(wire));

    if let Err(err) = store
        .append_message(out.conversation_id, user_id, out.receiver_id, content)
        .await
    {
        tracing::warn!(
            %user_id,
            conversation = %out.conversation_id,
            error = %err,
            "persist after relay failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::BoxFuture;
    use sqlx::SqlitePool;

    use super::*;
    use crate::db;

    struct Fixed(Option<Uuid>);

    impl IdentityVerifier for Fixed {
        fn verify<'a>(&'a self, _token: &'a str) -> BoxFuture<'a, Result<Uuid, ChatError>> {
            let result = self.0.ok_or(ChatError::AuthenticationFailure);
            Box::pin(async move { result })
        }
    }

    async fn store() -> ChatStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::init(&pool).await.unwrap();
        ChatStore::new(pool)
    }

    #[tokio::test]
    async fn handshake_rejects_missing_and_invalid_credentials() {
        let user = Uuid::now_v7();
        assert_eq!(authenticate(&Fixed(Some(user)), Some("tok")).await, Ok(user));
        assert_eq!(authenticate(&Fixed(Some(user)), None).await, Err("missing credential"));
        assert_eq!(authenticate(&Fixed(None), Some("tok")).await, Err("invalid credential"));
    }

    #[tokio::test]
    async fn join_is_refused_for_non_participants() {
        let store = store().await;
        let rooms = Rooms::new();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let convo = store.create_conversation(a, &[b], None).await.unwrap();

        let stranger = Uuid::now_v7();
        let conn = Uuid::now_v7();
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_join(&store, &rooms, &tx, conn, stranger, convo.id).await;
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Error { .. })));
        assert!(!rooms.is_joined(conn, convo.id));

        handle_join(&store, &rooms, &tx, conn, a, convo.id).await;
        assert!(rooms.is_joined(conn, convo.id));
    }

    #[tokio::test]
    async fn send_relays_to_the_room_and_persists() {
        let store = store().await;
        let rooms = Rooms::new();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let convo = store.create_conversation(a, &[b], None).await.unwrap();

        let (conn_a, conn_b) = (Uuid::now_v7(), Uuid::now_v7());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        handle_join(&store, &rooms, &tx_a, conn_a, a, convo.id).await;
        handle_join(&store, &rooms, &tx_b, conn_b, b, convo.id).await;

        let out = OutboundMessage {
            conversation_id: convo.id,
            receiver_id: b,
            content: "hi".into(),
            client_tag: Some("t1".into()),
            created_at: None,
        };
        handle_send(&store, &rooms, &tx_a, conn_a, a, out).await;

        // peer sees the relay, sender's own socket does not
        match rx_b.try_recv().unwrap() {
            ServerEvent::ReceiveMessage(wire) => {
                assert_eq!(wire.content, "hi");
                assert_eq!(wire.sender_id, a);
                assert_eq!(wire.client_tag.as_deref(), Some("t1"));
                assert!(wire.id.is_none());
                assert!(!wire.is_read);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx_a.try_recv().is_err());

        let page = store.list_messages(convo.id, None, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].content, "hi");
        assert!(!page.items[0].is_read);
    }

    #[tokio::test]
    async fn invalid_sends_reach_no_peer() {
        let store = store().await;
        let rooms = Rooms::new();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let convo = store.create_conversation(a, &[b], None).await.unwrap();

        let (conn_a, conn_b) = (Uuid::now_v7(), Uuid::now_v7());
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        handle_join(&store, &rooms, &tx_a, conn_a, a, convo.id).await;
        handle_join(&store, &rooms, &tx_b, conn_b, b, convo.id).await;

        // whitespace-only content
        let out = OutboundMessage {
            conversation_id: convo.id,
            receiver_id: b,
            content: "   ".into(),
            client_tag: None,
            created_at: None,
        };
        handle_send(&store, &rooms, &tx_a, conn_a, a, out).await;
        assert!(matches!(rx_a.try_recv(), Ok(ServerEvent::Error { .. })));
        assert!(rx_b.try_recv().is_err());

        // receiver outside the participant set
        let out = OutboundMessage {
            conversation_id: convo.id,
            receiver_id: Uuid::now_v7(),
            content: "hi".into(),
            client_tag: None,
            created_at: None,
        };
        handle_send(&store, &rooms, &tx_a, conn_a, a, out).await;
        assert!(matches!(rx_a.try_recv(), Ok(ServerEvent::Error { .. })));
        assert!(rx_b.try_recv().is_err());

        assert!(store.list_messages(convo.id, None, None).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn send_requires_a_joined_room() {
        let store = store().await;
        let rooms = Rooms::new();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let convo = store.create_conversation(a, &[b], None).await.unwrap();

        let conn = Uuid::now_v7();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let out = OutboundMessage {
            conversation_id: convo.id,
            receiver_id: b,
            content: "hi".into(),
            client_tag: None,
            created_at: None,
        };
        handle_send(&store, &rooms, &tx, conn, a, out).await;

        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Error { .. })));
        assert!(store.list_messages(convo.id, None, None).await.unwrap().items.is_empty());
    }
}
