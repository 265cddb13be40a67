use axum::{Json, debug_handler, extract::{Path, Query, State}, http::StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppResult;
use crate::auth::AuthedUser;
use crate::chats::store::{ChatStore, Message, Page};
use crate::error::ChatError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendBody {
    receiver_id: Uuid,
    content: String,
}

/// Non-socket send. Persists first, then relays through the sink, so a
/// store failure here is a plain error response and no peer saw anything.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn send_message(
    State(store): State<ChatStore>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<Uuid>,
    Json(SendBody { receiver_id, content }): Json<SendBody>,
) -> AppResult<Json<Message>> {
    Ok(Json(store.send_message(id, user_id, receiver_id, &content).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageQuery {
    cursor: Option<String>,
    limit: Option<u32>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_messages(
    State(store): State<ChatStore>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<Uuid>,
    Query(PageQuery { cursor, limit }): Query<PageQuery>,
) -> AppResult<Json<Page<Message>>> {
    store.ensure_participant(id, user_id).await?;
    Ok(Json(store.list_messages(id, cursor.as_deref(), limit).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReadBody {
    message_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReadReceipt {
    updated: u64,
}

/// Batch read-marking. The store only flips messages addressed to the
/// caller, so a client cannot read-mark on someone else's behalf.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn mark_read(
    State(store): State<ChatStore>,
    AuthedUser(user_id): AuthedUser,
    Json(ReadBody { message_ids }): Json<ReadBody>,
) -> AppResult<Json<ReadReceipt>> {
    let updated = store.mark_read(user_id, &message_ids).await?;
    Ok(Json(ReadReceipt { updated }))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete_message(
    State(store): State<ChatStore>,
    AuthedUser(user_id): AuthedUser,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let msg = store.message(message_id).await?;
    if msg.conversation_id != id {
        return Err(ChatError::MessageNotFound.into());
    }

    store.delete_message(user_id, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
