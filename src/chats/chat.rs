use axum::{Json, debug_handler, extract::{Path, State}, http::StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppResult;
use crate::auth::AuthedUser;
use crate::chats::store::{ChatStore, Conversation};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewChatBody {
    participants: Vec<Uuid>,
    name: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_chat(
    State(store): State<ChatStore>,
    AuthedUser(user_id): AuthedUser,
    Json(NewChatBody { participants, name }): Json<NewChatBody>,
) -> AppResult<Json<Conversation>> {
    let convo = store.create_conversation(user_id, &participants, name).await?;
    tracing::info!(conversation = %convo.id, creator = %user_id, "conversation created");
    Ok(Json(convo))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn list_chats(
    State(store): State<ChatStore>,
    AuthedUser(user_id): AuthedUser,
) -> AppResult<Json<Vec<Conversation>>> {
    Ok(Json(store.conversations_for_user(user_id).await?))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete_chat(
    State(store): State<ChatStore>,
    AuthedUser(user_id): AuthedUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    store.delete_conversation(user_id, id).await?;
    tracing::info!(conversation = %id, by = %user_id, "conversation deleted");
    Ok(StatusCode::NO_CONTENT)
}
