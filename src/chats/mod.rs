mod chat;
mod msg;
pub mod proto;
pub mod registry;
pub mod store;
pub mod view;
mod ws;

pub use registry::{EventSink, Rooms};
pub use store::ChatStore;

use axum::{Router, routing::{delete, get, post}};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(chat::new_chat).get(chat::list_chats))
        .route("/read", post(msg::mark_read))
        .route("/{id}", delete(chat::delete_chat))
        .route("/{id}/messages", get(msg::list_messages).post(msg::send_message))
        .route("/{id}/messages/{mid}", delete(msg::delete_message))
        .route("/{id}/ws", get(ws::chat_ws))
}
