//! Socket wire protocol. Internally tagged JSON, one enum per direction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chats::store::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "joinChat")]
    JoinChat {
        #[serde(rename = "conversationId")]
        conversation_id: Uuid,
    },

    #[serde(rename = "sendMessage")]
    SendMessage(OutboundMessage),
}

/// A send as the client shapes it. `created_at` is a client suggestion and
/// is ignored for ordering; `client_tag` is an opaque temporary id echoed
/// back through relay so the sender can reconcile later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub conversation_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(WireMessage),

    #[serde(rename = "messageDeleted")]
    MessageDeleted {
        #[serde(rename = "messageId")]
        message_id: Uuid,
    },

    #[serde(rename = "connect_error")]
    ConnectError { reason: String },

    #[serde(rename = "error")]
    Error { reason: String },
}

/// A message as it crosses the socket. Relay happens before persistence on
/// the socket path, so `id` may not exist yet; the HTTP path relays the
/// stored record, id included.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_tag: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        Self {
            id: Some(msg.id),
            conversation_id: msg.conversation_id,
            sender_id: msg.sender_id,
            receiver_id: msg.receiver_id,
            content: msg.content.clone(),
            is_read: msg.is_read,
            created_at: msg.created_at,
            client_tag: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_use_protocol_names() {
        let event: ClientEvent = serde_json::from_value(serde_json::json!({
            "event": "joinChat",
            "data": { "conversationId": Uuid::now_v7() },
        }))
        .unwrap();
        assert!(matches!(event, ClientEvent::JoinChat { .. }));
    }

    #[test]
    fn connect_error_keeps_snake_case_name() {
        let json = serde_json::to_value(&ServerEvent::ConnectError {
            reason: "invalid credential".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "connect_error");
    }

    #[test]
    fn wire_message_omits_missing_id() {
        let json = serde_json::to_value(&WireMessage {
            id: None,
            conversation_id: Uuid::now_v7(),
            sender_id: Uuid::now_v7(),
            receiver_id: Uuid::now_v7(),
            content: "hi".into(),
            is_read: false,
            created_at: 1,
            client_tag: Some("t1".into()),
        })
        .unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["clientTag"], "t1");
    }
}
