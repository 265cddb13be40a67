use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::chats::proto::{ServerEvent, WireMessage};
use crate::chats::registry::EventSink;
use crate::db::now_millis;
use crate::error::{ChatError, MAX_CONTENT_LEN};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub name: Option<String>,
    pub is_group: bool,
    pub participants: Vec<Uuid>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: i64,
}

/// One page of messages in append order. Re-issuing the same cursor gives
/// the same page again; `next_cursor` of `None` means the history is drained.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 100;

fn encode_cursor(created_at: i64, id: Uuid) -> String {
    format!("{created_at}.{id}")
}

fn decode_cursor(cursor: &str) -> Option<(i64, String)> {
    let (ts, id) = cursor.split_once('.')?;
    Some((ts.parse().ok()?, id.to_owned()))
}

/// Durable conversations and messages over SQLite. The optional sink lets
/// request/response call paths push socket events without a global server
/// handle.
#[derive(Clone)]
pub struct ChatStore {
    pool: SqlitePool,
    sink: Option<Arc<dyn EventSink>>,
}

impl ChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, sink: None }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Creates a conversation. The creator is always a participant; the set
    /// must end up with at least two distinct users. Identical participant
    /// sets are not deduplicated here.
    pub async fn create_conversation(
        &self,
        creator: Uuid,
        participants: &[Uuid],
        name: Option<String>,
    ) -> Result<Conversation, ChatError> {
        let mut set: BTreeSet<Uuid> = participants.iter().copied().collect();
        set.insert(creator);
        if set.len() < 2 {
            return Err(ChatError::InvalidParticipants);
        }

        let id = Uuid::now_v7();
        let created_at = now_millis();
        let is_group = set.len() > 2;

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO conversations (id,name,is_group,state,created_at) VALUES (?,?,?,'active',?)")
            .bind(id.to_string())
            .bind(&name)
            .bind(is_group)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
        for user in &set {
            sqlx::query("INSERT INTO conversation_participants (conversation_id,user_id) VALUES (?,?)")
                .bind(id.to_string())
                .bind(user.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(Conversation {
            id,
            name,
            is_group,
            participants: set.into_iter().collect(),
            created_at,
        })
    }

    /// Looks up an active conversation. A record mid-cascade-delete counts
    /// as gone.
    pub async fn conversation(&self, id: Uuid) -> Result<Conversation, ChatError> {
        let row: Option<(Option<String>, bool, String, i64)> =
            sqlx::query_as("SELECT name,is_group,state,created_at FROM conversations WHERE id=?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        let Some((name, is_group, state, created_at)) = row else {
            return Err(ChatError::ConversationNotFound);
        };
        if state != "active" {
            return Err(ChatError::ConversationNotFound);
        }

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM conversation_participants WHERE conversation_id=? ORDER BY user_id",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut participants = Vec::with_capacity(rows.len());
        for (user_id,) in rows {
            participants.push(Uuid::parse_str(&user_id)?);
        }

        Ok(Conversation { id, name, is_group, participants, created_at })
    }

    pub async fn ensure_participant(&self, conversation: Uuid, user: Uuid) -> Result<Conversation, ChatError> {
        let convo = self.conversation(conversation).await?;
        if !convo.participants.contains(&user) {
            return Err(ChatError::NotParticipant);
        }
        Ok(convo)
    }

    pub async fn conversations_for_user(&self, user: Uuid) -> Result<Vec<Conversation>, ChatError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT c.id FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id=? AND c.state='active'
             ORDER BY c.created_at, c.id",
        )
        .bind(user.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for (id,) in rows {
            conversations.push(self.conversation(Uuid::parse_str(&id)?).await?);
        }
        Ok(conversations)
    }

    /// Appends one message. Content is stored trimmed; id and timestamp are
    /// assigned here, never taken from the client.
    pub async fn append_message(
        &self,
        conversation: Uuid,
        sender: Uuid,
        receiver: Uuid,
        content: &str,
    ) -> Result<Message, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyContent);
        }
        if content.chars().count() > MAX_CONTENT_LEN {
            return Err(ChatError::ContentTooLong);
        }

        let convo = self.conversation(conversation).await?;
        if !convo.participants.contains(&sender) || !convo.participants.contains(&receiver) {
            return Err(ChatError::NotParticipant);
        }

        let id = Uuid::now_v7();
        let created_at = now_millis();
        sqlx::query(
            "INSERT INTO messages (id,conversation_id,sender_id,receiver_id,content,is_read,created_at)
             VALUES (?,?,?,?,?,0,?)",
        )
        .bind(id.to_string())
        .bind(conversation.to_string())
        .bind(sender.to_string())
        .bind(receiver.to_string())
        .bind(content)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id,
            conversation_id: conversation,
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_owned(),
            is_read: false,
            created_at,
        })
    }

    /// Persist-then-relay send for the request/response path. Unlike the
    /// socket path, a store failure here reaches the caller before any peer
    /// has seen the message.
    pub async fn send_message(
        &self,
        conversation: Uuid,
        sender: Uuid,
        receiver: Uuid,
        content: &str,
    ) -> Result<Message, ChatError> {
        let msg = self.append_message(conversation, sender, receiver, content).await?;
        if let Some(sink) = &self.sink {
            sink.notify(msg.conversation_id, &ServerEvent::ReceiveMessage(WireMessage::from(&msg)));
        }
        Ok(msg)
    }

    /// Messages in append order, `(created_at, id)`. An unparseable cursor
    /// restarts from the beginning.
    pub async fn list_messages(
        &self,
        conversation: Uuid,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Page<Message>, ChatError> {
        self.conversation(conversation).await?;

        let limit = limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
        let after = cursor.and_then(decode_cursor);

        let rows: Vec<(String, String, String, String, bool, i64)> = match after {
            Some((ts, id)) => {
                sqlx::query_as(
                    "SELECT id,sender_id,receiver_id,content,is_read,created_at FROM messages
                     WHERE conversation_id=? AND (created_at > ? OR (created_at = ? AND id > ?))
                     ORDER BY created_at, id LIMIT ?",
                )
                .bind(conversation.to_string())
                .bind(ts)
                .bind(ts)
                .bind(id)
                .bind(limit as i64 + 1)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id,sender_id,receiver_id,content,is_read,created_at FROM messages
                     WHERE conversation_id=?
                     ORDER BY created_at, id LIMIT ?",
                )
                .bind(conversation.to_string())
                .bind(limit as i64 + 1)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let more = rows.len() as u32 > limit;
        let mut items = Vec::with_capacity(rows.len().min(limit as usize));
        for (id, sender_id, receiver_id, content, is_read, created_at) in
            rows.into_iter().take(limit as usize)
        {
            items.push(Message {
                id: Uuid::parse_str(&id)?,
                conversation_id: conversation,
                sender_id: Uuid::parse_str(&sender_id)?,
                receiver_id: Uuid::parse_str(&receiver_id)?,
                content,
                is_read,
                created_at,
            });
        }

        let next_cursor = if more {
            items.last().map(|m| encode_cursor(m.created_at, m.id))
        } else {
            None
        };

        Ok(Page { items, next_cursor })
    }

    pub async fn message(&self, id: Uuid) -> Result<Message, ChatError> {
        let row: Option<(String, String, String, String, bool, i64)> = sqlx::query_as(
            "SELECT conversation_id,sender_id,receiver_id,content,is_read,created_at
             FROM messages WHERE id=?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some((conversation_id, sender_id, receiver_id, content, is_read, created_at)) = row
        else {
            return Err(ChatError::MessageNotFound);
        };

        Ok(Message {
            id,
            conversation_id: Uuid::parse_str(&conversation_id)?,
            sender_id: Uuid::parse_str(&sender_id)?,
            receiver_id: Uuid::parse_str(&receiver_id)?,
            content,
            is_read,
            created_at,
        })
    }

    /// Flips `is_read` for every id in the batch that belongs to `receiver`
    /// and is still unread. Unknown, foreign, and already-read ids are
    /// skipped, so retries with overlapping batches are harmless. The flag
    /// never goes back to unread.
    pub async fn mark_read(&self, receiver: Uuid, ids: &[Uuid]) -> Result<u64, ChatError> {
        let mut updated = 0;
        for id in ids {
            let result =
                sqlx::query("UPDATE messages SET is_read=1 WHERE id=? AND receiver_id=? AND is_read=0")
                    .bind(id.to_string())
                    .bind(receiver.to_string())
                    .execute(&self.pool)
                    .await?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    /// Deletes one message. Only the sender may do this; the room is told
    /// through the sink.
    pub async fn delete_message(&self, caller: Uuid, id: Uuid) -> Result<Message, ChatError> {
        let msg = self.message(id).await?;
        if msg.sender_id != caller {
            return Err(ChatError::Forbidden);
        }

        sqlx::query("DELETE FROM messages WHERE id=?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if let Some(sink) = &self.sink {
            sink.notify(msg.conversation_id, &ServerEvent::MessageDeleted { message_id: id });
        }
        Ok(msg)
    }

    /// Cascade delete, staged so an interruption leaves a discoverable
    /// `deleting` record instead of orphaned messages under a live parent:
    /// mark, drop messages, drop participants, drop the conversation row.
    pub async fn delete_conversation(&self, caller: Uuid, id: Uuid) -> Result<(), ChatError> {
        self.ensure_participant(id, caller).await?;

        sqlx::query("UPDATE conversations SET state='deleting' WHERE id=?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM messages WHERE conversation_id=?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM conversation_participants WHERE conversation_id=?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id=?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
