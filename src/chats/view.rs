//! Client-side state for one open conversation: ordering, dedupe, and the
//! optimistic-send reconciliation pass a reconnecting client runs after a
//! fresh fetch.

use std::collections::HashSet;

use uuid::Uuid;

use crate::chats::proto::{OutboundMessage, ServerEvent, WireMessage};
use crate::chats::store::Message;
use crate::db::now_millis;

/// A locally emitted message the server has not confirmed yet, keyed by a
/// client-generated tag.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub tag: String,
    pub receiver_id: Uuid,
    pub content: String,
    pub staged_at: i64,
}

#[derive(Debug)]
pub struct ConversationView {
    conversation_id: Uuid,
    me: Uuid,
    // store-confirmed history, ordered by (created_at, id)
    confirmed: Vec<Message>,
    seen: HashSet<Uuid>,
    // relayed over the socket without a server id yet
    inbound: Vec<WireMessage>,
    pending: Vec<PendingSend>,
    stale: bool,
}

impl ConversationView {
    pub fn new(conversation_id: Uuid, me: Uuid) -> Self {
        Self {
            conversation_id,
            me,
            confirmed: Vec::new(),
            seen: HashSet::new(),
            inbound: Vec::new(),
            pending: Vec::new(),
            stale: false,
        }
    }

    /// Stages an optimistic send and returns the event payload to emit.
    pub fn stage_send(&mut self, receiver: Uuid, content: &str) -> OutboundMessage {
        let tag = Uuid::now_v7().simple().to_string();
        let staged_at = now_millis();
        self.pending.push(PendingSend {
            tag: tag.clone(),
            receiver_id: receiver,
            content: content.to_owned(),
            staged_at,
        });

        OutboundMessage {
            conversation_id: self.conversation_id,
            receiver_id: receiver,
            content: content.to_owned(),
            client_tag: Some(tag),
            created_at: Some(staged_at),
        }
    }

    pub fn apply_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::ReceiveMessage(wire) => self.apply_receive(wire),
            ServerEvent::MessageDeleted { message_id } => {
                self.confirmed.retain(|m| m.id != *message_id);
                self.seen.remove(message_id);
            }
            ServerEvent::ConnectError { .. } | ServerEvent::Error { .. } => {}
        }
    }

    fn apply_receive(&mut self, wire: &WireMessage) {
        if wire.conversation_id != self.conversation_id {
            return;
        }

        // echo of our own optimistic send through another session
        if wire.sender_id == self.me {
            if let Some(tag) = &wire.client_tag {
                if self.pending.iter().any(|p| p.tag == *tag) {
                    return;
                }
            }
        }

        match wire.id {
            Some(id) => {
                if self.seen.insert(id) {
                    self.insert_confirmed(Message {
                        id,
                        conversation_id: wire.conversation_id,
                        sender_id: wire.sender_id,
                        receiver_id: wire.receiver_id,
                        content: wire.content.clone(),
                        is_read: wire.is_read,
                        created_at: wire.created_at,
                    });
                }
            }
            None => self.inbound.push(wire.clone()),
        }
    }

    /// Merges a freshly fetched page: updates known rows (read flags),
    /// inserts new ones in order, and retires inbound/pending entries the
    /// store now accounts for. Safe to call repeatedly with overlapping
    /// pages; this is the whole reconnect story, after re-join.
    pub fn reconcile(&mut self, fetched: &[Message]) {
        for msg in fetched {
            if self.seen.insert(msg.id) {
                self.insert_confirmed(msg.clone());
            } else if let Some(existing) = self.confirmed.iter_mut().find(|m| m.id == msg.id) {
                *existing = msg.clone();
            }
        }

        self.inbound.retain(|wire| {
            !fetched
                .iter()
                .any(|m| m.sender_id == wire.sender_id && m.content == wire.content)
        });
        self.pending.retain(|p| {
            !fetched
                .iter()
                .any(|m| m.sender_id == self.me && m.content == p.content)
        });

        self.stale = false;
    }

    fn insert_confirmed(&mut self, msg: Message) {
        let key = (msg.created_at, msg.id);
        let pos = self.confirmed.partition_point(|m| (m.created_at, m.id) <= key);
        self.confirmed.insert(pos, msg);
    }

    /// Confirmed messages addressed to this user and still unread; the batch
    /// to hand to the read-marking call.
    pub fn unread_ids(&self) -> Vec<Uuid> {
        self.confirmed
            .iter()
            .filter(|m| m.receiver_id == self.me && !m.is_read)
            .map(|m| m.id)
            .collect()
    }

    /// Local flip after a successful read-marking round trip.
    pub fn apply_read(&mut self, ids: &[Uuid]) {
        for msg in &mut self.confirmed {
            if msg.receiver_id == self.me && ids.contains(&msg.id) {
                msg.is_read = true;
            }
        }
    }

    /// Everything to render: confirmed history, then unconfirmed inbound,
    /// then this client's own pending sends.
    pub fn messages(&self) -> Vec<WireMessage> {
        let mut out: Vec<WireMessage> = self.confirmed.iter().map(WireMessage::from).collect();
        out.extend(self.inbound.iter().cloned());
        out.extend(self.pending.iter().map(|p| WireMessage {
            id: None,
            conversation_id: self.conversation_id,
            sender_id: self.me,
            receiver_id: p.receiver_id,
            content: p.content.clone(),
            is_read: false,
            created_at: p.staged_at,
            client_tag: Some(p.tag.clone()),
        }));
        out
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Call on disconnect; cleared by the next `reconcile`.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }
}
