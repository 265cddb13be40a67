//! Live room membership and fan-out. Not persisted; a room exists here only
//! while at least one socket has joined it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::chats::proto::ServerEvent;

/// Anything that can push a server event into a room. Lets the HTTP send
/// path reach connected sockets without ambient globals.
pub trait EventSink: Send + Sync {
    fn notify(&self, room: Uuid, event: &ServerEvent);
}

type Outbox = mpsc::UnboundedSender<ServerEvent>;

#[derive(Default)]
struct Inner {
    // room -> connection -> outbox
    members: HashMap<Uuid, HashMap<Uuid, Outbox>>,
    // connection -> rooms, for teardown
    joined: HashMap<Uuid, HashSet<Uuid>>,
}

/// Fan-out table shared by all connections. The mutex is never held across
/// an await; enqueue order under it is the per-room relay order.
#[derive(Clone, Default)]
pub struct Rooms {
    inner: Arc<Mutex<Inner>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: Uuid, conn: Uuid, outbox: Outbox) {
        let mut inner = self.inner.lock().unwrap();
        inner.members.entry(room).or_default().insert(conn, outbox);
        inner.joined.entry(conn).or_default().insert(room);
    }

    pub fn is_joined(&self, conn: Uuid, room: Uuid) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.joined.get(&conn).is_some_and(|rooms| rooms.contains(&room))
    }

    /// Sends `event` to every connection in the room except `from`. A peer
    /// whose outbox is gone (mid-disconnect) is skipped; its cleanup happens
    /// in its own `disconnect`. Returns how many peers were reached.
    pub fn relay(&self, room: Uuid, from: Option<Uuid>, event: &ServerEvent) -> usize {
        let inner = self.inner.lock().unwrap();
        let Some(members) = inner.members.get(&room) else {
            return 0;
        };

        let mut delivered = 0;
        for (conn, outbox) in members {
            if Some(*conn) == from {
                continue;
            }
            if outbox.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn disconnect(&self, conn: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        let Some(rooms) = inner.joined.remove(&conn) else {
            return;
        };
        for room in rooms {
            if let Some(members) = inner.members.get_mut(&room) {
                members.remove(&conn);
                if members.is_empty() {
                    inner.members.remove(&room);
                }
            }
        }
    }
}

impl EventSink for Rooms {
    fn notify(&self, room: Uuid, event: &ServerEvent) {
        self.relay(room, None, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chats::proto::WireMessage;

    fn msg_event(content: &str) -> ServerEvent {
        ServerEvent::ReceiveMessage(WireMessage {
            id: None,
            conversation_id: Uuid::now_v7(),
            sender_id: Uuid::now_v7(),
            receiver_id: Uuid::now_v7(),
            content: content.into(),
            is_read: false,
            created_at: 0,
            client_tag: None,
        })
    }

    fn content_of(event: ServerEvent) -> String {
        match event {
            ServerEvent::ReceiveMessage(msg) => msg.content,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn relay_reaches_only_the_room() {
        let rooms = Rooms::new();
        let (room_a, room_b) = (Uuid::now_v7(), Uuid::now_v7());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        rooms.join(room_a, Uuid::now_v7(), tx_a);
        rooms.join(room_b, Uuid::now_v7(), tx_b);

        assert_eq!(rooms.relay(room_a, None, &msg_event("hi")), 1);
        assert_eq!(content_of(rx_a.recv().await.unwrap()), "hi");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn relay_preserves_send_order() {
        let rooms = Rooms::new();
        let room = Uuid::now_v7();
        let (tx, mut rx) = mpsc::unbounded_channel();
        rooms.join(room, Uuid::now_v7(), tx);

        rooms.relay(room, None, &msg_event("first"));
        rooms.relay(room, None, &msg_event("second"));

        assert_eq!(content_of(rx.recv().await.unwrap()), "first");
        assert_eq!(content_of(rx.recv().await.unwrap()), "second");
    }

    #[tokio::test]
    async fn relay_skips_the_sender() {
        let rooms = Rooms::new();
        let room = Uuid::now_v7();
        let sender = Uuid::now_v7();

        let (tx_s, mut rx_s) = mpsc::unbounded_channel();
        let (tx_p, mut rx_p) = mpsc::unbounded_channel();
        rooms.join(room, sender, tx_s);
        rooms.join(room, Uuid::now_v7(), tx_p);

        assert_eq!(rooms.relay(room, Some(sender), &msg_event("hi")), 1);
        assert!(rx_s.try_recv().is_err());
        assert!(rx_p.try_recv().is_ok());
    }

    #[tokio::test]
    async fn dead_peer_does_not_abort_delivery() {
        let rooms = Rooms::new();
        let room = Uuid::now_v7();

        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        rooms.join(room, Uuid::now_v7(), tx_dead);
        rooms.join(room, Uuid::now_v7(), tx_live);
        drop(rx_dead);

        assert_eq!(rooms.relay(room, None, &msg_event("hi")), 1);
        assert!(rx_live.try_recv().is_ok());
    }

    #[tokio::test]
    async fn disconnect_discards_all_memberships() {
        let rooms = Rooms::new();
        let conn = Uuid::now_v7();
        let (room_a, room_b) = (Uuid::now_v7(), Uuid::now_v7());

        let (tx, _rx) = mpsc::unbounded_channel();
        rooms.join(room_a, conn, tx.clone());
        rooms.join(room_b, conn, tx);
        assert!(rooms.is_joined(conn, room_a));

        rooms.disconnect(conn);
        assert!(!rooms.is_joined(conn, room_a));
        assert!(!rooms.is_joined(conn, room_b));
        assert_eq!(rooms.relay(room_a, None, &msg_event("hi")), 0);
    }
}
