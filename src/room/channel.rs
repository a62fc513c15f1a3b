//! A named broadcast channel with presence.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;

use super::message::{Broadcast, ChatPayload};

/// Events delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoomEvent {
    /// A chat message.
    Broadcast(Broadcast),
    /// Presence changed; `online` holds every tracked key, sorted.
    PresenceSync { online: Vec<String> },
}

/// A realtime publish/subscribe topic.
///
/// Cheap to clone; all clones share the same subscribers.
#[derive(Debug, Clone)]
pub struct Room {
    inner: Arc<RoomInner>,
}

#[derive(Debug)]
struct RoomInner {
    name: String,
    tx: broadcast::Sender<RoomEvent>,
    history_limit: usize,
    /// Replay buffer. Held while sending so a new subscriber sees each
    /// message exactly once, either in its backlog or on its receiver.
    history: Mutex<History>,
    /// Presence key -> ids of the connections tracking it.
    presence: Mutex<HashMap<String, HashSet<u64>>>,
    next_conn: AtomicU64,
}

#[derive(Debug, Default)]
struct History {
    entries: VecDeque<Broadcast>,
    /// `seq` of the newest message sent, retained or not.
    last_seq: u64,
}

/// A fresh subscription: recent messages plus the live receiver.
#[derive(Debug)]
pub struct Subscription {
    pub backlog: Vec<Broadcast>,
    pub receiver: broadcast::Receiver<RoomEvent>,
    /// `seq` of the newest message sent before the receiver was attached.
    pub cursor: u64,
}

impl Room {
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize, history_limit: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(RoomInner {
                name: name.into(),
                tx,
                history_limit,
                history: Mutex::new(History {
                    entries: VecDeque::with_capacity(history_limit),
                    last_seq: 0,
                }),
                presence: Mutex::new(HashMap::new()),
                next_conn: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Broadcast a message. Returns the number of live subscribers reached.
    pub fn send(&self, payload: ChatPayload) -> usize {
        let mut msg = Broadcast::message(payload);
        let mut history = self
            .inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        history.last_seq += 1;
        msg.seq = history.last_seq;
        if self.inner.history_limit > 0 {
            if history.entries.len() == self.inner.history_limit {
                history.entries.pop_front();
            }
            history.entries.push_back(msg.clone());
        }

        let delivered = self.inner.tx.send(RoomEvent::Broadcast(msg)).unwrap_or(0);
        drop(history);

        tracing::debug!(
            name: "room.message.sent",
            room = %self.inner.name,
            delivered,
            "Broadcast sent"
        );
        delivered
    }

    pub fn subscribe(&self) -> Subscription {
        self.subscribe_after(0)
    }

    /// Subscribe, with a backlog of only the retained messages newer than
    /// `after`. Used to resume from a known `seq` without repeats.
    ///
    /// An `after` past the newest `seq` was issued before a restart; the whole
    /// backlog is replayed. Messages already dropped from history cannot be
    /// replayed, so with history disabled a resume still has a gap.
    pub fn subscribe_after(&self, after: u64) -> Subscription {
        let history = self
            .inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let after = if after > history.last_seq { 0 } else { after };
        let receiver = self.inner.tx.subscribe();
        Subscription {
            backlog: history
                .entries
                .iter()
                .filter(|m| m.seq > after)
                .cloned()
                .collect(),
            receiver,
            cursor: history.last_seq,
        }
    }

    /// Mark `key` online for as long as the returned guard lives.
    ///
    /// Several connections may track the same key; it stays online until the
    /// last of them is dropped.
    pub fn track(&self, key: impl Into<String>) -> PresenceGuard {
        let key = key.into();
        let conn = self.inner.next_conn.fetch_add(1, Ordering::Relaxed);
        {
            let mut presence = self.presence();
            let conns = presence.entry(key.clone()).or_default();
            conns.insert(conn);
            if conns.len() == 1 {
                self.sync_presence(&presence);
            }
        }
        PresenceGuard {
            room: self.clone(),
            key,
            conn,
        }
    }

    /// Drop every connection tracking `key`.
    pub fn untrack_all(&self, key: &str) {
        let mut presence = self.presence();
        if presence.remove(key).is_some() {
            self.sync_presence(&presence);
        }
    }

    /// Keys currently online, sorted.
    pub fn presence_state(&self) -> Vec<String> {
        sorted_keys(&self.presence())
    }

    fn untrack(&self, key: &str, conn: u64) {
        let mut presence = self.presence();
        let emptied = match presence.get_mut(key) {
            Some(conns) => conns.remove(&conn) && conns.is_empty(),
            None => false,
        };
        if emptied {
            presence.remove(key);
            self.sync_presence(&presence);
        }
    }

    /// Announce `presence`. Callers hold the presence lock so announcements
    /// go out in the order the changes were made.
    fn sync_presence(&self, presence: &HashMap<String, HashSet<u64>>) {
        let online = sorted_keys(presence);
        tracing::debug!(
            name: "room.presence.sync",
            room = %self.inner.name,
            online = online.len(),
            "Presence changed"
        );
        let _ = self.inner.tx.send(RoomEvent::PresenceSync { online });
    }

    fn presence(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashSet<u64>>> {
        self.inner
            .presence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn sorted_keys(presence: &HashMap<String, HashSet<u64>>) -> Vec<String> {
    let keys: BTreeSet<&String> = presence.keys().collect();
    keys.into_iter().cloned().collect()
}

/// Keeps a presence key tracked until dropped.
#[derive(Debug)]
pub struct PresenceGuard {
    room: Room,
    key: String,
    conn: u64,
}

impl PresenceGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.room.untrack(&self.key, self.conn);
    }
}

/// Channels by name.
#[derive(Debug, Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
    capacity: usize,
    history_limit: usize,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(capacity: usize, history_limit: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            history_limit,
        }
    }

    /// Get a channel by name, creating it on first use.
    pub fn channel(&self, name: &str) -> Room {
        {
            let guard = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(room) = guard.get(name) {
                return room.clone();
            }
        }

        let mut guard = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(name.to_string())
            .or_insert_with(|| Room::new(name, self.capacity, self.history_limit))
            .clone()
    }

    /// Remove `key` from presence in every channel.
    pub fn untrack_everywhere(&self, key: &str) {
        let rooms: Vec<Room> = self
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for room in rooms {
            room.untrack_all(key);
        }
    }
}
