//! Realtime chat channels.
//!
//! A [`Room`] fans chat messages out to every connected client and tracks who
//! is online. Delivery is in-process over a [`tokio::sync::broadcast`]
//! channel; a client that falls behind skips the messages it missed instead of
//! slowing the room down.
//!
//! # Example
//!
//! ```rust
//! use giga_chat::room::{ChatPayload, RoomRegistry};
//!
//! let rooms = RoomRegistry::new(64, 10);
//! let room = rooms.channel("room_one");
//! let _online = room.track("user-1");
//! room.send(ChatPayload::system("Welcome!"));
//!
//! assert_eq!(room.presence_state(), vec!["user-1"]);
//! assert_eq!(room.subscribe().backlog.len(), 1);
//! ```

mod channel;
mod message;

pub use channel::{PresenceGuard, Room, RoomEvent, RoomRegistry, Subscription};
pub use message::{
    AI_AVATAR, AI_EMAIL, AI_NAME, Broadcast, ChatPayload, MessageKind, SYSTEM_AVATAR,
    SYSTEM_EMAIL, SYSTEM_NAME,
};
