//! WebSocket adapters: fan-out hub, per-connection session, upgrader.
//!
//! ```text
//! HTTP upgrade ──▶ Upgrader ──▶ Client (write/read/message pumps)
//!                                  │
//!                        Hub ◀─────┘ register / unregister
//!                         │
//!                         └──▶ BroadcastToRoom / BroadcastToUser
//! ```

mod client;
mod hub;
mod messages;
mod upgrader;

pub use client::{Client, ClientConfig};
pub use hub::{Hub, HubStats, RoomStats};
pub use messages::{
    user_status, ChatMessageData, IncomingFrame, MessageReadData, MessageUpdatedData,
    OutgoingFrame, UserStatusData, UserTypingData,
};
pub use upgrader::{
    ws_handler, ChatUpgrader, ConnectionAuthenticator, ConnectionLimits, OriginPolicy,
    RoomAccessValidator, UpgraderState,
};
