//! Shared types for the Courier realtime messaging client.
//!
//! Everything that crosses a boundary lives here: the JSON wire frames
//! exchanged with the relay (`events`), the client-side view of the
//! messaging domain (`models`), and the REST payloads of the platform API
//! (`api`). Canonical definitions live in this crate so the connection
//! manager, session controller and REST client never drift apart.

pub mod api;
pub mod events;
pub mod models;

// Re-export the types nearly every consumer touches.
pub use api::Page;
pub use events::{ChatEvent, ClientAction, ServerFrame};
pub use models::{
    Conversation, ConversationId, DeliveryStatus, Message, MessageId, Notification,
    NotificationId, UserId, UserSummary,
};
