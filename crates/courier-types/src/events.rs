use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationId, Message, MessageId, Notification, NotificationId, UserId};

/// Chat-domain events received over the relay connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A message was posted to one of this user's conversations: either
    /// from a peer, or the relay's authoritative echo of an own send.
    NewMessage {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
    },

    /// The recipient's client acknowledged receipt of a message.
    MessageDelivered { message_id: MessageId },

    /// The recipient read a message.
    MessageRead { message_id: MessageId },

    /// A user started typing in a conversation with us.
    Typing { user_id: UserId },

    /// A user stopped typing.
    StopTyping { user_id: UserId },
}

impl ChatEvent {
    /// The fixed set of `type` strings classified as chat events. Every
    /// other inbound frame is a notification.
    pub const TYPES: [&'static str; 5] = [
        "new_message",
        "message_delivered",
        "message_read",
        "typing",
        "stop_typing",
    ];

    fn is_chat_type(kind: &str) -> bool {
        Self::TYPES.contains(&kind)
    }
}

/// An inbound frame, classified into one of the two event categories.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Chat(ChatEvent),
    Notification(Notification),
}

impl ServerFrame {
    /// Classify and decode a raw inbound frame.
    ///
    /// The `type` field alone decides the category: the five chat-event
    /// strings decode as [`ChatEvent`], everything else as a
    /// [`Notification`]. A chat-typed frame with a broken body is a decode
    /// error, never silently reclassified, so the connection driver drops
    /// it rather than misrouting it.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let chat = value
            .get("type")
            .and_then(|t| t.as_str())
            .is_some_and(ChatEvent::is_chat_type);
        if chat {
            Ok(Self::Chat(serde_json::from_value(value)?))
        } else {
            Ok(Self::Notification(serde_json::from_value(value)?))
        }
    }
}

/// Outbound action envelope, serialized as `{"action": <name>, ...fields}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    /// Send a direct message. `client_key` is generated by the sender and
    /// echoed back in the relay's authoritative copy.
    SendMessage {
        recipient_id: UserId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media: Option<String>,
        client_key: Uuid,
    },

    /// Tell the peer we started typing.
    Typing { recipient_id: UserId },

    /// Tell the peer we stopped typing.
    StopTyping { recipient_id: UserId },

    /// Mark a message or a notification as read. Exactly one of the two ids
    /// is set per action.
    MarkRead {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notification_id: Option<NotificationId>,
    },

    /// Acknowledge receipt of a message.
    MarkDelivered { message_id: MessageId },

    /// Heartbeat. The relay answers with a pong-typed notification.
    Ping,
}
