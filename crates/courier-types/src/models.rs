use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix on locally generated message ids. The relay never issues ids with
/// this prefix, so optimistic entries can always be told apart from
/// server-assigned ones.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Numeric id of a platform user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Numeric id of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

/// Numeric id of a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of a message: an opaque server-assigned string, or a locally generated
/// temporary id for an optimistic entry that has not been echoed back yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a fresh temporary id for an optimistic message.
    pub fn local() -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4()))
    }

    /// True for locally generated ids the server has never seen.
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery state of a message. Declaration order is the receipt order:
/// a status only ever moves forward through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Advance to `next` if it is further along. Receipts can arrive out of
    /// order; a `delivered` after a `read` must not regress the status.
    /// Returns whether anything changed.
    pub fn advance_to(&mut self, next: DeliveryStatus) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

/// A direct message as the client sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    /// Idempotency key generated at optimistic-send time and echoed back by
    /// the relay in the authoritative copy. Correlates the echo with the
    /// optimistic entry so it can be replaced in place instead of appended
    /// as a duplicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<Uuid>,
}

/// Compact view of the user on the other end of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A conversation as returned by the platform API. Authoritative state lives
/// on the server; this is fetched on selection, evolved in place by wire
/// events, and discarded when another conversation is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub peer: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
}

/// A non-chat event pushed over the relay connection. Heartbeat
/// acknowledgments arrive shaped like this with `type == "pong"`, which is
/// why every field except `kind` tolerates being absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub id: NotificationId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Whether this is the relay's answer to a heartbeat ping. Pongs are not
    /// suppressed from the notification fan-out, merely recognizable.
    pub fn is_pong(&self) -> bool {
        self.kind == "pong"
    }
}
