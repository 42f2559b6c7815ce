//! The active conversation's state machine.
//!
//! `ChatSession` is pure: methods mutate local state and return the effects
//! the surrounding driver should carry out. Nothing here touches the network
//! or the clock, which keeps every transition synchronously testable.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use courier_types::events::{ChatEvent, ClientAction};
use courier_types::models::{
    Conversation, ConversationId, DeliveryStatus, Message, MessageId, UserId,
};

/// What the driver should do after a state transition.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Send an action over the relay.
    Transmit(ClientAction),
    /// Previews and unread counts changed somewhere; the conversation list
    /// should be refetched.
    RefreshConversations,
    /// The view changed; surface the delta to the embedder.
    Emit(SessionUpdate),
}

/// View deltas surfaced to the embedder.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// The active conversation changed (`None` on clear).
    Conversation(Option<Conversation>),
    /// The active conversation's messages, oldest first.
    Messages(Vec<Message>),
    /// The peer started or stopped typing.
    PeerTyping(bool),
    /// A fresh conversation list, produced by a refresh.
    Conversations(Vec<Conversation>),
}

enum Phase {
    Idle,
    /// A selection's history fetch is in flight; `token` guards against a
    /// late fetch landing after the selection moved on.
    Loading { id: ConversationId, token: u64 },
    Active { conversation: Conversation },
}

pub struct ChatSession {
    me: UserId,
    phase: Phase,
    /// Oldest first.
    messages: Vec<Message>,
    typing: HashSet<UserId>,
    generation: u64,
}

impl ChatSession {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            phase: Phase::Idle,
            messages: Vec::new(),
            typing: HashSet::new(),
            generation: 0,
        }
    }

    /// Start switching to a conversation. Returns the token the history
    /// fetch must present to [`ChatSession::finish_select`].
    pub fn begin_select(&mut self, id: ConversationId) -> u64 {
        self.generation += 1;
        self.phase = Phase::Loading {
            id,
            token: self.generation,
        };
        self.messages.clear();
        self.typing.clear();
        self.generation
    }

    /// Install a completed selection fetch. `newest_first` is the history
    /// page as the API returns it; display order is the reverse. A token
    /// from a superseded selection is discarded: the session has moved on.
    pub fn finish_select(
        &mut self,
        token: u64,
        conversation: Conversation,
        newest_first: Vec<Message>,
    ) -> Vec<Effect> {
        match self.phase {
            Phase::Loading { id, token: current } if current == token && id == conversation.id => {}
            _ => {
                debug!(
                    "discarding stale history fetch for conversation {}",
                    conversation.id
                );
                return Vec::new();
            }
        }

        let mut messages = newest_first;
        messages.reverse();
        self.messages = messages;
        self.phase = Phase::Active {
            conversation: conversation.clone(),
        };
        vec![
            Effect::Emit(SessionUpdate::Conversation(Some(conversation))),
            Effect::Emit(SessionUpdate::Messages(self.messages.clone())),
        ]
    }

    /// Drop the active conversation.
    pub fn clear(&mut self) -> Vec<Effect> {
        // Orphan any in-flight selection fetch as well.
        self.generation += 1;
        self.phase = Phase::Idle;
        self.messages.clear();
        let had_typing = !self.typing.is_empty();
        self.typing.clear();

        let mut effects = vec![
            Effect::Emit(SessionUpdate::Conversation(None)),
            Effect::Emit(SessionUpdate::Messages(Vec::new())),
        ];
        if had_typing {
            effects.push(Effect::Emit(SessionUpdate::PeerTyping(false)));
        }
        effects
    }

    /// Feed one inbound chat event through the session.
    pub fn apply(&mut self, event: ChatEvent) -> Vec<Effect> {
        match event {
            ChatEvent::NewMessage { message, .. } => self.on_new_message(message),
            ChatEvent::MessageDelivered { message_id } => {
                self.on_receipt(&message_id, DeliveryStatus::Delivered)
            }
            ChatEvent::MessageRead { message_id } => {
                self.on_receipt(&message_id, DeliveryStatus::Read)
            }
            ChatEvent::Typing { user_id } => self.on_typing(user_id, true),
            ChatEvent::StopTyping { user_id } => self.on_typing(user_id, false),
        }
    }

    /// Optimistic send: one `send_message` action out, one local entry in,
    /// no server round-trip between them.
    pub fn compose_send(
        &mut self,
        content: impl Into<String>,
        media: Option<String>,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        let Phase::Active { conversation } = &self.phase else {
            debug!("ignoring send with no active conversation");
            return Vec::new();
        };
        let content = content.into();
        if content.is_empty() && media.is_none() {
            return Vec::new();
        }

        let recipient_id = conversation.peer.id;
        let client_key = Uuid::new_v4();
        self.messages.push(Message {
            id: MessageId::local(),
            sender_id: self.me,
            recipient_id,
            content: content.clone(),
            media: media.clone(),
            status: DeliveryStatus::Sent,
            created_at: now,
            client_key: Some(client_key),
        });

        vec![
            Effect::Transmit(ClientAction::SendMessage {
                recipient_id,
                content,
                media,
                client_key,
            }),
            Effect::Emit(SessionUpdate::Messages(self.messages.clone())),
        ]
    }

    /// Acknowledge every unread peer message as read. When a message counts
    /// as read is the embedder's call; this composes the acks once it is.
    pub fn mark_peer_messages_read(&mut self) -> Vec<Effect> {
        let Phase::Active { conversation } = &self.phase else {
            return Vec::new();
        };
        let peer = conversation.peer.id;

        let mut effects = Vec::new();
        for message in &mut self.messages {
            if message.sender_id == peer
                && !message.id.is_local()
                && message.status.advance_to(DeliveryStatus::Read)
            {
                effects.push(Effect::Transmit(ClientAction::MarkRead {
                    message_id: Some(message.id.clone()),
                    notification_id: None,
                }));
            }
        }
        if !effects.is_empty() {
            effects.push(Effect::Emit(SessionUpdate::Messages(self.messages.clone())));
        }
        effects
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        match &self.phase {
            Phase::Active { conversation } => Some(conversation),
            _ => None,
        }
    }

    pub fn peer_id(&self) -> Option<UserId> {
        self.conversation().map(|c| c.peer.id)
    }

    /// Oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn typing_peers(&self) -> &HashSet<UserId> {
        &self.typing
    }

    fn on_new_message(&mut self, message: Message) -> Vec<Effect> {
        // Previews and unread counts are the conversation list's business,
        // whichever conversation the message lands in.
        let mut effects = vec![Effect::RefreshConversations];

        let Phase::Active { conversation } = &self.phase else {
            return effects;
        };
        let peer = conversation.peer.id;
        if message.sender_id != peer && message.recipient_id != peer {
            return effects;
        }

        // The relay echoes our own sends back with the client key we minted;
        // the echo replaces the optimistic entry instead of appending a twin.
        if let Some(key) = message.client_key {
            if let Some(index) = self
                .messages
                .iter()
                .position(|m| m.id.is_local() && m.client_key == Some(key))
            {
                let mut status = self.messages[index].status;
                status.advance_to(message.status);
                self.messages[index] = Message { status, ..message };
                effects.push(Effect::Emit(SessionUpdate::Messages(self.messages.clone())));
                return effects;
            }
        }

        if message.sender_id == peer {
            if self.typing.remove(&peer) {
                effects.push(Effect::Emit(SessionUpdate::PeerTyping(false)));
            }
            effects.push(Effect::Transmit(ClientAction::MarkDelivered {
                message_id: message.id.clone(),
            }));
        }
        self.messages.push(message);
        effects.push(Effect::Emit(SessionUpdate::Messages(self.messages.clone())));
        effects
    }

    fn on_receipt(&mut self, message_id: &MessageId, status: DeliveryStatus) -> Vec<Effect> {
        // Receipts for messages we do not hold belong to other
        // conversations; they are not errors.
        let Some(message) = self.messages.iter_mut().find(|m| m.id == *message_id) else {
            return Vec::new();
        };
        if message.status.advance_to(status) {
            vec![Effect::Emit(SessionUpdate::Messages(self.messages.clone()))]
        } else {
            Vec::new()
        }
    }

    fn on_typing(&mut self, user_id: UserId, typing: bool) -> Vec<Effect> {
        let Phase::Active { conversation } = &self.phase else {
            return Vec::new();
        };
        if user_id != conversation.peer.id {
            return Vec::new();
        }

        let changed = if typing {
            self.typing.insert(user_id)
        } else {
            self.typing.remove(&user_id)
        };
        if changed {
            vec![Effect::Emit(SessionUpdate::PeerTyping(typing))]
        } else {
            Vec::new()
        }
    }
}
