//! Async shell around [`ChatSession`]: one select loop owning the session,
//! the typing signaler and the relay subscription. Commands come in from the
//! embedder, view updates go back out; history fetches run as spawned tasks
//! tagged with the session's selection token.

use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use courier_client::RelayClient;
use courier_rest::ApiClient;
use courier_types::models::{Conversation, ConversationId, Message, UserId};

use crate::session::{ChatSession, Effect, SessionUpdate};
use crate::typing::{TypingSignal, TypingSignaler};

/// What the embedder can ask of a running session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Open a conversation: fetch it plus its first history page, then
    /// install both.
    Select(ConversationId),
    /// The composer's current text; drives typing signals.
    Input(String),
    /// Send the composed message.
    Send {
        content: String,
        media: Option<String>,
    },
    /// Acknowledge the peer's messages as read.
    MarkRead,
    /// Delete the active conversation, then clear the session.
    Delete,
    /// Refetch the conversation list.
    ListConversations,
    /// Tear the driver down.
    Close,
}

type FetchOutcome = (u64, courier_rest::Result<(Conversation, Vec<Message>)>);

/// Drives a [`ChatSession`] over a relay subscription.
pub struct SessionDriver {
    relay: RelayClient,
    api: ApiClient,
    session: ChatSession,
    signaler: TypingSignaler,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl SessionDriver {
    /// Spawn the driver task. Dropping the returned command sender, or
    /// sending [`SessionCommand::Close`], tears it down along with its relay
    /// subscription.
    pub fn spawn(
        me: UserId,
        relay: RelayClient,
        api: ApiClient,
    ) -> (
        mpsc::UnboundedSender<SessionCommand>,
        mpsc::UnboundedReceiver<SessionUpdate>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let driver = Self {
            relay,
            api,
            session: ChatSession::new(me),
            signaler: TypingSignaler::default(),
            updates: update_tx,
        };
        tokio::spawn(driver.run(command_rx));
        (command_tx, update_rx)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        let mut chat = self.relay.chat_events();
        let (fetch_tx, mut fetches) = mpsc::unbounded_channel::<FetchOutcome>();

        loop {
            let typing_deadline = self.signaler.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(SessionCommand::Close) => break,
                    Some(command) => self.handle_command(command, &fetch_tx).await,
                },

                event = chat.recv() => match event {
                    Some(event) => {
                        let effects = self.session.apply(event);
                        self.run_effects(effects);
                    }
                    // The relay dropped its subscriber registry on
                    // disconnect; a fresh subscription is live again after
                    // the next connect.
                    None => chat = self.relay.chat_events(),
                },

                outcome = fetches.recv() => {
                    if let Some((token, result)) = outcome {
                        match result {
                            Ok((conversation, newest_first)) => {
                                let effects =
                                    self.session.finish_select(token, conversation, newest_first);
                                self.run_effects(effects);
                            }
                            Err(err) => warn!("selection fetch failed: {}", err),
                        }
                    }
                }

                _ = typing_idle(typing_deadline) => {
                    if let Some(TypingSignal::Stop) = self.signaler.expire(Instant::now()) {
                        self.transmit_typing(TypingSignal::Stop);
                    }
                }
            }
        }
        debug!("session driver stopped");
    }

    async fn handle_command(
        &mut self,
        command: SessionCommand,
        fetch_tx: &mpsc::UnboundedSender<FetchOutcome>,
    ) {
        match command {
            SessionCommand::Select(id) => {
                let token = self.session.begin_select(id);
                let api = self.api.clone();
                let tx = fetch_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send((token, fetch_selection(api, id).await));
                });
            }

            SessionCommand::Input(text) => {
                if let Some(signal) = self.signaler.input(&text, Instant::now()) {
                    self.transmit_typing(signal);
                }
            }

            SessionCommand::Send { content, media } => {
                // Sending empties the composer, which ends the typing burst.
                if let Some(TypingSignal::Stop) = self.signaler.clear() {
                    self.transmit_typing(TypingSignal::Stop);
                }
                let effects = self.session.compose_send(content, media, Utc::now());
                self.run_effects(effects);
            }

            SessionCommand::MarkRead => {
                let effects = self.session.mark_peer_messages_read();
                self.run_effects(effects);
            }

            SessionCommand::Delete => {
                let Some(id) = self.session.conversation().map(|c| c.id) else {
                    return;
                };
                match self.api.delete_conversation(id).await {
                    Ok(()) => {
                        let effects = self.session.clear();
                        self.run_effects(effects);
                        self.refresh_conversations();
                    }
                    Err(err) => warn!("delete of conversation {} failed: {}", id, err),
                }
            }

            SessionCommand::ListConversations => self.refresh_conversations(),

            // Handled by the loop before we get here.
            SessionCommand::Close => {}
        }
    }

    fn run_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Transmit(action) => self.relay.send(action),
                Effect::RefreshConversations => self.refresh_conversations(),
                Effect::Emit(update) => {
                    let _ = self.updates.send(update);
                }
            }
        }
    }

    fn refresh_conversations(&self) {
        let api = self.api.clone();
        let updates = self.updates.clone();
        tokio::spawn(async move {
            match api.conversations(1).await {
                Ok(page) => {
                    let _ = updates.send(SessionUpdate::Conversations(page.results));
                }
                Err(err) => warn!("conversation list refresh failed: {}", err),
            }
        });
    }

    fn transmit_typing(&self, signal: TypingSignal) {
        let Some(peer) = self.session.peer_id() else {
            return;
        };
        match signal {
            TypingSignal::Start => self.relay.send_typing(peer),
            TypingSignal::Stop => self.relay.send_stop_typing(peer),
        }
    }
}

/// The conversation plus its first history page, newest message first.
async fn fetch_selection(
    api: ApiClient,
    id: ConversationId,
) -> courier_rest::Result<(Conversation, Vec<Message>)> {
    let conversation = api.conversation(id).await?;
    let history = api.conversation_messages(id, 1).await?;
    Ok((conversation, history.results))
}

/// Pends forever while no typing deadline is armed.
async fn typing_idle(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
        None => std::future::pending().await,
    }
}
