use anyhow::Context;
use courier_client::{RelayClient, RelayConfig};
use courier_rest::ApiClient;
use courier_session::{SessionCommand, SessionDriver, SessionUpdate};
use courier_types::{ConversationId, DeliveryStatus, Message, UserId};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "courier_cli=debug,courier_client=debug,courier_session=debug,courier_rest=debug"
                    .into()
            }),
        )
        .init();

    // Config
    let me = UserId(
        std::env::var("COURIER_USER_ID")
            .context("COURIER_USER_ID is required")?
            .parse()
            .context("COURIER_USER_ID must be a numeric user id")?,
    );
    let api_url =
        std::env::var("COURIER_API_URL").unwrap_or_else(|_| "http://localhost:8000/api".into());
    let token = std::env::var("COURIER_TOKEN").context("COURIER_TOKEN is required")?;

    // Wiring: every component takes its dependencies explicitly
    let relay = RelayClient::new(RelayConfig::from_env());
    let api = ApiClient::new(api_url, token);
    relay.connect();

    // Notifications print as they arrive. Pongs flow through the same
    // fan-out; the terminal has no use for them.
    let mut notifications = relay.notifications();
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            if notification.is_pong() {
                continue;
            }
            println!(
                "~ [{}] {}: {}",
                notification.kind, notification.title, notification.content
            );
        }
    });

    let (commands, updates) = SessionDriver::spawn(me, relay.clone(), api);
    tokio::spawn(render(me, updates));

    info!("courier ready (user {})", me);
    println!("commands: /list, /open <id>, /read, /delete, /quit; anything else sends");

    repl(&commands).await?;

    let _ = commands.send(SessionCommand::Close);
    relay.disconnect();
    Ok(())
}

/// Narrate session updates. A richer embedder would diff these into a view;
/// the terminal just prints them.
async fn render(me: UserId, mut updates: mpsc::UnboundedReceiver<SessionUpdate>) {
    while let Some(update) = updates.recv().await {
        match update {
            SessionUpdate::Conversation(Some(conversation)) => {
                println!(
                    "* conversation {} with {}",
                    conversation.id, conversation.peer.username
                );
            }
            SessionUpdate::Conversation(None) => println!("* no conversation selected"),
            SessionUpdate::Messages(messages) => {
                if let Some(message) = messages.last() {
                    println!("{}", format_message(me, message));
                }
            }
            SessionUpdate::PeerTyping(true) => println!("* peer is typing"),
            SessionUpdate::PeerTyping(false) => {}
            SessionUpdate::Conversations(conversations) => {
                for conversation in &conversations {
                    println!(
                        "* {} {} (unread {})",
                        conversation.id, conversation.peer.username, conversation.unread_count
                    );
                }
            }
        }
    }
}

fn format_message(me: UserId, message: &Message) -> String {
    let who = if message.sender_id == me { "you" } else { "peer" };
    let receipt = match message.status {
        DeliveryStatus::Sent => "sent",
        DeliveryStatus::Delivered => "delivered",
        DeliveryStatus::Read => "read",
    };
    format!("[{}] {}: {}", receipt, who, message.content)
}

/// Line-oriented command loop. Bare text goes to the active conversation;
/// slash commands steer the session.
async fn repl(commands: &mpsc::UnboundedSender<SessionCommand>) -> anyhow::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        let command = match line {
            "/list" => SessionCommand::ListConversations,
            "/read" => SessionCommand::MarkRead,
            "/delete" => SessionCommand::Delete,
            _ => {
                if let Some(rest) = line.strip_prefix("/open") {
                    match rest.trim().parse() {
                        Ok(id) => SessionCommand::Select(ConversationId(id)),
                        Err(_) => {
                            println!("usage: /open <conversation id>");
                            continue;
                        }
                    }
                } else if line.starts_with('/') {
                    println!("unknown command: {}", line);
                    continue;
                } else {
                    // A line stands in for a composing burst: typed, then sent.
                    let _ = commands.send(SessionCommand::Input(line.to_string()));
                    SessionCommand::Send {
                        content: line.to_string(),
                        media: None,
                    }
                }
            }
        };
        let _ = commands.send(command);
    }
    Ok(())
}
