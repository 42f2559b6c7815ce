//! Connection manager for the message relay.
//!
//! One persistent WebSocket per [`RelayClient`], kept alive with an
//! application-level heartbeat and rebuilt with exponential backoff when it
//! drops. Outbound actions queue in FIFO order while the link is down and
//! flush on open; inbound frames fan out to chat-event and notification
//! subscribers.

pub mod backoff;
pub mod config;
pub mod manager;
mod socket;

pub use config::RelayConfig;
pub use manager::{LinkState, RelayClient};
