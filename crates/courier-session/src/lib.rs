//! Chat session controller: the view model of the active conversation.

pub mod driver;
pub mod session;
pub mod typing;

pub use driver::{SessionCommand, SessionDriver};
pub use session::{ChatSession, Effect, SessionUpdate};
pub use typing::{TYPING_IDLE_TIMEOUT, TypingSignal, TypingSignaler};
