use std::time::{Duration, Instant};

/// How long after the last keystroke the peer is told we stopped typing.
pub const TYPING_IDLE_TIMEOUT: Duration = Duration::from_millis(2000);

/// What to tell the peer about our typing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Debounces composer keystrokes into start/stop typing signals.
///
/// The first non-empty keystroke after idle yields [`TypingSignal::Start`];
/// every further keystroke re-arms the idle deadline without signalling.
/// The deadline expiring, or the composer going empty, yields
/// [`TypingSignal::Stop`]. Time is passed in so the logic tests without a
/// clock.
pub struct TypingSignaler {
    idle_timeout: Duration,
    deadline: Option<Instant>,
}

impl TypingSignaler {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            deadline: None,
        }
    }

    /// Register the composer's current text.
    pub fn input(&mut self, text: &str, now: Instant) -> Option<TypingSignal> {
        if text.is_empty() {
            return self.clear();
        }
        let was_idle = self.deadline.is_none();
        self.deadline = Some(now + self.idle_timeout);
        was_idle.then_some(TypingSignal::Start)
    }

    /// When the pending stop signal is due, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fire the deadline. A call before it is due, or with none armed, does
    /// nothing.
    pub fn expire(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(TypingSignal::Stop)
            }
            _ => None,
        }
    }

    /// Disarm and stop immediately. Used for an emptied composer, a sent
    /// message, and teardown.
    pub fn clear(&mut self) -> Option<TypingSignal> {
        self.deadline.take().map(|_| TypingSignal::Stop)
    }
}

impl Default for TypingSignaler {
    fn default() -> Self {
        Self::new(TYPING_IDLE_TIMEOUT)
    }
}
