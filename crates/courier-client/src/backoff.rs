use std::time::Duration;

/// Delay before reconnect attempt `attempt` (zero-indexed): the base delay
/// doubled once per prior attempt, capped at `max`.
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}
