use std::time::Duration;

/// First reconnect delay; doubles on every further attempt.
pub const DEFAULT_BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Ceiling on the reconnect delay.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// Reconnect attempts before the driver gives up and waits for an explicit
/// `connect()`.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Cadence of application-level pings while the link is open.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Consecutive unanswered pings tolerated before the link is recycled.
pub const DEFAULT_MISSED_PONG_LIMIT: u8 = 2;

/// Tuning for the relay link. `Default` gives the production values; tests
/// shrink the timings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// `ws://` or `wss://` endpoint of the message relay. `None` leaves the
    /// client offline and makes `connect()` log an error instead.
    pub relay_url: Option<String>,
    pub base_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    /// Set to 0 to keep sending pings without ever dropping a silent link.
    pub missed_pong_limit: u8,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            base_reconnect_delay: DEFAULT_BASE_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            missed_pong_limit: DEFAULT_MISSED_PONG_LIMIT,
        }
    }
}

impl RelayConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: Some(relay_url.into()),
            ..Self::default()
        }
    }

    /// Reads `COURIER_RELAY_URL`; everything else stays at the defaults.
    pub fn from_env() -> Self {
        Self {
            relay_url: std::env::var("COURIER_RELAY_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tuning() {
        let config = RelayConfig::default();
        assert_eq!(config.relay_url, None);
        assert_eq!(config.base_reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.missed_pong_limit, 2);
    }
}
