//! Engine timing and retry knobs.

use std::time::Duration;

/// Tunable parameters for the session orchestrator.
///
/// All values are constructor-injected so tests can run with short
/// timeouts and virtual time. `Default` carries the production values.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// SSE inactivity window before the watchdog hands off to polling.
    pub silence_timeout: Duration,
    /// Head start given to SSE before the first poll tick.
    pub poll_initial_delay: Duration,
    /// Interval between poll ticks.
    pub poll_interval: Duration,
    /// Consecutive poll failures tolerated before giving up.
    pub poll_failure_budget: u32,
    /// Minimum spacing between applied partial-image preview frames.
    pub image_preview_min_interval: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_secs(10),
            poll_initial_delay: Duration::from_secs(2),
            poll_interval: Duration::from_millis(1500),
            poll_failure_budget: 5,
            image_preview_min_interval: Duration::from_secs(4),
        }
    }
}

impl PlayerConfig {
    /// Profile for guest sessions: a longer poll interval to reduce load
    /// from unauthenticated clients.
    pub fn guest() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = PlayerConfig::default();
        assert_eq!(config.silence_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_initial_delay, Duration::from_secs(2));
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
        assert_eq!(config.poll_failure_budget, 5);
        assert_eq!(config.image_preview_min_interval, Duration::from_secs(4));
    }

    #[test]
    fn test_guest_profile_slows_polling_only() {
        let config = PlayerConfig::guest();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.silence_timeout, Duration::from_secs(10));
    }
}
