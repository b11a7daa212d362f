//! Session configuration.
//!
//! [`SessionConfig`] controls the engine's timeouts and resource bounds.
//! All values have documented defaults; setters follow the builder style
//! so a config can be assembled inline:
//!
//! ```
//! use std::time::Duration;
//! use bidi_session::SessionConfig;
//!
//! let config = SessionConfig::new()
//!     .command_timeout(Duration::from_secs(10))
//!     .request_retention(Duration::from_secs(60));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for the `session.new` handshake.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for command execution.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default retention window for terminal request records.
const DEFAULT_REQUEST_RETENTION: Duration = Duration::from_secs(30);

/// Default cap on retained terminal request records.
const DEFAULT_MAX_REQUEST_RECORDS: usize = 1024;

/// Default cap on in-flight commands before new ones are rejected.
const DEFAULT_MAX_PENDING_COMMANDS: usize = 100;

/// Default capacity of queue-backed subscription channels.
const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

// ============================================================================
// SessionConfig
// ============================================================================

/// Configuration for a [`Session`](crate::Session).
///
/// # Defaults
///
/// | Setting | Default |
/// |---------|---------|
/// | `handshake_timeout` | 30 s |
/// | `command_timeout` | 30 s |
/// | `request_retention` | 30 s |
/// | `max_request_records` | 1024 |
/// | `max_pending_commands` | 100 |
/// | `event_queue_capacity` | 256 |
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum time to wait for the `session.new` handshake.
    pub handshake_timeout: Duration,

    /// Maximum time to wait for a command response.
    pub command_timeout: Duration,

    /// How long terminal request records stay in the correlation table
    /// to satisfy late `await_request_phase` calls.
    pub request_retention: Duration,

    /// Hard cap on retained terminal request records; oldest are purged
    /// first when the cap is exceeded.
    pub max_request_records: usize,

    /// Maximum pending commands before new sends are rejected.
    pub max_pending_commands: usize,

    /// Capacity of the bounded channel behind queue-backed subscriptions.
    pub event_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            request_retention: DEFAULT_REQUEST_RETENTION,
            max_request_records: DEFAULT_MAX_REQUEST_RECORDS,
            max_pending_commands: DEFAULT_MAX_PENDING_COMMANDS,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Creates a config with default values.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the command timeout.
    #[inline]
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the retention window for terminal request records.
    #[inline]
    #[must_use]
    pub fn request_retention(mut self, retention: Duration) -> Self {
        self.request_retention = retention;
        self
    }

    /// Sets the cap on retained terminal request records.
    #[inline]
    #[must_use]
    pub fn max_request_records(mut self, max: usize) -> Self {
        self.max_request_records = max;
        self
    }

    /// Sets the cap on in-flight commands.
    #[inline]
    #[must_use]
    pub fn max_pending_commands(mut self, max: usize) -> Self {
        self.max_pending_commands = max;
        self
    }

    /// Sets the capacity of queue-backed subscription channels.
    #[inline]
    #[must_use]
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity.max(1);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.handshake_timeout.as_secs(), 30);
        assert_eq!(config.command_timeout.as_secs(), 30);
        assert_eq!(config.request_retention.as_secs(), 30);
        assert_eq!(config.max_request_records, 1024);
        assert_eq!(config.max_pending_commands, 100);
        assert_eq!(config.event_queue_capacity, 256);
    }

    #[test]
    fn test_builder_setters() {
        let config = SessionConfig::new()
            .command_timeout(Duration::from_millis(500))
            .max_pending_commands(7)
            .event_queue_capacity(0);

        assert_eq!(config.command_timeout.as_millis(), 500);
        assert_eq!(config.max_pending_commands, 7);
        // Capacity is clamped to at least one slot.
        assert_eq!(config.event_queue_capacity, 1);
    }
}
