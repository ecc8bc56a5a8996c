use enum_display_derive::Display;

use std::fmt::Display;
use std::time::Duration;

/// Lifecycle of a device session
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum SessionState {
    /// No transport is held
    Disconnected,

    /// Registration with the provisioning service is in flight
    Provisioning,

    /// A transport is being opened and subscribed
    Connecting,

    /// Transport and twin are both held
    Connected,

    /// The transport failed and was dropped
    Faulted,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Disconnected
    }
}

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Consecutive failed connects after which the device provisions again
pub const CONNECT_FAILURES_BEFORE_REPROVISION: u32 = 2;

/// Opt-in recovery after a connection loss
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_backoff: Duration) -> ReconnectPolicy {
        ReconnectPolicy {
            max_backoff: max_backoff.max(INITIAL_BACKOFF),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: INITIAL_BACKOFF,
            max: self.max_backoff,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::new(Duration::from_secs(60))
    }
}

/// Exponential delay sequence: 1s, 2s, 4s ... capped at the policy maximum
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    /// Returns the delay to wait now and doubles the following one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = INITIAL_BACKOFF;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_max() {
        // Arrange
        let mut backoff = ReconnectPolicy::new(Duration::from_secs(5)).backoff();

        // Act
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();

        // Assert
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = ReconnectPolicy::default().backoff();
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();

        assert_eq!(backoff.next_delay(), INITIAL_BACKOFF);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Connected.to_string(), "Connected");
        assert_eq!(SessionState::default(), SessionState::Disconnected);
    }
}
