//! The traits and settings an application supplies to run a channel.

use std::time::Duration;

/// Default interval between handshake retransmission attempts.
pub const HANDSHAKE_RETRY_INTERVAL_MS: u64 = 1000;
/// Default time before an unfinished handshake attempt is abandoned and
/// restarted from scratch.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
/// Default hard lifetime of an established session.
pub const SESSION_LIFETIME_MS: u64 = 60 * 60 * 1000;
/// Default inactivity timeout: a session that has not received anything for
/// this long is considered dead even inside its lifetime.
pub const ACTIVITY_TIMEOUT_MS: u64 = 2 * 60 * 1000;

/// Timing parameters governing a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// How often an in-progress handshake is retransmitted while no progress
    /// is being made.
    pub handshake_retry_interval: Duration,
    /// How long a handshake attempt may run before it is thrown away and a
    /// fresh one is started.
    pub handshake_timeout: Duration,
    /// How long an established session may be used for sending before it must
    /// be replaced, counted from handshake completion.
    pub session_lifetime: Duration,
    /// How long an established session may go without receiving anything
    /// before it is considered dead.
    pub activity_timeout: Duration,
}

impl Settings {
    /// Build settings from millisecond values.
    pub const fn new_ms(
        handshake_retry_interval: u64,
        handshake_timeout: u64,
        session_lifetime: u64,
        activity_timeout: u64,
    ) -> Self {
        Self {
            handshake_retry_interval: Duration::from_millis(handshake_retry_interval),
            handshake_timeout: Duration::from_millis(handshake_timeout),
            session_lifetime: Duration::from_millis(session_lifetime),
            activity_timeout: Duration::from_millis(activity_timeout),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new_ms(
            HANDSHAKE_RETRY_INTERVAL_MS,
            HANDSHAKE_TIMEOUT_MS,
            SESSION_LIFETIME_MS,
            ACTIVITY_TIMEOUT_MS,
        )
    }
}

/// The unreliable datagram layer a channel sends on.
///
/// Implementations are expected to be fire-and-forget: loss, duplication and
/// reordering are all tolerated by the protocol, so `send` has no way to
/// report failure. Any closure over the underlying socket works.
pub trait Transport: Send + Sync + 'static {
    /// Hand one datagram to the underlying network. The buffer is only valid
    /// for the duration of the call.
    fn send(&self, datagram: &[u8]);
}

impl<F: Fn(&[u8]) + Send + Sync + 'static> Transport for F {
    fn send(&self, datagram: &[u8]) {
        self(datagram)
    }
}
