//! Server clock offset tracking.
//!
//! The exchange rejects signed requests whose timestamp drifts outside the
//! recv window, so the gateway keeps a signed millisecond offset between the
//! local wall clock and the exchange clock. The offset starts at 0 and is
//! refreshed by the accountant (once at initialization, then opportunistically
//! during housekeeping and on suspected drift).

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Signed offset (exchange − local) applied to the local wall clock.
#[derive(Debug, Default)]
pub struct ServerClock {
    offset_ms: AtomicI64,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local wall clock in UNIX milliseconds, uncorrected.
    pub fn local_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Best estimate of the exchange clock in UNIX milliseconds.
    pub fn now_ms(&self) -> i64 {
        self.local_ms() + self.offset_ms()
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Record a fresh estimate from a `serverTime` response.
    pub fn set_from_server_time(&self, server_ms: i64) -> i64 {
        let offset = server_ms - self.local_ms();
        self.offset_ms.store(offset, Ordering::Relaxed);
        offset
    }

    #[cfg(test)]
    pub fn set_offset_ms(&self, offset: i64) {
        self.offset_ms.store(offset, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_starts_at_zero() {
        assert_eq!(ServerClock::new().offset_ms(), 0);
    }

    #[test]
    fn test_set_from_server_time() {
        let clock = ServerClock::new();
        let server_ms = clock.local_ms() + 2_500;
        let offset = clock.set_from_server_time(server_ms);
        // The two local_ms() reads straddle at most a few ms of real time.
        assert!((offset - 2_500).abs() < 100, "offset was {}", offset);
        assert!(clock.now_ms() > clock.local_ms());
    }

    #[test]
    fn test_negative_offset() {
        let clock = ServerClock::new();
        clock.set_from_server_time(clock.local_ms() - 10_000);
        assert!(clock.offset_ms() < -9_000);
    }
}
