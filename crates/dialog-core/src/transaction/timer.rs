//! RFC 3261 transaction timers
//!
//! All timers derive from the three base values T1, T2 and T4
//! (RFC 3261 section 17, table 4):
//!
//! | timer | value | used by |
//! |-------|-------|---------|
//! | A | initially T1, doubled | INVITE client retransmit (unreliable only) |
//! | B | 64*T1 | INVITE client timeout |
//! | D | 32 s unreliable, 0 reliable | INVITE client wait for response retransmits |
//! | E | initially T1, doubled up to T2 | non-INVITE client retransmit (unreliable only) |
//! | F | 64*T1 | non-INVITE client timeout |
//! | G | initially T1, doubled up to T2 | INVITE server response retransmit |
//! | H | 64*T1 | INVITE server wait for ACK |
//! | I | T4 unreliable, 0 reliable | INVITE server wait for ACK retransmits |
//! | J | 64*T1 unreliable, 0 reliable | non-INVITE server wait for request retransmits |
//! | K | T4 unreliable, 0 reliable | non-INVITE client wait for response retransmits |
//! | M | 64*T1 | INVITE client wait for 2xx retransmits (RFC 6026) |

use std::time::Duration;

/// Base timer values and the timers derived from them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    /// Round trip time estimate
    pub t1: Duration,
    /// Maximum retransmit interval for non-INVITE requests and INVITE responses
    pub t2: Duration,
    /// Maximum duration a message remains in the network
    pub t4: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(Self::DEFAULT_T1_MS),
            Duration::from_millis(Self::DEFAULT_T2_MS),
            Duration::from_millis(Self::DEFAULT_T4_MS),
        )
    }
}

impl TimerSettings {
    pub const DEFAULT_T1_MS: u64 = 500;
    pub const DEFAULT_T2_MS: u64 = 4000;
    pub const DEFAULT_T4_MS: u64 = 5000;

    pub fn new(t1: Duration, t2: Duration, t4: Duration) -> Self {
        Self { t1, t2, t4 }
    }

    /// 64*T1, the common transaction timeout
    pub fn transaction_timeout(&self) -> Duration {
        self.t1 * 64
    }

    pub fn timer_a(&self) -> Duration {
        self.t1
    }

    pub fn timer_b(&self) -> Duration {
        self.transaction_timeout()
    }

    pub fn timer_d(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            Duration::from_secs(32).max(self.transaction_timeout() / 2)
        }
    }

    pub fn timer_e(&self) -> Duration {
        self.t1
    }

    pub fn timer_f(&self) -> Duration {
        self.transaction_timeout()
    }

    pub fn timer_g(&self) -> Duration {
        self.t1
    }

    pub fn timer_h(&self) -> Duration {
        self.transaction_timeout()
    }

    pub fn timer_i(&self, reliable: bool) -> Duration {
        if reliable { Duration::ZERO } else { self.t4 }
    }

    pub fn timer_j(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.transaction_timeout()
        }
    }

    pub fn timer_k(&self, reliable: bool) -> Duration {
        if reliable { Duration::ZERO } else { self.t4 }
    }

    pub fn timer_m(&self) -> Duration {
        self.transaction_timeout()
    }

    /// Next retransmit interval: doubled, capped at T2 when `capped`
    pub fn next_interval(&self, current: Duration, capped: bool) -> Duration {
        let doubled = current * 2;
        if capped { doubled.min(self.t2) } else { doubled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timer_values() {
        let t = TimerSettings::default();
        assert_eq!(t.timer_b(), Duration::from_secs(32));
        assert_eq!(t.timer_d(false), Duration::from_secs(32));
        assert_eq!(t.timer_d(true), Duration::ZERO);
        assert_eq!(t.timer_i(false), Duration::from_secs(5));
        assert_eq!(t.timer_k(true), Duration::ZERO);
        assert_eq!(t.timer_j(false), Duration::from_secs(32));
    }

    #[test]
    fn test_retransmit_backoff() {
        let t = TimerSettings::default();
        let mut interval = t.timer_e();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(interval.as_millis());
            interval = t.next_interval(interval, true);
        }
        assert_eq!(seen, vec![500, 1000, 2000, 4000, 4000]);
        assert_eq!(t.next_interval(Duration::from_secs(4), false), Duration::from_secs(8));
    }
}
