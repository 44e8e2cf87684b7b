//! Tuning knobs shared by every upstream in a list, unless overridden.

use std::time::Duration;

/// Tuning knobs for circuit-breaking, revive scheduling and DNS refresh.
///
/// Durations are stored as [`Duration`] internally; the source values are
/// expressed in (possibly fractional) seconds, matching the wire/config
/// representation used elsewhere in the pack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Failures allowed within `error_time` before the circuit trips.
    pub max_errors: u32,
    /// Sliding window used to compute the failure rate.
    pub error_time: Duration,
    /// Base delay before a tripped upstream is retried.
    pub revive_time: Duration,
    /// Fractional jitter applied to `revive_time` (e.g. 0.4 = ±40%).
    pub revive_jitter: f64,
    /// Per-request DNS timeout.
    pub dns_timeout: Duration,
    /// DNS retransmit attempts.
    pub dns_retransmits: u32,
    /// Interval between lazy background re-resolves of an alive upstream.
    pub lazy_resolve_time: Duration,
    /// Seed for the consistent-hash selector.
    pub hash_seed: u64,
}

impl Limits {
    /// Compile-time defaults for the seven tunables plus the fixed hash
    /// seed.
    pub const DEFAULT: Limits = Limits {
        max_errors: 4,
        error_time: Duration::from_secs(10),
        revive_time: Duration::from_secs(60),
        revive_jitter: 0.4,
        dns_timeout: Duration::from_secs(1),
        dns_retransmits: 2,
        lazy_resolve_time: Duration::from_secs(3600),
        hash_seed: 0xa574de7df64e9b9d,
    };

    /// Maximum tolerated failure rate, in failures per second.
    pub fn max_rate(&self) -> f64 {
        self.max_errors as f64 / self.error_time.as_secs_f64()
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let l = Limits::DEFAULT;
        assert_eq!(l.max_errors, 4);
        assert_eq!(l.error_time, Duration::from_secs(10));
        assert_eq!(l.revive_time, Duration::from_secs(60));
        assert_eq!(l.revive_jitter, 0.4);
        assert_eq!(l.dns_timeout, Duration::from_secs(1));
        assert_eq!(l.dns_retransmits, 2);
        assert_eq!(l.lazy_resolve_time, Duration::from_secs(3600));
        assert_eq!(l.hash_seed, 0xa574de7df64e9b9d);
    }

    #[test]
    fn max_rate_is_errors_over_window() {
        let l = Limits::DEFAULT;
        assert!((l.max_rate() - 0.4).abs() < 1e-9);
    }
}
