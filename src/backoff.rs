use rand::Rng;
use std::time::Duration;

/// Exponential retry backoff with an optional cap and jitter.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    /// Upper bound on the delay; zero disables the cap.
    pub max: Duration,
    pub jitter: bool,
}

impl ExponentialBackoff {
    /// Delay before the given retry attempt: `base * 2^attempt`, scaled by a
    /// uniform factor in `[0.8, 1.2]` when jitter is enabled, capped at `max`.
    pub fn duration(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(63) as i32;
        let mut delay = self.base.as_secs_f64() * 2f64.powi(exponent);
        if self.jitter {
            delay *= rand::thread_rng().gen_range(0.8..=1.2);
        }
        if !self.max.is_zero() {
            delay = delay.min(self.max.as_secs_f64());
        }
        Duration::from_secs_f64(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_until_cap() {
        let backoff = ExponentialBackoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(8),
            jitter: false,
        };
        assert_eq!(backoff.duration(0), Duration::from_secs(1));
        assert_eq!(backoff.duration(1), Duration::from_secs(2));
        assert_eq!(backoff.duration(2), Duration::from_secs(4));
        assert_eq!(backoff.duration(5), Duration::from_secs(8));
        assert_eq!(backoff.duration(20), Duration::from_secs(8));
    }

    #[test]
    fn monotonic_without_jitter() {
        let backoff = ExponentialBackoff {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: false,
        };
        for attempt in 0..12 {
            assert!(backoff.duration(attempt + 1) >= backoff.duration(attempt));
        }
    }

    #[test]
    fn zero_max_disables_cap() {
        let backoff = ExponentialBackoff {
            base: Duration::from_secs(1),
            max: Duration::ZERO,
            jitter: false,
        };
        assert_eq!(backoff.duration(10), Duration::from_secs(1024));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = ExponentialBackoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter: true,
        };
        for _ in 0..100 {
            let delay = backoff.duration(2);
            assert!(delay >= Duration::from_secs_f64(4.0 * 0.8));
            assert!(delay <= Duration::from_secs_f64(4.0 * 1.2));
        }
    }

    #[test]
    fn jitter_respects_cap() {
        let backoff = ExponentialBackoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(4),
            jitter: true,
        };
        for _ in 0..100 {
            assert!(backoff.duration(5) <= Duration::from_secs(4));
        }
    }
}
