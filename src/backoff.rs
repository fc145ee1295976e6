//! Exponential backoff with jitter, shared by resync (§4.1) and WireAdapter
//! reconnect (§4.2). Both use the same shape (`base * factor^attempt`,
//! capped, ±jitter) with different constants, so the policy is
//! parameterized rather than duplicated.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    /// Jitter fraction applied symmetrically, e.g. `0.2` for ±20%.
    pub jitter: f64,
}

impl BackoffPolicy {
    /// §4.1 resync backoff: base 1s, factor 2, cap 30s, ±20% jitter.
    pub const RESYNC: BackoffPolicy = BackoffPolicy {
        base: Duration::from_secs(1),
        factor: 2.0,
        cap: Duration::from_secs(30),
        jitter: 0.2,
    };

    /// §4.2 reconnect backoff: base 1s, cap 60s, jitter (factor left at 2.0,
    /// the conventional doubling the teacher's own reconnect loops use).
    pub const RECONNECT: BackoffPolicy = BackoffPolicy {
        base: Duration::from_secs(1),
        factor: 2.0,
        cap: Duration::from_secs(60),
        jitter: 0.2,
    };

    /// Delay before the `attempt`-th retry (0-indexed: the first retry is
    /// `attempt == 0`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt as i32);
        let raw = (self.base.as_secs_f64() * exp).min(self.cap.as_secs_f64());
        let jittered = apply_jitter(raw, self.jitter);
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

fn apply_jitter(seconds: f64, jitter: f64) -> f64 {
    if jitter <= 0.0 {
        return seconds;
    }
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-jitter..=jitter);
    seconds * factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let p = BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::RESYNC
        };
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
        assert_eq!(p.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = BackoffPolicy::RESYNC;
        for attempt in 0..6 {
            let d = p.delay_for(attempt).as_secs_f64();
            let nominal = (p.base.as_secs_f64() * p.factor.powi(attempt as i32)).min(p.cap.as_secs_f64());
            assert!(d >= nominal * (1.0 - p.jitter) - 1e-9);
            assert!(d <= nominal * (1.0 + p.jitter) + 1e-9);
        }
    }
}
