//! Simulated response profiles.
//!
//! A profile decides how long a member sits on a message before acting and
//! whether the message is lost outright. Proposer fan-out tasks and acceptor
//! handlers both consult the member's profile, so one slow or flaky profile
//! degrades everything that member does.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::PeerId;

/// Buffer added to a profile's maximum delay when waiting for a reply.
const TIMEOUT_BUFFER: Duration = Duration::from_millis(1000);

/// Delay and drop hooks consulted before every simulated network action.
pub trait Profile: Send + Sync + 'static {
    /// Upper bound on [`Profile::delay`].
    fn max_delay(&self) -> Duration;

    /// One sampled delay, uniform on `[0, max_delay)`.
    fn delay(&self) -> Duration;

    /// Whether to lose the current message.
    fn should_drop(&self) -> bool;

    /// How long a proposer waits for any single reply.
    fn individual_timeout(&self) -> Duration {
        self.max_delay() + TIMEOUT_BUFFER
    }
}

/// A `(max_delay, reliability)` pair with an injected RNG.
///
/// Seed the RNG ([`ResponseProfile::with_seed`]) for deterministic tests.
pub struct ResponseProfile {
    max_delay: Duration,
    reliability: f64,
    rng: Mutex<StdRng>,
}

impl ResponseProfile {
    #[must_use]
    pub fn new(max_delay: Duration, reliability: f64) -> Self {
        Self {
            max_delay,
            reliability,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    #[must_use]
    pub fn with_seed(max_delay: Duration, reliability: f64, seed: u64) -> Self {
        Self {
            max_delay,
            reliability,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Fast and nearly lossless.
    #[must_use]
    pub fn immediate() -> Self {
        Self::new(Duration::from_millis(10), 0.99)
    }

    /// Slow enough to blow past timeouts, and frequently silent.
    #[must_use]
    pub fn intermittent() -> Self {
        Self::new(Duration::from_millis(5000), 0.70)
    }

    /// Moderate delays, one message in five lost.
    #[must_use]
    pub fn unreliable() -> Self {
        Self::new(Duration::from_millis(1000), 0.80)
    }

    /// Regular response times.
    #[must_use]
    pub fn normal() -> Self {
        Self::new(Duration::from_millis(500), 0.95)
    }

    /// Reference assignment: 1→immediate, 2→intermittent, 3→unreliable,
    /// everyone else normal.
    #[must_use]
    pub fn for_member(id: PeerId) -> Self {
        match id.get() {
            1 => Self::immediate(),
            2 => Self::intermittent(),
            3 => Self::unreliable(),
            _ => Self::normal(),
        }
    }
}

impl Profile for ResponseProfile {
    fn max_delay(&self) -> Duration {
        self.max_delay
    }

    fn delay(&self) -> Duration {
        if self.max_delay.is_zero() {
            return Duration::ZERO;
        }
        let fraction = self.rng.lock().unwrap().random::<f64>();
        self.max_delay.mul_f64(fraction)
    }

    fn should_drop(&self) -> bool {
        self.rng.lock().unwrap().random::<f64>() > self.reliability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_below_max() {
        let profile = ResponseProfile::with_seed(Duration::from_millis(100), 1.0, 7);
        for _ in 0..1000 {
            assert!(profile.delay() < Duration::from_millis(100));
        }
    }

    #[test]
    fn zero_delay_profile_never_sleeps() {
        let profile = ResponseProfile::with_seed(Duration::ZERO, 1.0, 7);
        assert_eq!(profile.delay(), Duration::ZERO);
    }

    #[test]
    fn perfect_reliability_never_drops() {
        let profile = ResponseProfile::with_seed(Duration::ZERO, 1.0, 7);
        assert!((0..1000).all(|_| !profile.should_drop()));
    }

    #[test]
    fn zero_reliability_always_drops() {
        let profile = ResponseProfile::with_seed(Duration::ZERO, 0.0, 7);
        assert!((0..1000).all(|_| profile.should_drop()));
    }

    #[test]
    fn timeout_adds_buffer_to_max_delay() {
        let profile = ResponseProfile::immediate();
        assert_eq!(profile.individual_timeout(), Duration::from_millis(1010));
    }

    #[test]
    fn member_assignment() {
        let id = |n| PeerId::new(n).unwrap();
        assert_eq!(ResponseProfile::for_member(id(1)).max_delay(), Duration::from_millis(10));
        assert_eq!(ResponseProfile::for_member(id(2)).max_delay(), Duration::from_millis(5000));
        assert_eq!(ResponseProfile::for_member(id(3)).max_delay(), Duration::from_millis(1000));
        assert_eq!(ResponseProfile::for_member(id(4)).max_delay(), Duration::from_millis(500));
        assert_eq!(ResponseProfile::for_member(id(9)).max_delay(), Duration::from_millis(500));
    }
}
