use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_DISTANCE_M: f64 = 3.0;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// When a close-range detection is allowed to become an alert.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThrottlePolicy {
    /// Upper bound of the closed `[0, max]` actionable range, in meters.
    pub max_distance_m: f64,
    /// Minimum spacing between two alerts of the same feed.
    pub cooldown: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_distance_m: DEFAULT_MAX_DISTANCE_M,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Alert throttle state of one camera feed. Pipelines watching the same camera
/// hold it through a [`SharedThrottle`].
#[derive(Clone, Debug, Default)]
pub struct AlertThrottle {
    policy: ThrottlePolicy,
    last_alert: Option<Instant>,
}

impl AlertThrottle {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            last_alert: None,
        }
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    pub fn last_alert(&self) -> Option<Instant> {
        self.last_alert
    }

    /// Closed range check; NaN is never in range.
    pub fn in_range(&self, distance_m: f64) -> bool {
        (0.0..=self.policy.max_distance_m).contains(&distance_m)
    }

    /// Time condition alone: true before the first alert, then once the
    /// cool-down has fully elapsed.
    pub fn cooldown_elapsed(&self, now: Instant) -> bool {
        match self.last_alert {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.policy.cooldown,
        }
    }

    pub fn should_alert(&self, now: Instant, distance_m: f64) -> bool {
        self.in_range(distance_m) && self.cooldown_elapsed(now)
    }

    /// Must be called with the triggering instant before any further region
    /// of the same frame is considered.
    pub fn record_alert(&mut self, now: Instant) {
        self.last_alert = Some(now);
    }
}

/// Handle on the single throttle of one camera, cloned into every pipeline
/// that watches it.
#[derive(Clone, Debug, Default)]
pub struct SharedThrottle {
    inner: Arc<Mutex<AlertThrottle>>,
}

impl SharedThrottle {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AlertThrottle::new(policy))),
        }
    }

    // The state is a single timestamp, valid even if a holder panicked.
    fn lock(&self) -> MutexGuard<'_, AlertThrottle> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> ThrottlePolicy {
        *self.lock().policy()
    }

    pub fn last_alert(&self) -> Option<Instant> {
        self.lock().last_alert()
    }

    pub fn in_range(&self, distance_m: f64) -> bool {
        self.lock().in_range(distance_m)
    }

    pub fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.lock().cooldown_elapsed(now)
    }

    /// Check and record under one lock. Returns true when the caller owns
    /// the alert for `now`; every other holder is then cooling down.
    pub fn try_claim(&self, now: Instant, distance_m: f64) -> bool {
        let mut throttle = self.lock();
        if !throttle.should_alert(now, distance_m) {
            return false;
        }
        throttle.record_alert(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_suppresses_repeat_alerts() {
        let mut throttle = AlertThrottle::default();
        let t0 = Instant::now();

        assert!(throttle.should_alert(t0, 1.0));
        throttle.record_alert(t0);

        assert!(!throttle.should_alert(t0 + Duration::from_secs(5), 1.0));
        assert!(throttle.should_alert(t0 + Duration::from_secs(11), 1.0));
    }

    #[test]
    fn range_is_closed_and_non_negative() {
        let throttle = AlertThrottle::default();
        let now = Instant::now();
        assert!(!throttle.should_alert(now, 3.5));
        assert!(throttle.should_alert(now, 3.0));
        assert!(throttle.should_alert(now, 0.0));
        assert!(!throttle.should_alert(now, -0.01));
        assert!(!throttle.should_alert(now, f64::NAN));
    }

    #[test]
    fn cooldown_boundary_is_inclusive() {
        let mut throttle = AlertThrottle::new(ThrottlePolicy {
            max_distance_m: 3.0,
            cooldown: Duration::from_secs(10),
        });
        let t0 = Instant::now();
        throttle.record_alert(t0);
        assert!(!throttle.cooldown_elapsed(t0 + Duration::from_millis(9_999)));
        assert!(throttle.cooldown_elapsed(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn independent_throttles_do_not_share_state() {
        let mut front = AlertThrottle::default();
        let back = AlertThrottle::default();
        let now = Instant::now();
        front.record_alert(now);
        assert!(!front.cooldown_elapsed(now));
        assert!(back.cooldown_elapsed(now));
    }

    #[test]
    fn shared_throttle_grants_one_claim_per_window() {
        let viewer_a = SharedThrottle::new(ThrottlePolicy::default());
        let viewer_b = viewer_a.clone();
        let t0 = Instant::now();

        assert!(!viewer_a.try_claim(t0, 4.0));
        assert!(viewer_a.last_alert().is_none());

        assert!(viewer_a.try_claim(t0, 1.5));
        assert!(!viewer_b.try_claim(t0, 1.5));
        assert_eq!(viewer_b.last_alert(), Some(t0));
        assert!(viewer_b.try_claim(t0 + Duration::from_secs(10), 1.5));
    }

    #[test]
    fn concurrent_claims_yield_single_winner() {
        let throttle = SharedThrottle::default();
        let now = Instant::now();
        let winners: usize = (0..8)
            .map(|_| {
                let throttle = throttle.clone();
                std::thread::spawn(move || throttle.try_claim(now, 1.0))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(winners, 1);
    }
}
