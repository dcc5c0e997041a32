//! Retransmission timing.
//!
//! Confirmable messages are retransmitted with binary exponential backoff
//! (RFC 7252 §4.2). Exchanges carrying a notification additionally have a
//! hard deadline (the notification's Max-Age); [`Backoff::next_fire`] fits
//! the remaining retransmissions in front of it.

use std::time::{Duration, Instant};

use rand::Rng;

use crate::endpoint::ReliabilityConfig;

/// Backoff progress of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Retransmissions sent so far.
    retransmit_count: u8,
    /// Retransmissions allowed in total.
    retransmit_limit: u8,
    /// Wait between the latest transmission and the next one.
    current_timeout: Duration,
}

impl Backoff {
    /// Create backoff state with an explicit initial timeout.
    pub fn new(initial_timeout: Duration, retransmit_limit: u8) -> Self {
        Self {
            retransmit_count: 0,
            retransmit_limit,
            current_timeout: initial_timeout,
        }
    }

    /// Create backoff state for a first transmission.
    ///
    /// The initial timeout is `ack_timeout` scaled by a factor drawn
    /// uniformly from `[1.0, ack_random_factor]`.
    pub fn initial<R: Rng + ?Sized>(config: &ReliabilityConfig, rng: &mut R) -> Self {
        let factor = if config.ack_random_factor > 1.0 {
            rng.gen_range(1.0..=config.ack_random_factor)
        } else {
            1.0
        };
        Self::new(config.ack_timeout.mul_f64(factor), config.max_retransmit)
    }

    /// Continue this progress under a fresh retransmission budget.
    ///
    /// Count and timeout carry over. A limit lowered by an earlier deadline
    /// is reset to `max_retransmit`.
    pub fn inherit(mut self, max_retransmit: u8) -> Self {
        self.retransmit_limit = max_retransmit.max(self.retransmit_count);
        self
    }

    /// Retransmissions sent so far.
    pub fn retransmit_count(&self) -> u8 {
        self.retransmit_count
    }

    /// Retransmissions allowed in total.
    pub fn retransmit_limit(&self) -> u8 {
        self.retransmit_limit
    }

    /// Current wait between transmissions.
    pub fn current_timeout(&self) -> Duration {
        self.current_timeout
    }

    /// Check if the retransmission budget is used up.
    pub fn is_exhausted(&self) -> bool {
        self.retransmit_count >= self.retransmit_limit
    }

    /// Record a retransmission and double the timeout.
    pub fn on_retransmit(&mut self) {
        self.retransmit_count = self.retransmit_count.saturating_add(1);
        self.current_timeout = self.current_timeout.saturating_mul(2);
    }

    /// Schedule the timer following a transmission at `now`.
    ///
    /// Without a hard deadline this is `now + current_timeout`.
    ///
    /// With one, retransmissions must fire before `hard_deadline - guard`.
    /// When the nominal next retransmission would land later, the timeout is
    /// shrunk so the remaining retransmissions, still doubling, end exactly
    /// at that point. Retransmissions are only dropped when the shrunk
    /// timeout would fall below `min_timeout`, and the last one is kept as
    /// long as there is time left. Once the budget is used up the timer
    /// fires no later than the deadline itself.
    pub fn next_fire(
        &mut self,
        now: Instant,
        hard_deadline: Option<Instant>,
        guard: Duration,
        min_timeout: Duration,
    ) -> Instant {
        let nominal = now + self.current_timeout;
        let Some(deadline) = hard_deadline else {
            return nominal;
        };
        if self.is_exhausted() {
            return nominal.min(deadline);
        }

        let latest = deadline.checked_sub(guard).unwrap_or(deadline);
        if latest <= now {
            self.retransmit_limit = self.retransmit_count;
            return nominal.min(deadline).max(now);
        }
        if nominal <= latest {
            return nominal;
        }

        let span = latest - now;
        let mut remaining = self.retransmit_limit - self.retransmit_count;
        let mut timeout = shrink(span, remaining);
        while remaining > 1 && timeout < min_timeout {
            remaining -= 1;
            timeout = shrink(span, remaining);
        }
        self.retransmit_limit = self.retransmit_count + remaining;
        self.current_timeout = timeout;
        now + timeout
    }
}

/// First timeout of `rounds` doubling timeouts that together span `span`.
fn shrink(span: Duration, rounds: u8) -> Duration {
    let parts = (1u32 << u32::from(rounds.min(31))) - 1;
    span / parts.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const GUARD: Duration = Duration::from_millis(1);
    const MIN: Duration = Duration::from_millis(100);

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_initial_timeout_within_factor() {
        let config = ReliabilityConfig::default();
        let mut rng = StdRng::seed_from_u64(1);

        for _ in 0..100 {
            let backoff = Backoff::initial(&config, &mut rng);
            assert!(backoff.current_timeout() >= config.ack_timeout);
            assert!(backoff.current_timeout() <= config.ack_timeout.mul_f64(1.5));
            assert_eq!(backoff.retransmit_count(), 0);
            assert_eq!(backoff.retransmit_limit(), 4);
        }
    }

    #[test]
    fn test_initial_timeout_without_randomness() {
        let config = ReliabilityConfig {
            ack_random_factor: 1.0,
            ..Default::default()
        };
        let backoff = Backoff::initial(&config, &mut StdRng::seed_from_u64(1));
        assert_eq!(backoff.current_timeout(), config.ack_timeout);
    }

    #[test]
    fn test_doubling() {
        let mut backoff = Backoff::new(secs(2), 4);
        let mut timeouts = Vec::new();
        while !backoff.is_exhausted() {
            backoff.on_retransmit();
            timeouts.push(backoff.current_timeout());
        }
        assert_eq!(timeouts, vec![secs(4), secs(8), secs(16), secs(32)]);
        assert_eq!(backoff.retransmit_count(), 4);
    }

    #[test]
    fn test_next_fire_without_deadline() {
        let now = Instant::now();
        let mut backoff = Backoff::new(secs(3), 4);
        assert_eq!(backoff.next_fire(now, None, GUARD, MIN), now + secs(3));
    }

    #[test]
    fn test_next_fire_before_deadline_is_nominal() {
        let now = Instant::now();
        let mut backoff = Backoff::new(secs(3), 4);
        let fire = backoff.next_fire(now, Some(now + secs(90)), GUARD, MIN);
        assert_eq!(fire, now + secs(3));
        assert_eq!(backoff.retransmit_limit(), 4);
    }

    #[test]
    fn test_shrinks_to_fit_remaining_retransmissions() {
        let now = Instant::now();
        let deadline = now + secs(5) + GUARD;
        // 3 left: nominal 8 + 16 + 32 does not fit into 5s.
        let mut backoff = Backoff::new(secs(8), 4);
        backoff.on_retransmit();
        backoff.current_timeout = secs(8);

        let first = backoff.next_fire(now, Some(deadline), GUARD, MIN);
        assert_eq!(backoff.retransmit_limit(), 4);
        // 5s / (1 + 2 + 4)
        assert_eq!(first - now, secs(5) / 7);

        backoff.on_retransmit();
        let second = backoff.next_fire(first, Some(deadline), GUARD, MIN);
        backoff.on_retransmit();
        let third = backoff.next_fire(second, Some(deadline), GUARD, MIN);

        assert!(third <= now + secs(5));
        assert!(now + secs(5) - third < Duration::from_micros(1));
        backoff.on_retransmit();
        assert!(backoff.is_exhausted());
        assert_eq!(
            backoff.next_fire(third, Some(deadline), GUARD, MIN),
            deadline
        );
    }

    #[test]
    fn test_drops_retransmissions_below_floor() {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(301);
        let mut backoff = Backoff::new(secs(2), 4);

        // 300ms over 4 rounds would be 20ms; 2 rounds give 100ms.
        let fire = backoff.next_fire(now, Some(deadline), GUARD, MIN);
        assert_eq!(backoff.retransmit_limit(), 2);
        assert_eq!(fire - now, Duration::from_millis(100));
    }

    #[test]
    fn test_keeps_last_retransmission() {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(11);
        let mut backoff = Backoff::new(secs(2), 4);

        let fire = backoff.next_fire(now, Some(deadline), GUARD, MIN);
        assert_eq!(backoff.retransmit_limit(), 1);
        assert_eq!(fire, now + Duration::from_millis(10));
    }

    #[test]
    fn test_inherit_restores_budget() {
        let now = Instant::now();
        let mut backoff = Backoff::new(secs(2), 4);
        backoff.on_retransmit();
        // 300ms fits two more rounds of 100ms and 200ms.
        backoff.next_fire(now, Some(now + Duration::from_millis(301)), GUARD, MIN);
        assert_eq!(backoff.retransmit_limit(), 3);

        let inherited = backoff.inherit(4);
        assert_eq!(inherited.retransmit_limit(), 4);
        assert_eq!(inherited.retransmit_count(), 1);
        assert_eq!(inherited.current_timeout(), backoff.current_timeout());

        // Never below what was already sent.
        let mut spent = Backoff::new(secs(2), 4);
        for _ in 0..4 {
            spent.on_retransmit();
        }
        assert_eq!(spent.inherit(2).retransmit_limit(), 4);
    }

    #[test]
    fn test_deadline_passed() {
        let now = Instant::now();
        let mut backoff = Backoff::new(secs(2), 4);
        backoff.on_retransmit();

        let fire = backoff.next_fire(now, Some(now), GUARD, MIN);
        assert_eq!(fire, now);
        assert!(backoff.is_exhausted());
    }
}
