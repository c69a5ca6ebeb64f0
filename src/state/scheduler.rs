//! Probe pacing: which (ttl, probe) goes next, and whether it may go now.
//!
//! Both state machines take `now` from the caller (seconds, any epoch) so
//! they run the same under a real clock and in simulated time.

use tracing::trace;

/// Token bucket rate limiter. Starts full.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: f64,
}

impl TokenBucket {
    /// `rate` tokens per second, at most `burst` banked. Negative inputs are
    /// treated as zero.
    pub fn new(rate: f64, burst: f64, now: f64) -> Self {
        let burst = burst.max(0.0);
        Self {
            rate: rate.max(0.0),
            burst,
            tokens: burst,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: f64) {
        let elapsed = now - self.last_refill;
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
            self.last_refill = now;
        }
    }

    /// Take `amount` tokens if that many are available after refilling.
    /// A refused request changes nothing beyond the refill.
    pub fn consume(&mut self, amount: f64, now: f64) -> bool {
        self.refill(now);
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }

    /// Seconds after the last refill until `amount` tokens are banked.
    /// None when that can never happen.
    pub fn time_until(&self, amount: f64) -> Option<f64> {
        if self.tokens >= amount {
            return Some(0.0);
        }
        if amount > self.burst || self.rate <= 0.0 {
            return None;
        }
        Some((amount - self.tokens) / self.rate)
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    pub fn last_refill(&self) -> f64 {
        self.last_refill
    }
}

/// Sequencer over (ttl, probe index) pairs: every probe of a TTL before the
/// next TTL, nothing revisited or skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeScheduler {
    first_hop: u8,
    /// Held wider than a TTL so it can step past 255
    current_ttl: u16,
    current_probe: u16,
    max_ttl: u8,
    probes_per_ttl: u16,
    deadline: Option<f64>,
}

impl ProbeScheduler {
    /// Start at TTL 1. `probes_per_ttl` of zero is raised to one.
    pub fn new(max_ttl: u8, probes_per_ttl: u16, deadline: Option<f64>) -> Self {
        Self {
            first_hop: 1,
            current_ttl: 1,
            current_probe: 0,
            max_ttl,
            probes_per_ttl: probes_per_ttl.max(1),
            deadline,
        }
    }

    /// Skip the hops below `first_hop`
    pub fn starting_at(mut self, first_hop: u8) -> Self {
        self.first_hop = first_hop.max(1);
        self.current_ttl = self.first_hop as u16;
        self.current_probe = 0;
        self
    }

    /// True once the last TTL is exhausted or the deadline has passed
    pub fn is_finished(&self, now: f64) -> bool {
        if let Some(deadline) = self.deadline
            && deadline > 0.0
            && now >= deadline
        {
            return true;
        }
        self.current_ttl > self.max_ttl as u16
    }

    /// The pair `next_probe` would yield, without consuming it
    pub fn peek(&self, now: f64) -> Option<(u8, u16)> {
        if self.is_finished(now) {
            return None;
        }
        Some((self.current_ttl as u8, self.current_probe))
    }

    pub fn next_probe(&mut self, now: f64) -> Option<(u8, u16)> {
        let next = self.peek(now)?;

        self.current_probe += 1;
        if self.current_probe >= self.probes_per_ttl {
            self.current_probe = 0;
            self.current_ttl += 1;
        }

        Some(next)
    }

    /// Position of (ttl, probe) in send order, counting from 0.
    /// Used as the registry key and the flow-identity index.
    pub fn sequence_of(&self, ttl: u8, probe_idx: u16) -> u32 {
        let hop = ttl.saturating_sub(self.first_hop) as u32;
        hop * self.probes_per_ttl as u32 + probe_idx as u32
    }

    /// Number of probes a full run sends
    pub fn total_probes(&self) -> u32 {
        let hops = (self.max_ttl as u32 + 1).saturating_sub(self.first_hop as u32);
        hops * self.probes_per_ttl as u32
    }

    pub fn first_hop(&self) -> u8 {
        self.first_hop
    }

    pub fn max_ttl(&self) -> u8 {
        self.max_ttl
    }

    pub fn probes_per_ttl(&self) -> u16 {
        self.probes_per_ttl
    }

    pub fn deadline(&self) -> Option<f64> {
        self.deadline
    }
}

/// What the caller should do right now
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dispatch {
    /// Send this probe
    Send { ttl: u8, probe_idx: u16, seq: u32 },
    /// Rate limited; try again once `retry_in` seconds have passed
    Throttled { retry_in: Option<f64> },
    /// Nothing left to send
    Finished,
}

/// Sequencer gated by an optional token bucket. A probe is only taken from
/// the sequencer once a token has been granted for it.
#[derive(Debug, Clone)]
pub struct Pacer {
    scheduler: ProbeScheduler,
    bucket: Option<TokenBucket>,
}

impl Pacer {
    pub fn new(scheduler: ProbeScheduler, bucket: Option<TokenBucket>) -> Self {
        Self { scheduler, bucket }
    }

    pub fn poll(&mut self, now: f64) -> Dispatch {
        let Some((ttl, probe_idx)) = self.scheduler.peek(now) else {
            return Dispatch::Finished;
        };

        if let Some(bucket) = self.bucket.as_mut()
            && !bucket.consume(1.0, now)
        {
            let retry_in = bucket.time_until(1.0);
            trace!(ttl, probe_idx, ?retry_in, "probe throttled");
            return Dispatch::Throttled { retry_in };
        }

        // peek just succeeded with the same `now`
        let _ = self.scheduler.next_probe(now);
        Dispatch::Send {
            ttl,
            probe_idx,
            seq: self.scheduler.sequence_of(ttl, probe_idx),
        }
    }

    pub fn scheduler(&self) -> &ProbeScheduler {
        &self.scheduler
    }

    pub fn bucket(&self) -> Option<&TokenBucket> {
        self.bucket.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_burst_then_refill() {
        let mut tb = TokenBucket::new(10.0, 10.0, 100.0);
        for _ in 0..10 {
            assert!(tb.consume(1.0, 100.0));
        }
        assert!(!tb.consume(1.0, 100.0));
        assert!(tb.consume(1.0, 101.0));
    }

    #[test]
    fn test_bucket_clamps_to_burst() {
        let mut tb = TokenBucket::new(100.0, 5.0, 0.0);
        assert!(tb.consume(5.0, 0.0));
        assert!(tb.consume(0.0, 1000.0));
        assert_eq!(tb.tokens(), 5.0);
    }

    #[test]
    fn test_bucket_refused_request_keeps_tokens() {
        let mut tb = TokenBucket::new(1.0, 3.0, 0.0);
        assert!(!tb.consume(4.0, 0.0));
        assert_eq!(tb.tokens(), 3.0);
    }

    #[test]
    fn test_bucket_clock_going_backwards() {
        let mut tb = TokenBucket::new(10.0, 2.0, 50.0);
        assert!(tb.consume(2.0, 50.0));
        assert!(!tb.consume(1.0, 40.0));
        assert_eq!(tb.last_refill(), 50.0);
        assert!(tb.consume(1.0, 50.5));
    }

    #[test]
    fn test_bucket_time_until() {
        let mut tb = TokenBucket::new(4.0, 2.0, 0.0);
        assert_eq!(tb.time_until(1.0), Some(0.0));
        assert!(tb.consume(2.0, 0.0));
        assert_eq!(tb.time_until(1.0), Some(0.25));
        assert_eq!(tb.time_until(3.0), None);
        assert_eq!(TokenBucket::new(0.0, 0.0, 0.0).time_until(1.0), None);
    }

    #[test]
    fn test_scheduler_sequence() {
        let mut sched = ProbeScheduler::new(2, 2, None);
        let mut seen = Vec::new();
        while let Some(pair) = sched.next_probe(0.0) {
            seen.push(pair);
        }
        assert_eq!(seen, vec![(1, 0), (1, 1), (2, 0), (2, 1)]);
        assert_eq!(sched.next_probe(0.0), None);
    }

    #[test]
    fn test_scheduler_first_hop() {
        let mut sched = ProbeScheduler::new(4, 1, None).starting_at(3);
        assert_eq!(sched.next_probe(0.0), Some((3, 0)));
        assert_eq!(sched.next_probe(0.0), Some((4, 0)));
        assert_eq!(sched.next_probe(0.0), None);
        assert_eq!(sched.total_probes(), 2);
    }

    #[test]
    fn test_scheduler_deadline() {
        let mut sched = ProbeScheduler::new(30, 3, Some(10.0));
        assert!(sched.next_probe(9.9).is_some());
        assert_eq!(sched.next_probe(10.0), None);
        // Zero deadline means none
        let mut sched = ProbeScheduler::new(1, 1, Some(0.0));
        assert!(sched.next_probe(1e9).is_some());
    }

    #[test]
    fn test_scheduler_reaches_ttl_255() {
        let mut sched = ProbeScheduler::new(255, 1, None).starting_at(254);
        assert_eq!(sched.next_probe(0.0), Some((254, 0)));
        assert_eq!(sched.next_probe(0.0), Some((255, 0)));
        assert_eq!(sched.next_probe(0.0), None);
    }

    #[test]
    fn test_sequence_of() {
        let sched = ProbeScheduler::new(30, 3, None).starting_at(2);
        assert_eq!(sched.sequence_of(2, 0), 0);
        assert_eq!(sched.sequence_of(2, 2), 2);
        assert_eq!(sched.sequence_of(3, 0), 3);
        assert_eq!(sched.sequence_of(5, 1), 10);
    }

    #[test]
    fn test_pacer_does_not_lose_throttled_probes() {
        let sched = ProbeScheduler::new(2, 2, None);
        let mut pacer = Pacer::new(sched, Some(TokenBucket::new(1.0, 1.0, 0.0)));

        assert!(matches!(
            pacer.poll(0.0),
            Dispatch::Send { ttl: 1, probe_idx: 0, seq: 0 }
        ));
        assert!(matches!(pacer.poll(0.5), Dispatch::Throttled { .. }));
        assert!(matches!(
            pacer.poll(1.0),
            Dispatch::Send { ttl: 1, probe_idx: 1, seq: 1 }
        ));
        assert!(matches!(pacer.poll(2.0), Dispatch::Send { ttl: 2, .. }));
        assert!(matches!(pacer.poll(3.0), Dispatch::Send { ttl: 2, probe_idx: 1, seq: 3 }));
        assert_eq!(pacer.poll(4.0), Dispatch::Finished);
    }

    #[test]
    fn test_pacer_unlimited() {
        let mut pacer = Pacer::new(ProbeScheduler::new(3, 3, None), None);
        let sent = std::iter::from_fn(|| match pacer.poll(0.0) {
            Dispatch::Send { seq, .. } => Some(seq),
            _ => None,
        })
        .count();
        assert_eq!(sent, 9);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn proptest_bucket_tokens_in_range(
            rate in 0.0f64..1000.0,
            burst in 0.0f64..100.0,
            steps in prop::collection::vec((0.0f64..2.0, 0.0f64..5.0), 0..64)
        ) {
            let mut tb = TokenBucket::new(rate, burst, 0.0);
            let mut now = 0.0;
            for (dt, amount) in steps {
                now += dt;
                tb.consume(amount, now);
                prop_assert!(tb.tokens() >= 0.0);
                prop_assert!(tb.tokens() <= burst);
            }
        }

        #[test]
        fn proptest_scheduler_visits_each_pair_once(
            first in 1u8..8,
            extra in 0u8..8,
            ppt in 1u16..5
        ) {
            let max_ttl = first + extra;
            let mut sched = ProbeScheduler::new(max_ttl, ppt, None).starting_at(first);
            let mut expected_seq = 0;
            while let Some((ttl, idx)) = sched.next_probe(0.0) {
                prop_assert_eq!(sched.sequence_of(ttl, idx), expected_seq);
                expected_seq += 1;
            }
            prop_assert_eq!(expected_seq, sched.total_probes());
        }
    }
}
