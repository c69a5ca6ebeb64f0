use crate::error::WireError;

/// Buckets per hop. Bucket `i` counts RTTs below `2^i` ms.
pub const NUM_BUCKETS: usize = 64;
pub const HISTOGRAM_LEN: usize = NUM_BUCKETS * 8;

/// Log2 bucket of an RTT, matching the kernel side: whole milliseconds,
/// `64 - leading_zeros`, capped at the last bucket.
pub fn bucket_for_rtt_ns(rtt_ns: u64) -> usize {
    let ms = rtt_ns / 1_000_000;
    if ms == 0 {
        return 0;
    }
    ((64 - ms.leading_zeros()) as usize).min(NUM_BUCKETS - 1)
}

/// Upper bound in ms printed for bucket `i`
pub fn bucket_upper_ms(bucket: usize) -> u64 {
    1u64 << bucket.min(NUM_BUCKETS - 1)
}

/// Per-TTL RTT histogram, as read from the kernel's per-hop map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopHistogram {
    pub buckets: [u64; NUM_BUCKETS],
}

impl Default for HopHistogram {
    fn default() -> Self {
        Self {
            buckets: [0; NUM_BUCKETS],
        }
    }
}

impl HopHistogram {
    /// Decode the map value: 64 host-order u64 counters
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HISTOGRAM_LEN {
            return Err(WireError::truncated("histogram", HISTOGRAM_LEN, buf.len()));
        }

        let mut hist = Self::default();
        for (slot, raw) in hist.buckets.iter_mut().zip(buf.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(raw);
            *slot = u64::from_ne_bytes(word);
        }
        Ok(hist)
    }

    /// Count one RTT the same way the kernel does
    pub fn record(&mut self, rtt_ns: u64) {
        let bucket = bucket_for_rtt_ns(rtt_ns);
        self.buckets[bucket] = self.buckets[bucket].saturating_add(1);
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().fold(0u64, |acc, n| acc.saturating_add(*n))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|&n| n == 0)
    }

    /// Non-empty buckets as `upper_ms:count`, space separated
    pub fn summary(&self) -> String {
        self.buckets
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count > 0)
            .map(|(i, count)| format!("{}:{}", bucket_upper_ms(i), count))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One line per hop with data: `Hop N: upper:count ...`
pub fn render_histograms<'a, I>(hops: I) -> Vec<String>
where
    I: IntoIterator<Item = (u8, &'a HopHistogram)>,
{
    hops.into_iter()
        .filter(|(_, hist)| !hist.is_empty())
        .map(|(ttl, hist)| format!("Hop {}: {}", ttl, hist.summary()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucketing() {
        assert_eq!(bucket_for_rtt_ns(0), 0);
        assert_eq!(bucket_for_rtt_ns(999_999), 0);
        assert_eq!(bucket_for_rtt_ns(1_000_000), 1);
        assert_eq!(bucket_for_rtt_ns(3_000_000), 2);
        assert_eq!(bucket_for_rtt_ns(4_000_000), 3);
        assert_eq!(bucket_for_rtt_ns(1_000_000_000), 10);
        assert_eq!(bucket_for_rtt_ns(u64::MAX), 45);
    }

    #[test]
    fn test_bucket_cap() {
        assert!(bucket_for_rtt_ns(u64::MAX) < NUM_BUCKETS);
        assert_eq!(bucket_upper_ms(200), 1u64 << 63);
    }

    #[test]
    fn test_record_and_summary() {
        let mut hist = HopHistogram::default();
        assert!(hist.is_empty());
        hist.record(500_000);
        hist.record(12_000_000);
        hist.record(13_000_000);

        assert_eq!(hist.total(), 3);
        assert_eq!(hist.summary(), "1:1 16:2");
    }

    #[test]
    fn test_from_bytes() {
        let mut raw = vec![0u8; HISTOGRAM_LEN];
        raw[8 * 5..8 * 6].copy_from_slice(&7u64.to_ne_bytes());
        let hist = HopHistogram::from_bytes(&raw).unwrap();
        assert_eq!(hist.buckets[5], 7);
        assert_eq!(hist.summary(), "32:7");

        assert!(HopHistogram::from_bytes(&raw[..100]).is_err());
    }

    #[test]
    fn test_render_skips_empty_hops() {
        let mut busy = HopHistogram::default();
        busy.record(2_500_000);
        let idle = HopHistogram::default();
        let lines = render_histograms([(1, &idle), (2, &busy)]);
        assert_eq!(lines, vec!["Hop 2: 4:1".to_string()]);
    }
}
