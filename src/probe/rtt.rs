/// Returned when either timestamp is missing (zero or negative)
pub const RTT_UNUSABLE: f64 = -1.0;
/// Returned when the reply is stamped before the send
pub const RTT_CLOCK_SKEW: f64 = -2.0;

/// Round-trip time in milliseconds between two timestamps in seconds.
///
/// The two negative sentinels are distinct error signals, never valid RTTs.
pub fn calculate_rtt(send_time: f64, recv_time: f64) -> f64 {
    if send_time <= 0.0 || recv_time <= 0.0 {
        return RTT_UNUSABLE;
    }

    let elapsed = recv_time - send_time;
    if elapsed < 0.0 {
        return RTT_CLOCK_SKEW;
    }

    elapsed * 1000.0
}

/// [`calculate_rtt`] with the sentinels folded into `None`
pub fn rtt_ms(send_time: f64, recv_time: f64) -> Option<f64> {
    let rtt = calculate_rtt(send_time, recv_time);
    (rtt >= 0.0).then_some(rtt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtt_basic() {
        let rtt = calculate_rtt(100.0, 100.05);
        assert!((rtt - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_rtt_zero_elapsed() {
        assert_eq!(calculate_rtt(5.0, 5.0), 0.0);
        assert_eq!(rtt_ms(5.0, 5.0), Some(0.0));
    }

    #[test]
    fn test_rtt_sentinels() {
        assert_eq!(calculate_rtt(100.0, 99.0), RTT_CLOCK_SKEW);
        assert_eq!(calculate_rtt(0.0, 1.0), RTT_UNUSABLE);
        assert_eq!(calculate_rtt(1.0, 0.0), RTT_UNUSABLE);
        assert_eq!(calculate_rtt(-3.0, 1.0), RTT_UNUSABLE);
        assert_eq!(rtt_ms(100.0, 99.0), None);
        assert_eq!(rtt_ms(0.0, 1.0), None);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn proptest_rtt_never_negative_on_success(send in 0.001f64..1e9, delta in 0.0f64..1e3) {
            let rtt = calculate_rtt(send, send + delta);
            prop_assert!(rtt >= 0.0);
        }
    }
}
