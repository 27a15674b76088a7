//! Bayesian-smoothed confidence for capabilities
//!
//! A capability's confidence is never stored independently of its
//! counters: it is recomputed from successes and failures every time
//! the counters move.

/// Pseudo-successes added to every estimate
pub const PRIOR_SUCCESSES: u64 = 1;

/// Pseudo-failures added to every estimate
pub const PRIOR_FAILURES: u64 = 1;

/// Confidence in a capability given its observed outcomes.
///
/// `(s + 1) / (s + f + 2)`, rounded to two decimals. One success gives
/// 0.67, not 1.0; one failure gives 0.33, not 0.0.
pub fn confidence(successes: u64, failures: u64) -> f64 {
    let total_s = successes.saturating_add(PRIOR_SUCCESSES) as f64;
    let total_f = failures.saturating_add(PRIOR_FAILURES) as f64;
    round2(total_s / (total_s + total_f))
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_known_values() {
        assert_eq!(confidence(0, 0), 0.5);
        assert_eq!(confidence(1, 0), 0.67);
        assert_eq!(confidence(0, 1), 0.33);
        assert_eq!(confidence(9, 1), 0.83);
        assert_eq!(confidence(1, 1), 0.5);
    }

    #[test]
    fn test_confidence_matches_formula() {
        for s in 0..30u64 {
            for f in 0..30u64 {
                let expected = ((s as f64 + 1.0) / (s as f64 + f as f64 + 2.0) * 100.0).round() / 100.0;
                assert_eq!(confidence(s, f), expected, "s={} f={}", s, f);
            }
        }
    }

    #[test]
    fn test_confidence_never_saturates() {
        assert!(confidence(1, 0) < 1.0);
        assert!(confidence(0, 1) > 0.0);
        assert_eq!(confidence(100, 0), 0.99);
        assert_eq!(confidence(0, 100), 0.01);
    }

    #[test]
    fn test_confidence_at_counter_limit() {
        assert_eq!(confidence(u64::MAX, 0), 1.0);
        assert_eq!(confidence(0, u64::MAX), 0.0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.15 + 0.05), 0.2);
        assert_eq!(round2(0.666_666), 0.67);
        assert_eq!(round2(0.4), 0.4);
    }
}
