//! Wall-clock helpers
//!
//! All persisted timestamps are Unix nanoseconds (`i64`).

use chrono::Utc;

/// Current time as Unix nanoseconds.
pub fn now_nanos() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

/// Nanosecond span covered by `secs` seconds.
pub const fn secs_to_nanos(secs: i64) -> i64 {
    secs * 1_000_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotonic_enough() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000_000_000);
    }

    #[test]
    fn test_secs_to_nanos() {
        assert_eq!(secs_to_nanos(3), 3_000_000_000);
    }
}
