//! Time bucketing for the quota windows.
//!
//! Each function maps a UNIX millisecond timestamp to an integer bucket
//! index by integer division with the window size. Bucket indices are the
//! keys of the accountant's counter maps. Callers pass timestamps already
//! corrected by the server clock offset.

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_TEN_SECONDS: i64 = 10_000;
pub const MS_PER_MINUTE: i64 = 60_000;
pub const MS_PER_FIVE_MINUTES: i64 = 300_000;
pub const MS_PER_HOUR: i64 = 3_600_000;
pub const MS_PER_DAY: i64 = 86_400_000;

pub fn second(t_ms: i64) -> i64 {
    t_ms / MS_PER_SECOND
}

pub fn ten_seconds(t_ms: i64) -> i64 {
    t_ms / MS_PER_TEN_SECONDS
}

pub fn minute(t_ms: i64) -> i64 {
    t_ms / MS_PER_MINUTE
}

pub fn five_minutes(t_ms: i64) -> i64 {
    t_ms / MS_PER_FIVE_MINUTES
}

pub fn hour(t_ms: i64) -> i64 {
    t_ms / MS_PER_HOUR
}

pub fn day(t_ms: i64) -> i64 {
    t_ms / MS_PER_DAY
}

/// Milliseconds from `t_ms` until the next boundary of a window of
/// `window_ms`. Returns the full window size when `t_ms` sits exactly on a
/// boundary, which is the correct sleep for a counter that just filled.
pub fn ms_until_next_boundary(t_ms: i64, window_ms: i64) -> i64 {
    window_ms - (t_ms % window_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_division() {
        let t = 1_499_827_319_559; // 2017-07-12T02:41:59.559Z
        assert_eq!(second(t), 1_499_827_319);
        assert_eq!(ten_seconds(t), 149_982_731);
        assert_eq!(minute(t), 24_997_121);
        assert_eq!(five_minutes(t), 4_999_424);
        assert_eq!(hour(t), 416_618);
        assert_eq!(day(t), 17_359);
    }

    #[test]
    fn test_adjacent_buckets_differ() {
        let t = 119_999;
        assert_eq!(minute(t), 1);
        assert_eq!(minute(t + 1), 2);
    }

    #[test]
    fn test_ms_until_next_boundary() {
        assert_eq!(ms_until_next_boundary(119_000, MS_PER_MINUTE), 1_000);
        assert_eq!(ms_until_next_boundary(120_000, MS_PER_MINUTE), 60_000);
        assert_eq!(ms_until_next_boundary(5, MS_PER_TEN_SECONDS), 9_995);
    }
}
