use std::time::{Duration, SystemTime};

/// Reports whether a cached entry written at `stored_at` has outlived
/// `max_age` as of `now`. An absent `max_age` means the entry never expires
/// by age. The comparison is strict: an entry is fresh until its age exceeds
/// the budget, so `age == max_age` is still fresh.
pub fn is_expired(stored_at: SystemTime, max_age: Option<Duration>, now: SystemTime) -> bool {
    let Some(max_age) = max_age else {
        return false;
    };
    match now.duration_since(stored_at) {
        Ok(age) => age > max_age,
        // Clock went backwards; treat the entry as fresh rather than
        // re-fetching on every request until the clock catches up.
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_exclusive() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let max_age = Some(Duration::from_millis(1000));

        assert!(!is_expired(t0, max_age, t0 + Duration::from_millis(999)));
        assert!(!is_expired(t0, max_age, t0 + Duration::from_millis(1000)));
        assert!(is_expired(t0, max_age, t0 + Duration::from_millis(1001)));
    }

    #[test]
    fn absent_max_age_never_expires() {
        let t0 = SystemTime::UNIX_EPOCH;
        assert!(!is_expired(t0, None, t0 + Duration::from_secs(u32::MAX as u64)));
    }

    #[test]
    fn clock_skew_reads_as_fresh() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let earlier = t0 - Duration::from_secs(10);
        assert!(!is_expired(t0, Some(Duration::from_millis(1)), earlier));
    }
}
