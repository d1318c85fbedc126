/// Process-wide counters for migration orchestration
pub mod migration_counters {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tracing::debug;

    static SCHEMA_CHECKS_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static FAST_PATH_HIT_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static FAST_PATH_MISS_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static LOCK_ACQUIRE_ATTEMPTS_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static LOCK_BACKOFF_EVENTS_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static LOCK_ACQUIRED_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static LOCK_ACQUIRE_TIMEOUTS_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static MIGRATION_CANCELLED_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static MIGRATION_FAILED_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static UNITS_APPLIED_TOTAL: AtomicUsize = AtomicUsize::new(0);
    static BUSY_EVENTS_TOTAL: AtomicUsize = AtomicUsize::new(0);

    pub fn schema_check() {
        SCHEMA_CHECKS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fast_path_hit() {
        FAST_PATH_HIT_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fast_path_miss() {
        FAST_PATH_MISS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_lock_acquire_attempts(n: usize) {
        LOCK_ACQUIRE_ATTEMPTS_TOTAL.fetch_add(n, Ordering::Relaxed);
    }

    pub fn lock_backoff_event() {
        LOCK_BACKOFF_EVENTS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lock_acquired() {
        LOCK_ACQUIRED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lock_acquire_timeout() {
        LOCK_ACQUIRE_TIMEOUTS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn migration_cancelled() {
        MIGRATION_CANCELLED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn migration_failed() {
        MIGRATION_FAILED_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_units_applied(n: usize) {
        UNITS_APPLIED_TOTAL.fetch_add(n, Ordering::Relaxed);
    }

    pub fn busy_event() {
        BUSY_EVENTS_TOTAL.fetch_add(1, Ordering::Relaxed);
    }

    #[derive(Debug, Clone, Copy)]
    pub struct Snapshot {
        pub schema_checks_total: usize,
        pub fast_path_hit_total: usize,
        pub fast_path_miss_total: usize,
        pub lock_acquire_attempts_total: usize,
        pub lock_backoff_events_total: usize,
        pub lock_acquired_total: usize,
        pub lock_acquire_timeouts_total: usize,
        pub migration_cancelled_total: usize,
        pub migration_failed_total: usize,
        pub units_applied_total: usize,
        pub busy_events_total: usize,
    }

    pub fn snapshot() -> Snapshot {
        Snapshot {
            schema_checks_total: SCHEMA_CHECKS_TOTAL.load(Ordering::Relaxed),
            fast_path_hit_total: FAST_PATH_HIT_TOTAL.load(Ordering::Relaxed),
            fast_path_miss_total: FAST_PATH_MISS_TOTAL.load(Ordering::Relaxed),
            lock_acquire_attempts_total: LOCK_ACQUIRE_ATTEMPTS_TOTAL.load(Ordering::Relaxed),
            lock_backoff_events_total: LOCK_BACKOFF_EVENTS_TOTAL.load(Ordering::Relaxed),
            lock_acquired_total: LOCK_ACQUIRED_TOTAL.load(Ordering::Relaxed),
            lock_acquire_timeouts_total: LOCK_ACQUIRE_TIMEOUTS_TOTAL.load(Ordering::Relaxed),
            migration_cancelled_total: MIGRATION_CANCELLED_TOTAL.load(Ordering::Relaxed),
            migration_failed_total: MIGRATION_FAILED_TOTAL.load(Ordering::Relaxed),
            units_applied_total: UNITS_APPLIED_TOTAL.load(Ordering::Relaxed),
            busy_events_total: BUSY_EVENTS_TOTAL.load(Ordering::Relaxed),
        }
    }

    pub fn log_snapshot(label: &str) {
        let s = snapshot();
        debug!(
            label,
            schema_checks = s.schema_checks_total,
            fast_path_hit = s.fast_path_hit_total,
            fast_path_miss = s.fast_path_miss_total,
            lock_attempts = s.lock_acquire_attempts_total,
            lock_backoffs = s.lock_backoff_events_total,
            lock_acquired = s.lock_acquired_total,
            lock_timeouts = s.lock_acquire_timeouts_total,
            cancelled = s.migration_cancelled_total,
            failed = s.migration_failed_total,
            units_applied = s.units_applied_total,
            busy_events = s.busy_events_total,
            "migration_counters"
        );
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn counters_only_grow() {
            let before = snapshot();
            schema_check();
            add_lock_acquire_attempts(3);
            add_units_applied(2);
            let after = snapshot();

            assert!(after.schema_checks_total > before.schema_checks_total);
            assert!(after.lock_acquire_attempts_total >= before.lock_acquire_attempts_total + 3);
            assert!(after.units_applied_total >= before.units_applied_total + 2);
        }
    }
}
