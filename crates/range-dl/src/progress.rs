//! Aggregate progress shared by every worker of one download

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Callback receiving `(downloaded_bytes, total_bytes)`; `total_bytes` is 0 when unknown
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Sums bytes read by concurrent workers and reports a non-decreasing total.
///
/// Workers add with an atomic `fetch_add`; reporting goes through a small
/// mutex so callbacks are serialized and never observe a smaller value than
/// one already delivered, even across a parallel -> sequential fallback.
pub(crate) struct ProgressTracker {
    attempt_bytes: AtomicU64,
    total_bytes: AtomicU64,
    reported: Mutex<u64>,
    callback: ProgressFn,
}

impl ProgressTracker {
    pub(crate) fn new(total_bytes: u64, callback: ProgressFn) -> Arc<Self> {
        Arc::new(Self {
            attempt_bytes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(total_bytes),
            reported: Mutex::new(0),
            callback,
        })
    }

    /// Start counting a fresh attempt; the reported floor is kept
    pub(crate) fn reset_attempt(&self) {
        self.attempt_bytes.store(0, Ordering::SeqCst);
    }

    /// Record the total once it is known; it never shrinks
    pub(crate) fn set_total(&self, total: u64) {
        self.total_bytes.fetch_max(total, Ordering::SeqCst);
    }

    pub(crate) fn total(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn add(&self, bytes: u64) {
        self.attempt_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.report();
    }

    pub(crate) fn report(&self) {
        // a poisoned lock only means another callback panicked; keep reporting
        let mut reported = match self.reported.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let current = self.attempt_bytes.load(Ordering::SeqCst);
        if current > *reported {
            *reported = current;
            (self.callback)(current, self.total());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (ProgressFn, Arc<Mutex<Vec<(u64, u64)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressFn = Arc::new(move |done, total| {
            sink.lock().unwrap().push((done, total));
        });
        (callback, seen)
    }

    #[test]
    fn reports_running_sum() {
        let (callback, seen) = recording();
        let tracker = ProgressTracker::new(100, callback);
        tracker.add(10);
        tracker.add(30);
        assert_eq!(*seen.lock().unwrap(), vec![(10, 100), (40, 100)]);
    }

    #[test]
    fn fallback_attempt_never_reports_backwards() {
        let (callback, seen) = recording();
        let tracker = ProgressTracker::new(100, callback);
        tracker.add(60);
        tracker.reset_attempt();
        tracker.add(20);
        tracker.add(50);
        tracker.add(30);
        let values: Vec<u64> = seen.lock().unwrap().iter().map(|(d, _)| *d).collect();
        assert_eq!(values, vec![60, 70, 100]);
    }

    #[test]
    fn concurrent_adds_are_monotonic() {
        let (callback, seen) = recording();
        let tracker = ProgressTracker::new(0, callback);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        tracker.add(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let values: Vec<u64> = seen.lock().unwrap().iter().map(|(d, _)| *d).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*values.last().unwrap(), 4000);
    }

    #[test]
    fn total_only_grows() {
        let (callback, _) = recording();
        let tracker = ProgressTracker::new(0, callback);
        tracker.set_total(500);
        tracker.set_total(100);
        assert_eq!(tracker.total(), 500);
    }
}
