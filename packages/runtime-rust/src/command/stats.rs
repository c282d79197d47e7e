//! Rolling, bucketed event counters backing circuit breaker decisions.
//!
//! The window is split into `num_buckets` slots of equal width. The active
//! slot is chosen from elapsed monotonic time; a slot whose bucket index has
//! fallen out of the window is zeroed the next time it is touched, so stale
//! counts never survive longer than the window.

use std::time::Duration;

use guardrail_core::EventType;
use parking_lot::Mutex;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

/// Event counts for one bucket, or summed over the whole window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketCounts {
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
    pub short_circuited: u64,
    pub rejected: u64,
    pub fallback_success: u64,
    pub fallback_failure: u64,
}

impl BucketCounts {
    fn add(&mut self, event: EventType) {
        match event {
            EventType::Success => self.success += 1,
            EventType::Failure => self.failure += 1,
            EventType::Timeout => self.timeout += 1,
            EventType::ShortCircuited => self.short_circuited += 1,
            EventType::Rejected => self.rejected += 1,
            EventType::FallbackSuccess => self.fallback_success += 1,
            EventType::FallbackFailure => self.fallback_failure += 1,
            // Not part of the health window.
            EventType::FallbackMissing | EventType::LateCompletion => {}
        }
    }

    fn merge(&mut self, other: &Self) {
        self.success += other.success;
        self.failure += other.failure;
        self.timeout += other.timeout;
        self.short_circuited += other.short_circuited;
        self.rejected += other.rejected;
        self.fallback_success += other.fallback_success;
        self.fallback_failure += other.fallback_failure;
    }

    /// Volume and error ratio used for trip decisions.
    ///
    /// Only executions that reached the protected operation count toward
    /// volume; short-circuits and rejections are tracked but excluded.
    #[must_use]
    pub fn health(&self) -> HealthCounts {
        let errors = self.failure + self.timeout;
        let total = self.success + errors;
        let error_percentage = if total == 0 { 0 } else { errors * 100 / total };
        HealthCounts {
            total,
            errors,
            error_percentage,
        }
    }
}

/// Summary of a window's health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCounts {
    pub total: u64,
    pub errors: u64,
    /// Integer percentage, 0 when the window is empty.
    pub error_percentage: u64,
}

// ---------------------------------------------------------------------------
// RollingStats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    index: u64,
    counts: BucketCounts,
}

#[derive(Debug)]
struct Ring {
    origin: Instant,
    slots: Vec<Bucket>,
}

/// Fixed-duration window of event counts, divided into equal buckets.
#[derive(Debug)]
pub struct RollingStats {
    bucket_width: Duration,
    ring: Mutex<Ring>,
}

impl RollingStats {
    /// Creates an empty window of `window` split into `num_buckets` buckets.
    ///
    /// `num_buckets` is clamped to at least 1 and the bucket width to at least
    /// one millisecond.
    #[must_use]
    pub fn new(window: Duration, num_buckets: usize) -> Self {
        let num_buckets = num_buckets.max(1);
        let divisor = u32::try_from(num_buckets).unwrap_or(u32::MAX);
        let bucket_width = (window / divisor).max(Duration::from_millis(1));
        Self {
            bucket_width,
            ring: Mutex::new(Ring {
                origin: Instant::now(),
                slots: vec![Bucket::default(); num_buckets],
            }),
        }
    }

    #[must_use]
    pub fn bucket_width(&self) -> Duration {
        self.bucket_width
    }

    /// Counts `event` in the bucket covering the current time.
    pub fn record(&self, event: EventType) {
        let mut ring = self.ring.lock();
        // Clock is read under the lock so bucket indices only move forward.
        let now = Instant::now();
        self.record_locked(&mut ring, event, now);
    }

    /// Sums every bucket still inside the window.
    #[must_use]
    pub fn snapshot(&self) -> BucketCounts {
        let mut ring = self.ring.lock();
        let now = Instant::now();
        self.snapshot_locked(&mut ring, now)
    }

    /// Zeroes every bucket.
    pub fn reset(&self) {
        let mut ring = self.ring.lock();
        for slot in &mut ring.slots {
            slot.counts = BucketCounts::default();
        }
    }

    #[cfg(test)]
    pub(crate) fn record_at(&self, event: EventType, now: Instant) {
        let mut ring = self.ring.lock();
        self.record_locked(&mut ring, event, now);
    }

    #[cfg(test)]
    pub(crate) fn snapshot_at(&self, now: Instant) -> BucketCounts {
        let mut ring = self.ring.lock();
        self.snapshot_locked(&mut ring, now)
    }

    fn record_locked(&self, ring: &mut Ring, event: EventType, now: Instant) {
        let index = self.bucket_index(ring.origin, now);
        let len = ring.slots.len() as u64;
        #[allow(clippy::cast_possible_truncation)]
        let slot = &mut ring.slots[(index % len) as usize];
        // Only a newer bucket may claim the slot; a stale timestamp counts
        // into what is there rather than wiping it.
        if index > slot.index {
            *slot = Bucket {
                index,
                counts: BucketCounts::default(),
            };
        }
        slot.counts.add(event);
    }

    fn snapshot_locked(&self, ring: &mut Ring, now: Instant) -> BucketCounts {
        let current = self.bucket_index(ring.origin, now);
        let len = ring.slots.len() as u64;
        let mut total = BucketCounts::default();
        for slot in &mut ring.slots {
            if slot.index > current {
                // Written by a caller whose clock ran ahead; keep it.
                total.merge(&slot.counts);
                continue;
            }
            if current - slot.index >= len {
                slot.counts = BucketCounts::default();
                continue;
            }
            total.merge(&slot.counts);
        }
        total
    }

    fn bucket_index(&self, origin: Instant, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(origin).as_nanos();
        u64::try_from(elapsed / self.bucket_width.as_nanos()).unwrap_or(u64::MAX)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn empty_window_never_divides_by_zero() {
        let health = BucketCounts::default().health();
        assert_eq!(health, HealthCounts::default());
    }

    #[test]
    fn error_percentage_counts_failures_and_timeouts() {
        let counts = BucketCounts {
            success: 2,
            failure: 6,
            timeout: 2,
            short_circuited: 40,
            rejected: 3,
            ..BucketCounts::default()
        };
        let health = counts.health();
        assert_eq!(health.total, 10);
        assert_eq!(health.errors, 8);
        assert_eq!(health.error_percentage, 80);
    }

    #[tokio::test(start_paused = true)]
    async fn events_in_window_are_summed() {
        let stats = RollingStats::new(ms(1000), 10);
        stats.record(EventType::Success);
        tokio::time::advance(ms(250)).await;
        stats.record(EventType::Failure);
        stats.record(EventType::Timeout);
        tokio::time::advance(ms(500)).await;
        stats.record(EventType::ShortCircuited);

        let snap = stats.snapshot();
        assert_eq!(snap.success, 1);
        assert_eq!(snap.failure, 1);
        assert_eq!(snap.timeout, 1);
        assert_eq!(snap.short_circuited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn buckets_older_than_window_are_evicted() {
        let stats = RollingStats::new(ms(1000), 10);
        stats.record(EventType::Failure);
        tokio::time::advance(ms(600)).await;
        stats.record(EventType::Success);

        tokio::time::advance(ms(500)).await;
        let snap = stats.snapshot();
        assert_eq!(snap.failure, 0, "first bucket left the window");
        assert_eq!(snap.success, 1);

        tokio::time::advance(ms(1000)).await;
        assert_eq!(stats.snapshot(), BucketCounts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn reused_slot_starts_from_zero() {
        let stats = RollingStats::new(ms(100), 2);
        stats.record(EventType::Failure);
        // Same slot, one full rotation later.
        tokio::time::advance(ms(100)).await;
        stats.record(EventType::Success);
        let snap = stats.snapshot();
        assert_eq!(snap.failure, 0);
        assert_eq!(snap.success, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_all_buckets() {
        let stats = RollingStats::new(ms(1000), 4);
        stats.record(EventType::Failure);
        stats.record(EventType::Rejected);
        stats.reset();
        assert_eq!(stats.snapshot(), BucketCounts::default());
    }

    #[test]
    fn read_behind_a_newer_bucket_keeps_its_counts() {
        let stats = RollingStats::new(ms(1000), 10);
        let origin = stats.ring.lock().origin;
        stats.record_at(EventType::Failure, origin + ms(1000));
        // A reader whose clock was sampled just before the boundary.
        let early = stats.snapshot_at(origin + ms(999));
        assert_eq!(early.failure, 1);
        assert_eq!(stats.snapshot_at(origin + ms(1000)).failure, 1);
    }

    #[test]
    fn late_timestamp_does_not_wipe_newer_bucket() {
        let stats = RollingStats::new(ms(100), 2);
        let origin = stats.ring.lock().origin;
        stats.record_at(EventType::Failure, origin + ms(200));
        // Same slot, one rotation older.
        stats.record_at(EventType::Success, origin + ms(50));
        let snap = stats.snapshot_at(origin + ms(200));
        assert_eq!(snap.failure, 1);
        assert_eq!(snap.success, 1);
    }

    #[test]
    fn concurrent_writers_and_readers_lose_nothing() {
        let stats = RollingStats::new(Duration::from_secs(600), 10);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..2_000 {
                        stats.record(EventType::Failure);
                    }
                });
            }
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..2_000 {
                        let snap = stats.snapshot();
                        assert!(snap.failure <= 8_000);
                    }
                });
            }
        });
        assert_eq!(stats.snapshot().failure, 8_000);
    }

    proptest! {
        #[test]
        fn window_holds_exactly_the_recent_buckets(
            mut offsets in proptest::collection::vec(0u64..5_000, 1..200)
        ) {
            offsets.sort_unstable();
            let stats = RollingStats::new(ms(1000), 10);
            let origin = stats.ring.lock().origin;
            for offset in &offsets {
                stats.record_at(EventType::Failure, origin + ms(*offset));
            }

            let last = *offsets.last().unwrap();
            let now_bucket = last / 100;
            let expected = offsets
                .iter()
                .filter(|offset| now_bucket - *offset / 100 < 10)
                .count() as u64;
            let snap = stats.snapshot_at(origin + ms(last));
            prop_assert_eq!(snap.failure, expected);
        }
    }
}
