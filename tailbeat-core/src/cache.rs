use std::sync::Arc;

use tokio::sync::RwLock;

use crate::event::TimestampedEvent;

/// Sorted, bounded, thread-safe store of timestamped events (spec §4.A).
///
/// `entries` is always non-decreasing by timestamp once a write critical
/// section releases (I-1); ties within the same millisecond keep insertion
/// order. A single readers-writer lock protects both `entries` and the
/// cached `first_ts`, so concurrent `fetch`/`first_timestamp*` readers never
/// block each other, only writers.
pub struct EventCache<E: TimestampedEvent> {
    inner: Arc<RwLock<Inner<E>>>,
}

struct Inner<E> {
    entries: Vec<E>,
    first_ts: Option<i64>,
}

impl<E: TimestampedEvent> Default for EventCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: TimestampedEvent> Clone for EventCache<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: TimestampedEvent> EventCache<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                entries: Vec::new(),
                first_ts: None,
            })),
        }
    }

    /// Sorts `batch` ascending by timestamp, then merges it into `entries`
    /// with a stable two-way merge so the whole collection stays
    /// non-decreasing unconditionally (see spec §9's "Open question" — we
    /// take the stricter merge as the intended behavior rather than a raw
    /// append that only happens to be correct when batches never interleave
    /// in time).
    pub async fn add_all(&self, mut batch: Vec<E>) {
        if batch.is_empty() {
            return;
        }
        batch.sort_by_key(|e| e.timestamp_millis());

        let mut inner = self.inner.write().await;
        let batch_first = batch[0].timestamp_millis();
        inner.first_ts = Some(match inner.first_ts {
            Some(current) => current.min(batch_first),
            None => batch_first,
        });

        if inner.entries.is_empty() {
            inner.entries = batch;
            return;
        }

        let mut merged = Vec::with_capacity(inner.entries.len() + batch.len());
        let mut left = inner.entries.drain(..).collect::<Vec<_>>().into_iter().peekable();
        let mut right = batch.into_iter().peekable();
        loop {
            let take_left = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => l.timestamp_millis() <= r.timestamp_millis(),
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            if take_left {
                merged.push(left.next().unwrap());
            } else {
                merged.push(right.next().unwrap());
            }
        }
        inner.entries = merged;
    }

    /// Returns a copy of all entries with `start_ts <= ts <= end_ts`, using
    /// the nearest-index binary search plus second-boundary sliding
    /// described in spec §4.A so that every event sharing a second with
    /// either endpoint is included.
    pub async fn fetch(&self, start_ts: i64, end_ts: i64) -> Vec<E> {
        let inner = self.inner.read().await;
        if inner.entries.is_empty() {
            return Vec::new();
        }
        let lo = slide_back(&inner.entries, nearest(&inner.entries, start_ts));
        let hi = slide_forward(&inner.entries, nearest(&inner.entries, end_ts));
        if lo > hi {
            return Vec::new();
        }
        inner.entries[lo..=hi].to_vec()
    }

    pub async fn first_timestamp(&self) -> Option<i64> {
        self.inner.read().await.first_ts
    }

    /// Smallest timestamp strictly greater than `last_ts`, compared at
    /// second-truncated granularity (spec §4.A).
    pub async fn first_timestamp_since(&self, last_ts: i64) -> Option<i64> {
        let inner = self.inner.read().await;
        if inner.entries.is_empty() {
            return None;
        }
        let idx = nearest(&inner.entries, last_ts);
        let i = slide_forward(&inner.entries, idx) + 1;
        inner.entries.get(i).map(|e| e.timestamp_millis())
    }

    /// Drops the first `n` entries. `n >= len()` behaves like `full_evict()`.
    pub async fn evict(&self, n: usize) {
        let mut inner = self.inner.write().await;
        if n >= inner.entries.len() {
            inner.entries.clear();
            inner.first_ts = None;
            return;
        }
        inner.entries.drain(..n);
        inner.first_ts = inner.entries.first().map(|e| e.timestamp_millis());
    }

    pub async fn full_evict(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.first_ts = None;
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }
}

/// Index of the entry nearest `target`; ties broken to the lower index
/// (P-6: idempotent when `target` equals an entry's timestamp exactly).
fn nearest<E: TimestampedEvent>(entries: &[E], target: i64) -> usize {
    debug_assert!(!entries.is_empty());
    let idx = entries.partition_point(|e| e.timestamp_millis() < target);
    if idx == 0 {
        return 0;
    }
    if idx == entries.len() {
        return entries.len() - 1;
    }
    let above = (entries[idx].timestamp_millis() - target).abs();
    let below = (target - entries[idx - 1].timestamp_millis()).abs();
    if below <= above {
        idx - 1
    } else {
        idx
    }
}

fn second_of<E: TimestampedEvent>(e: &E) -> i64 {
    e.timestamp_millis().div_euclid(1000)
}

fn slide_back<E: TimestampedEvent>(entries: &[E], mut i: usize) -> usize {
    while i > 0 && second_of(&entries[i - 1]) == second_of(&entries[i]) {
        i -= 1;
    }
    i
}

fn slide_forward<E: TimestampedEvent>(entries: &[E], mut i: usize) -> usize {
    while i + 1 < entries.len() && second_of(&entries[i + 1]) == second_of(&entries[i]) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Ev(i64);

    impl TimestampedEvent for Ev {
        fn timestamp_millis(&self) -> i64 {
            self.0
        }
    }

    fn evs(ts: &[i64]) -> Vec<Ev> {
        ts.iter().copied().map(Ev).collect()
    }

    #[tokio::test]
    async fn add_all_sorts_and_tracks_first_ts() {
        let cache: EventCache<Ev> = EventCache::new();
        cache.add_all(evs(&[3000, 1000, 2000])).await;
        assert_eq!(cache.first_timestamp().await, Some(1000));
        assert_eq!(cache.len().await, 3);
        let all = cache.fetch(1000, 3000).await;
        assert_eq!(all, evs(&[1000, 2000, 3000]));
    }

    #[tokio::test]
    async fn add_all_merges_out_of_order_batches() {
        let cache: EventCache<Ev> = EventCache::new();
        cache.add_all(evs(&[5000, 6000])).await;
        cache.add_all(evs(&[1000, 2000])).await;
        let all = cache.fetch(0, 10_000).await;
        assert_eq!(all, evs(&[1000, 2000, 5000, 6000]));
        // P-1: non-decreasing after every public operation.
        for w in all.windows(2) {
            assert!(w[0].0 <= w[1].0);
        }
    }

    #[tokio::test]
    async fn evict_zero_is_noop_and_evict_all_equals_full_evict() {
        let cache: EventCache<Ev> = EventCache::new();
        cache.add_all(evs(&[1000, 2000, 3000])).await;
        cache.evict(0).await;
        assert_eq!(cache.len().await, 3);
        cache.evict(100).await;
        assert!(cache.is_empty().await);
        assert_eq!(cache.first_timestamp().await, None);
    }

    #[tokio::test]
    async fn evict_reduces_size_by_exactly_n() {
        let cache: EventCache<Ev> = EventCache::new();
        cache.add_all(evs(&[1000, 2000, 3000, 4000])).await;
        cache.evict(2).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.first_timestamp().await, Some(3000));
    }

    #[tokio::test]
    async fn fetch_on_empty_cache_returns_empty() {
        let cache: EventCache<Ev> = EventCache::new();
        assert!(cache.fetch(0, 1000).await.is_empty());
        assert_eq!(cache.first_timestamp().await, None);
        assert_eq!(cache.first_timestamp_since(0).await, None);
    }

    #[tokio::test]
    async fn slide_boundaries_across_five_seconds() {
        // Scenario 4: one event at :00, then 10 per following second.
        let cache: EventCache<Ev> = EventCache::new();
        let mut ts = vec![0i64];
        for sec in 1..5 {
            for ms in 0..10 {
                ts.push(sec * 1000 + ms * 10);
            }
        }
        assert_eq!(ts.len(), 41);
        cache.add_all(evs(&ts)).await;

        assert_eq!(cache.fetch(0, 0).await.len(), 1);
        assert_eq!(cache.fetch(1000, 1000).await.len(), 10);
        assert_eq!(cache.fetch(0, 4000).await.len(), 41);

        let before = cache.len().await;
        let window = cache.fetch(0, 0).await;
        cache.evict(window.len()).await;
        assert_eq!(cache.len().await, before - window.len());
    }

    #[tokio::test]
    async fn first_timestamp_since_finds_next_second() {
        let cache: EventCache<Ev> = EventCache::new();
        cache.add_all(evs(&[1000, 1500, 2000, 2500, 3000])).await;
        assert_eq!(cache.first_timestamp_since(1500).await, Some(2000));
        assert_eq!(cache.first_timestamp_since(3000).await, None);
    }

    #[tokio::test]
    async fn nearest_is_idempotent_on_exact_match() {
        let entries = evs(&[1000, 2000, 3000, 4000]);
        for &t in &[1000, 2000, 3000, 4000] {
            let idx = nearest(&entries, t);
            assert_eq!(entries[idx].timestamp_millis(), t);
        }
    }
}
