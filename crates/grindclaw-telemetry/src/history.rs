//! History store: bounded sample/event buffers plus cumulative counters.
//!
//! One mutex guards everything, so `snapshot()` never observes a half-applied
//! ingest. The lock is a `std::sync::Mutex`: no operation awaits while holding it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{TelemetryRecord, clock_label};

/// History samples kept (one per second bucket).
pub const SAMPLE_CAPACITY: usize = 50;
/// Event-log lines kept.
pub const EVENT_CAPACITY: usize = 10;

/// Uptime floor used for rate computation (hours).
const MIN_UPTIME_HOURS: f64 = 0.001;

/// Fixed-capacity FIFO buffer. Overflow evicts from the head.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append at the tail; returns the evicted head, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push_back(item);
        self.evict()
    }

    /// Insert at `index` (clamped to the length); returns the evicted head, if any.
    pub fn insert(&mut self, index: usize, item: T) -> Option<T> {
        let index = index.min(self.items.len());
        self.items.insert(index, item);
        self.evict()
    }

    fn evict(&mut self) -> Option<T> {
        if self.items.len() > self.capacity {
            self.items.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// Index of the first element for which `pred` is false (items must be partitioned).
    pub fn partition_point(&self, pred: impl FnMut(&T) -> bool) -> usize {
        self.items.partition_point(pred)
    }
}

impl<T: Clone> BoundedLog<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Counter changes carried by one sample write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleDelta {
    pub commands: u64,
    pub resource: u64,
    pub hoarded: u64,
}

impl SampleDelta {
    pub fn commands(n: u64) -> Self {
        Self { commands: n, ..Default::default() }
    }

    pub fn resource(n: u64) -> Self {
        Self { resource: n, ..Default::default() }
    }
}

/// One history bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    /// Unix seconds.
    pub bucket: i64,
    pub commands_delta: u64,
    pub resource_delta: u64,
    /// Hoarded item total when the bucket was last written.
    pub hoarded: u64,
    pub commands_total: u64,
    pub resource_total: u64,
}

impl HistorySample {
    fn add_to_totals(&mut self, delta: SampleDelta) {
        self.commands_total = self.commands_total.saturating_add(delta.commands);
        self.resource_total = self.resource_total.saturating_add(delta.resource);
        self.hoarded = self.hoarded.saturating_add(delta.hoarded);
    }
}

/// Consistent copy of store state plus derived metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub commands_sent: u64,
    pub resource_earned: u64,
    pub hoarded_items: u64,
    pub uptime_hours: f64,
    /// Resource per hour.
    pub resource_rate: f64,
    pub commands_per_hour: f64,
    /// 0–100, one decimal.
    pub efficiency: f64,
    pub samples: Vec<HistorySample>,
    pub events: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
}

impl TelemetrySnapshot {
    /// Cumulative resource series, oldest first (prediction input).
    pub fn resource_history(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.resource_total as f64).collect()
    }

    /// Whether anything has been reported yet.
    pub fn is_idle(&self) -> bool {
        self.commands_sent == 0 && self.samples.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    commands: u64,
    resource: u64,
    hoarded: u64,
}

struct Inner {
    counters: Counters,
    samples: BoundedLog<HistorySample>,
    events: BoundedLog<String>,
    started_at: DateTime<Utc>,
}

impl Inner {
    /// Totals of a sample are running sums in bucket order, so a late write
    /// into an older bucket also shifts the totals of every newer sample.
    fn apply_sample(&mut self, bucket: i64, delta: SampleDelta) {
        let before = self.counters;
        let c = &mut self.counters;
        c.commands = c.commands.saturating_add(delta.commands);
        c.resource = c.resource.saturating_add(delta.resource);
        c.hoarded = c.hoarded.saturating_add(delta.hoarded);

        let pos = self.samples.partition_point(|s| s.bucket < bucket);
        let amend = self.samples.get(pos).is_some_and(|s| s.bucket == bucket);
        let first_later = if amend { pos + 1 } else { pos };
        let base = if amend {
            None
        } else {
            Some(match pos.checked_sub(1).and_then(|i| self.samples.get(i)) {
                Some(prev) => (prev.commands_total, prev.resource_total, prev.hoarded),
                None => match self.samples.get(pos) {
                    Some(next) => (
                        next.commands_total.saturating_sub(next.commands_delta),
                        next.resource_total.saturating_sub(next.resource_delta),
                        next.hoarded,
                    ),
                    None => (before.commands, before.resource, before.hoarded),
                },
            })
        };

        for later in self.samples.iter_mut().skip(first_later) {
            later.add_to_totals(delta);
        }

        match base {
            None => {
                if let Some(existing) = self.samples.get_mut(pos) {
                    existing.commands_delta = existing.commands_delta.saturating_add(delta.commands);
                    existing.resource_delta = existing.resource_delta.saturating_add(delta.resource);
                    existing.add_to_totals(delta);
                }
            }
            Some((commands_total, resource_total, hoarded)) => {
                let mut sample = HistorySample {
                    bucket,
                    commands_delta: delta.commands,
                    resource_delta: delta.resource,
                    hoarded,
                    commands_total,
                    resource_total,
                };
                sample.add_to_totals(delta);
                self.samples.insert(pos, sample);
            }
        }
    }

    /// Delta implied by a record. Cumulative values win over increments and
    /// never move a counter backwards.
    fn delta_from(&self, record: &TelemetryRecord) -> SampleDelta {
        let inc = record.increments.unwrap_or_default();
        let field = |cumulative: Option<u64>, current: u64, increment: u64| match cumulative {
            Some(total) => total.saturating_sub(current),
            None => increment,
        };
        SampleDelta {
            commands: field(record.commands_sent, self.counters.commands, inc.commands),
            resource: field(record.resource_earned, self.counters.resource, inc.resource),
            hoarded: field(record.hoarded_items, self.counters.hoarded, inc.hoarded),
        }
    }
}

/// Thread-safe telemetry store shared by the agent and the gateway.
pub struct HistoryStore {
    inner: Mutex<Inner>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::with_start(Utc::now())
    }

    /// Store whose uptime is measured from `started_at`.
    pub fn with_start(started_at: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                counters: Counters::default(),
                samples: BoundedLog::new(SAMPLE_CAPACITY),
                events: BoundedLog::new(EVENT_CAPACITY),
                started_at,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Coalesce-or-append under the current second.
    pub fn record_sample(&self, delta: SampleDelta) {
        self.record_sample_at(Utc::now().timestamp(), delta);
    }

    /// Coalesce-or-insert under an explicit bucket (unix seconds).
    pub fn record_sample_at(&self, bucket: i64, delta: SampleDelta) {
        self.lock().apply_sample(bucket, delta);
    }

    /// Append a line, stamped with the local wall clock.
    pub fn record_event(&self, text: &str) {
        let line = format!("{} - {text}", clock_label());
        self.record_event_line(line);
    }

    /// Append a pre-formatted line.
    pub fn record_event_line(&self, line: String) {
        self.lock().events.push(line);
    }

    /// Apply one telemetry record: counters, a history sample and event lines
    /// under a single lock acquisition.
    pub fn ingest(&self, record: &TelemetryRecord) {
        let bucket = Utc::now().timestamp();
        let lines = record.event_lines(&clock_label());

        let mut inner = self.lock();
        if let Some(started) = record.agent_started_at {
            inner.started_at = started;
        }
        if record.has_counters() {
            let delta = inner.delta_from(record);
            inner.apply_sample(bucket, delta);
        }
        for line in lines {
            inner.events.push(line);
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot_at(Utc::now())
    }

    /// Snapshot with derived metrics computed against `now`.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> TelemetrySnapshot {
        let inner = self.lock();
        let c = inner.counters;
        let elapsed = (now - inner.started_at).num_milliseconds().max(0) as f64;
        let uptime_hours = (elapsed / 3_600_000.0).max(MIN_UPTIME_HOURS);
        let efficiency = (10.0 * c.resource as f64 / c.commands.max(1) as f64 * 10.0).round() / 10.0;

        TelemetrySnapshot {
            commands_sent: c.commands,
            resource_earned: c.resource,
            hoarded_items: c.hoarded,
            uptime_hours,
            resource_rate: c.resource as f64 / uptime_hours,
            commands_per_hour: c.commands as f64 / uptime_hours,
            efficiency: efficiency.min(100.0),
            samples: inner.samples.to_vec(),
            events: inner.events.to_vec(),
            started_at: inner.started_at,
            taken_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CounterIncrements;
    use std::sync::Arc;

    #[test]
    fn test_bounded_log_evicts_oldest() {
        let mut log = BoundedLog::new(EVENT_CAPACITY);
        for i in 0..=EVENT_CAPACITY {
            log.push(i);
        }
        assert_eq!(log.len(), EVENT_CAPACITY);
        let items = log.to_vec();
        assert_eq!(items.first(), Some(&1));
        assert_eq!(items, (1..=EVENT_CAPACITY).collect::<Vec<_>>());
    }

    #[test]
    fn test_sample_buffer_capacity() {
        let store = HistoryStore::new();
        for bucket in 0..=SAMPLE_CAPACITY as i64 {
            store.record_sample_at(bucket, SampleDelta::commands(1));
        }
        let snap = store.snapshot();
        assert_eq!(snap.samples.len(), SAMPLE_CAPACITY);
        assert_eq!(snap.samples[0].bucket, 1);
        assert!(snap.samples.windows(2).all(|w| w[0].bucket < w[1].bucket));
        // counters are not bounded by the buffer
        assert_eq!(snap.commands_sent, SAMPLE_CAPACITY as u64 + 1);
    }

    #[test]
    fn test_same_bucket_amends() {
        let store = HistoryStore::new();
        store.record_sample_at(100, SampleDelta::commands(1));
        store.record_sample_at(100, SampleDelta::resource(40));
        store.record_sample_at(101, SampleDelta::commands(1));
        let snap = store.snapshot();
        assert_eq!(snap.samples.len(), 2);
        assert_eq!(snap.samples[0].commands_delta, 1);
        assert_eq!(snap.samples[0].resource_delta, 40);
        assert_eq!(snap.samples[1].resource_total, 40);
    }

    #[test]
    fn test_out_of_order_bucket_is_placed_by_time() {
        let store = HistoryStore::new();
        store.record_sample_at(10, SampleDelta::commands(1));
        store.record_sample_at(30, SampleDelta::commands(1));
        store.record_sample_at(20, SampleDelta::commands(1));
        let buckets: Vec<i64> = store.snapshot().samples.iter().map(|s| s.bucket).collect();
        assert_eq!(buckets, vec![10, 20, 30]);
    }

    #[test]
    fn test_late_bucket_keeps_totals_monotonic() {
        let store = HistoryStore::new();
        store.record_sample_at(10, SampleDelta::resource(100));
        store.record_sample_at(30, SampleDelta::resource(50));
        store.record_sample_at(20, SampleDelta { commands: 2, resource: 25, hoarded: 1 });
        store.record_sample_at(5, SampleDelta::resource(10));

        let snap = store.snapshot();
        let buckets: Vec<i64> = snap.samples.iter().map(|s| s.bucket).collect();
        assert_eq!(buckets, vec![5, 10, 20, 30]);
        assert_eq!(snap.resource_history(), vec![10.0, 110.0, 135.0, 185.0]);
        let commands: Vec<u64> = snap.samples.iter().map(|s| s.commands_total).collect();
        assert_eq!(commands, vec![0, 0, 2, 2]);
        let hoarded: Vec<u64> = snap.samples.iter().map(|s| s.hoarded).collect();
        assert_eq!(hoarded, vec![0, 0, 1, 1]);
        assert_eq!(snap.samples.last().unwrap().resource_total, snap.resource_earned);
    }

    #[test]
    fn test_huge_increments_saturate() {
        let store = HistoryStore::new();
        store.record_sample_at(7, SampleDelta::commands(u64::MAX));
        store.record_sample_at(7, SampleDelta::commands(1));
        let snap = store.snapshot();
        assert_eq!(snap.samples.len(), 1);
        assert_eq!(snap.samples[0].commands_delta, u64::MAX);
        assert_eq!(snap.samples[0].commands_total, u64::MAX);
        assert_eq!(snap.commands_sent, u64::MAX);

        let max = CounterIncrements { commands: u64::MAX, resource: u64::MAX, hoarded: 0 };
        store.ingest(&TelemetryRecord::default().with_increments(max));
        store.ingest(&TelemetryRecord::default().with_increments(max));
        let snap = store.snapshot();
        assert_eq!(snap.resource_earned, u64::MAX);
        assert_eq!(snap.samples.last().unwrap().resource_total, u64::MAX);
        assert!(snap.samples.iter().all(|s| s.commands_total == u64::MAX));
    }

    #[test]
    fn test_concurrent_sample_writes() {
        for n in [1usize, 17, 50, 80] {
            let store = Arc::new(HistoryStore::new());
            std::thread::scope(|scope| {
                for i in 0..n {
                    let store = store.clone();
                    scope.spawn(move || store.record_sample_at(1_000 + i as i64, SampleDelta::commands(1)));
                }
            });
            let snap = store.snapshot();
            assert_eq!(snap.samples.len(), n.min(SAMPLE_CAPACITY));
            assert_eq!(snap.commands_sent, n as u64);
            for s in &snap.samples {
                assert_eq!(s.commands_delta, 1);
                assert!(s.commands_total >= 1 && s.commands_total <= n as u64);
            }
        }
    }

    #[test]
    fn test_derived_metrics() {
        let start = Utc::now();
        let store = HistoryStore::with_start(start);
        store.record_sample_at(1, SampleDelta { commands: 20, resource: 500, hoarded: 3 });
        let snap = store.snapshot_at(start + chrono::Duration::hours(2));
        assert!((snap.uptime_hours - 2.0).abs() < 1e-9);
        assert!((snap.resource_rate - 250.0).abs() < 1e-9);
        assert!((snap.commands_per_hour - 10.0).abs() < 1e-9);
        // 10 * 500 / 20 = 250 → capped
        assert_eq!(snap.efficiency, 100.0);
        assert_eq!(snap.hoarded_items, 3);
    }

    #[test]
    fn test_efficiency_rounds_to_one_decimal() {
        let store = HistoryStore::new();
        store.record_sample_at(1, SampleDelta { commands: 3, resource: 10, hoarded: 0 });
        // 10 * 10 / 3 = 33.33…
        assert_eq!(store.snapshot().efficiency, 33.3);
    }

    #[test]
    fn test_uptime_floor() {
        let start = Utc::now();
        let store = HistoryStore::with_start(start);
        store.record_sample_at(1, SampleDelta::resource(1));
        let snap = store.snapshot_at(start);
        assert_eq!(snap.uptime_hours, MIN_UPTIME_HOURS);
        assert!(snap.resource_rate.is_finite());
    }

    #[test]
    fn test_ingest_cumulative_never_goes_backwards() {
        let store = HistoryStore::new();
        store.ingest(&TelemetryRecord::counters(10, 200, 1));
        store.ingest(&TelemetryRecord::counters(8, 250, 1));
        let snap = store.snapshot();
        assert_eq!(snap.commands_sent, 10);
        assert_eq!(snap.resource_earned, 250);
    }

    #[test]
    fn test_ingest_increments_and_lines() {
        let store = HistoryStore::new();
        let rec = TelemetryRecord::default()
            .with_sent("rpg hunt")
            .with_increments(CounterIncrements { commands: 1, ..Default::default() });
        store.ingest(&rec);
        store.ingest(&rec);
        let snap = store.snapshot();
        assert_eq!(snap.commands_sent, 2);
        assert_eq!(snap.events.len(), 2);
        assert!(snap.events[0].ends_with("Sent: `rpg hunt`"));
    }

    #[test]
    fn test_ingest_without_counters_writes_no_sample() {
        let store = HistoryStore::new();
        store.ingest(&TelemetryRecord::default().with_message("hello"));
        let snap = store.snapshot();
        assert!(snap.samples.is_empty());
        assert_eq!(snap.events.len(), 1);
    }

    #[test]
    fn test_ingest_agent_start_drives_uptime() {
        let store = HistoryStore::new();
        let agent_start = Utc::now() - chrono::Duration::hours(5);
        store.ingest(&TelemetryRecord::default().with_started_at(agent_start));
        assert!(store.snapshot().uptime_hours >= 4.99);
    }

    #[test]
    fn test_event_log_capacity() {
        let store = HistoryStore::new();
        for i in 0..25 {
            store.record_event(&format!("line {i}"));
        }
        let events = store.snapshot().events;
        assert_eq!(events.len(), EVENT_CAPACITY);
        assert!(events[0].ends_with("line 15"));
        assert!(events[9].ends_with("line 24"));
    }
}
