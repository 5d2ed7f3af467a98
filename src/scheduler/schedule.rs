//! Time-keyed schedules
//!
//! A [`Schedule`] maps a timestamp to exactly one scheduled value. Timestamps
//! are rounded to 7 decimal places on insertion so that keys produced by
//! repeated float arithmetic compare equal; internally they are stored as
//! integer ticks of 100ns, which makes them totally ordered.
//!
//! [`UniqueSchedule`] additionally refuses values that are `==` to a value
//! already present, whatever its time.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::error::{ScheduleError, SchedulerResult};

/// Ticks per second of a schedule key (7 decimal places)
const TICKS_PER_SECOND: f64 = 1e7;

/// Round a timestamp to the schedule's precision
pub fn round_time(time: f64) -> f64 {
    (time * TICKS_PER_SECOND).round() / TICKS_PER_SECOND
}

/// Rounded timestamp used as a schedule key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeKey(i64);

impl TimeKey {
    /// Build a key from a finite timestamp
    pub fn new(time: f64) -> SchedulerResult<Self> {
        if !time.is_finite() {
            return Err(ScheduleError::invalid_time(time));
        }
        Ok(Self((time * TICKS_PER_SECOND).round() as i64))
    }

    /// Key as seconds
    pub fn as_secs(&self) -> f64 {
        self.0 as f64 / TICKS_PER_SECOND
    }
}

/// Range selector for schedule queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeRange {
    /// Every entry at or before the given time
    AtOrBefore(f64),
    /// Every entry at or after the given time
    AtOrAfter(f64),
    /// Every entry
    All,
}

impl TimeRange {
    fn bounds(&self) -> SchedulerResult<(Bound<TimeKey>, Bound<TimeKey>)> {
        Ok(match *self {
            Self::AtOrBefore(t) => (Bound::Unbounded, Bound::Included(TimeKey::new(t)?)),
            Self::AtOrAfter(t) => (Bound::Included(TimeKey::new(t)?), Bound::Unbounded),
            Self::All => (Bound::Unbounded, Bound::Unbounded),
        })
    }
}

/// Ordered mapping from rounded timestamp to value
#[derive(Debug, Clone)]
pub struct Schedule<V> {
    entries: BTreeMap<TimeKey, V>,
}

impl<V> Default for Schedule<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> Schedule<V> {
    /// Create an empty schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` at `time`, rounded to 7 decimals
    ///
    /// Fails with `SlotOccupied` if another value holds the rounded slot.
    pub fn set(&mut self, time: f64, value: V) -> SchedulerResult<f64> {
        let key = TimeKey::new(time)?;
        if self.entries.contains_key(&key) {
            return Err(ScheduleError::slot_occupied(key.as_secs()));
        }
        self.entries.insert(key, value);
        Ok(key.as_secs())
    }

    /// Entries inside `range`
    pub fn get(&self, range: TimeRange) -> SchedulerResult<Vec<(f64, &V)>> {
        Ok(self
            .entries
            .range(range.bounds()?)
            .map(|(k, v)| (k.as_secs(), v))
            .collect())
    }

    /// Delete every entry inside `range`, returning how many were removed
    pub fn delete(&mut self, range: TimeRange) -> SchedulerResult<usize> {
        let keys: Vec<TimeKey> = self.entries.range(range.bounds()?).map(|(k, _)| *k).collect();
        for key in &keys {
            self.entries.remove(key);
        }
        Ok(keys.len())
    }

    /// Remove and return every entry inside `range`
    pub fn drain(&mut self, range: TimeRange) -> SchedulerResult<Vec<(f64, V)>> {
        let keys: Vec<TimeKey> = self.entries.range(range.bounds()?).map(|(k, _)| *k).collect();
        Ok(keys
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|v| (key.as_secs(), v)))
            .collect())
    }

    /// Remove and return a single entry inside `range`
    pub fn pop_first(&mut self, range: TimeRange) -> SchedulerResult<Option<(f64, V)>> {
        let key = self.entries.range(range.bounds()?).map(|(k, _)| *k).next();
        Ok(key.and_then(|key| self.entries.remove(&key).map(|v| (key.as_secs(), v))))
    }

    /// Keep only the entries for which `keep` returns true; returns the number removed
    pub fn retain(&mut self, mut keep: impl FnMut(&V) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, v| keep(v));
        before - self.entries.len()
    }

    /// Whether the rounded slot for `time` is taken
    pub fn contains_time(&self, time: f64) -> bool {
        TimeKey::new(time)
            .map(|key| self.entries.contains_key(&key))
            .unwrap_or(false)
    }

    /// Scheduled times in ascending order
    pub fn times(&self) -> Vec<f64> {
        self.entries.keys().map(TimeKey::as_secs).collect()
    }

    /// Iterate over values
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the schedule is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Schedule that rejects values equal to one already present
#[derive(Debug, Clone)]
pub struct UniqueSchedule<V> {
    inner: Schedule<V>,
}

impl<V> Default for UniqueSchedule<V> {
    fn default() -> Self {
        Self {
            inner: Schedule::new(),
        }
    }
}

impl<V: PartialEq> UniqueSchedule<V> {
    /// Create an empty unique schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` at `time`
    ///
    /// Fails with `Duplicate` when an equal value is already scheduled, and
    /// leaves the schedule unchanged.
    pub fn set(&mut self, time: f64, value: V) -> SchedulerResult<f64> {
        TimeKey::new(time)?;
        if let Some(existing) = self.find(&value) {
            return Err(ScheduleError::duplicate(existing));
        }
        self.inner.set(time, value)
    }

    /// Time at which a value equal to `value` is scheduled
    pub fn find(&self, value: &V) -> Option<f64> {
        self.inner
            .entries
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(k, _)| k.as_secs())
    }

    /// Whether an equal value is scheduled
    pub fn contains(&self, value: &V) -> bool {
        self.find(value).is_some()
    }

    /// Entries inside `range`
    pub fn get(&self, range: TimeRange) -> SchedulerResult<Vec<(f64, &V)>> {
        self.inner.get(range)
    }

    /// Delete every entry inside `range`
    pub fn delete(&mut self, range: TimeRange) -> SchedulerResult<usize> {
        self.inner.delete(range)
    }

    /// Remove and return every entry inside `range`
    pub fn drain(&mut self, range: TimeRange) -> SchedulerResult<Vec<(f64, V)>> {
        self.inner.drain(range)
    }

    /// Remove and return a single entry inside `range`
    pub fn pop_first(&mut self, range: TimeRange) -> SchedulerResult<Option<(f64, V)>> {
        self.inner.pop_first(range)
    }

    /// Keep only the entries for which `keep` returns true
    pub fn retain(&mut self, keep: impl FnMut(&V) -> bool) -> usize {
        self.inner.retain(keep)
    }

    /// Whether the rounded slot for `time` is taken
    pub fn contains_time(&self, time: f64) -> bool {
        self.inner.contains_time(time)
    }

    /// Scheduled times in ascending order
    pub fn times(&self) -> Vec<f64> {
        self.inner.times()
    }

    /// Iterate over values
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the schedule is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
