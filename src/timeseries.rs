//! # Windowed Series Store
//!
//! Bounded per-channel sample windows for the live view.
//!
//! Each channel owns one [`WindowedSeries`], a ring buffer that keeps only the
//! most recent `capacity` samples. Appends evict a contiguous oldest prefix,
//! so the retained window is always the newest samples in arrival order.
//!
//! Which channels get a series is decided by a [`ChannelResolver`], and what
//! happens when a channel is registered twice by a [`CollisionPolicy`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Channels created on demand by the default resolver
pub const KNOWN_CHANNELS: [&str; 3] = ["IR", "RED", "GREEN"];

/// One point of a channel: seconds since the reference instant, and a value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
}

impl Sample {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Lookup form of a channel name: trimmed and upper-cased
pub fn normalize_channel_name(name: &str) -> String {
    name.trim().to_uppercase()
}

pub trait SampleSliceExt {
    /// Min and max of the finite `x` values
    fn finite_bounds_x(&self) -> Option<(f64, f64)>;
    /// Min and max of the finite `y` values
    fn finite_bounds_y(&self) -> Option<(f64, f64)>;
}

fn finite_bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((min, max)) => Some((f64::min(min, v), f64::max(max, v))),
        })
}

impl SampleSliceExt for [Sample] {
    fn finite_bounds_x(&self) -> Option<(f64, f64)> {
        finite_bounds(self.iter().map(|s| s.x))
    }

    fn finite_bounds_y(&self) -> Option<(f64, f64)> {
        finite_bounds(self.iter().map(|s| s.y))
    }
}

/// Capacity-bounded FIFO window of samples
#[derive(Debug, Clone)]
pub struct WindowedSeries {
    data: VecDeque<Sample>,
    capacity: usize,
}

impl WindowedSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `points` in order, then drop the oldest samples beyond capacity.
    ///
    /// Returns the number of samples evicted. Samples that would be evicted
    /// by this same call are never copied in.
    pub fn append(&mut self, points: &[Sample]) -> usize {
        if points.is_empty() {
            return 0;
        }

        let skipped = points.len().saturating_sub(self.capacity);
        let incoming = &points[skipped..];

        let overflow = (self.data.len() + incoming.len()).saturating_sub(self.capacity);
        self.data.drain(..overflow);
        self.data.extend(incoming.iter().copied());

        overflow + skipped
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&Sample> {
        self.data.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.data.iter()
    }

    /// The whole window as one slice, oldest first
    pub fn make_contiguous(&mut self) -> &[Sample] {
        self.data.make_contiguous()
    }

    pub fn to_vec(&self) -> Vec<Sample> {
        self.data.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Decides whether a channel without a series gets one on first use
#[derive(Clone, Default)]
pub enum ChannelResolver {
    /// Create IR, RED and GREEN on demand, ignore everything else
    #[default]
    KnownChannels,
    /// Create any channel on demand
    AcceptAll,
    /// Create only the listed channels
    Fixed(Vec<String>),
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl ChannelResolver {
    /// `name` must already be normalized
    pub fn accepts(&self, name: &str) -> bool {
        match self {
            ChannelResolver::KnownChannels => KNOWN_CHANNELS.contains(&name),
            ChannelResolver::AcceptAll => !name.is_empty(),
            ChannelResolver::Fixed(names) => names
                .iter()
                .any(|n| normalize_channel_name(n) == name),
            ChannelResolver::Custom(f) => f(name),
        }
    }
}

impl fmt::Debug for ChannelResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelResolver::KnownChannels => write!(f, "KnownChannels"),
            ChannelResolver::AcceptAll => write!(f, "AcceptAll"),
            ChannelResolver::Fixed(names) => f.debug_tuple("Fixed").field(names).finish(),
            ChannelResolver::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// What `register` does when the channel already has a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Keep the existing series and its samples
    #[default]
    Keep,
    /// Discard the existing series and start an empty one
    Replace,
}

/// All live series, keyed by normalized channel name
#[derive(Debug)]
pub struct SeriesStore {
    series: BTreeMap<String, WindowedSeries>,
    capacity: usize,
    resolver: ChannelResolver,
    collision: CollisionPolicy,
}

impl SeriesStore {
    pub fn new(capacity: usize, resolver: ChannelResolver, collision: CollisionPolicy) -> Self {
        Self {
            series: BTreeMap::new(),
            capacity,
            resolver,
            collision,
        }
    }

    /// Store with the default resolver and the three known channels pre-created
    pub fn with_known_channels(capacity: usize) -> Self {
        let mut store = Self::new(capacity, ChannelResolver::KnownChannels, CollisionPolicy::Keep);
        for name in KNOWN_CHANNELS {
            store.register(name);
        }
        store
    }

    /// Explicitly create a series for `name`, bypassing the resolver.
    ///
    /// Returns true if a new, empty series now backs the channel.
    pub fn register(&mut self, name: &str) -> bool {
        let key = normalize_channel_name(name);
        if key.is_empty() {
            return false;
        }
        match (self.series.contains_key(&key), self.collision) {
            (true, CollisionPolicy::Keep) => {
                log::debug!("Channel {} already registered, keeping existing series", key);
                false
            }
            (true, CollisionPolicy::Replace) => {
                log::debug!("Channel {} re-registered, replacing series", key);
                self.series.insert(key, WindowedSeries::new(self.capacity));
                true
            }
            (false, _) => {
                self.series.insert(key, WindowedSeries::new(self.capacity));
                true
            }
        }
    }

    /// Series for `name`, created on demand if the resolver accepts it
    pub fn resolve(&mut self, name: &str) -> Option<&mut WindowedSeries> {
        let key = normalize_channel_name(name);
        if !self.series.contains_key(&key) {
            if !self.resolver.accepts(&key) {
                return None;
            }
            log::debug!("Creating series for channel {}", key);
            self.series.insert(key.clone(), WindowedSeries::new(self.capacity));
        }
        self.series.get_mut(&key)
    }

    /// Append `points` to `name`'s window.
    ///
    /// An empty batch touches nothing. Returns the series when the channel is
    /// backed by one, `None` when the resolver ignored it.
    pub fn append(&mut self, name: &str, points: &[Sample]) -> Option<&mut WindowedSeries> {
        if points.is_empty() {
            return self.series.get_mut(&normalize_channel_name(name));
        }
        let series = self.resolve(name)?;
        series.append(points);
        Some(series)
    }

    pub fn get(&self, name: &str) -> Option<&WindowedSeries> {
        self.series.get(&normalize_channel_name(name))
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: usize, count: usize) -> Vec<Sample> {
        (start..start + count)
            .map(|i| Sample::new(i as f64, i as f64 * 10.0))
            .collect()
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut series = WindowedSeries::new(5);
        let mut all = Vec::new();
        let mut next = 0;

        for batch_len in [1, 3, 0, 4, 7, 2, 11, 1] {
            let batch = ramp(next, batch_len);
            next += batch_len;
            all.extend(batch.iter().copied());
            series.append(&batch);

            assert!(series.len() <= series.capacity());
            let expected: Vec<Sample> = all[all.len().saturating_sub(5)..].to_vec();
            assert_eq!(series.to_vec(), expected);
        }
    }

    #[test]
    fn test_eviction_count() {
        let mut series = WindowedSeries::new(4);
        assert_eq!(series.append(&ramp(0, 3)), 0);
        assert_eq!(series.append(&ramp(3, 3)), 2);
        assert_eq!(series.append(&ramp(6, 10)), 10);
        assert_eq!(series.to_vec(), ramp(12, 4));
    }

    #[test]
    fn test_empty_append_is_noop() {
        let mut store = SeriesStore::with_known_channels(10);
        store.append("RED", &ramp(0, 3));
        let before = store.get("RED").unwrap().to_vec();

        store.append("RED", &[]);
        assert_eq!(store.get("RED").unwrap().to_vec(), before);

        // Unknown channels are not created by an empty batch either
        let mut open = SeriesStore::new(10, ChannelResolver::AcceptAll, CollisionPolicy::Keep);
        assert!(open.append("new", &[]).is_none());
        assert!(open.is_empty());
    }

    #[test]
    fn test_non_finite_values_are_stored() {
        let mut series = WindowedSeries::new(3);
        series.append(&[Sample::new(0.0, f64::NAN), Sample::new(1.0, 2.0)]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.make_contiguous().finite_bounds_y(), Some((2.0, 2.0)));
    }

    #[test]
    fn test_channel_lookup_is_case_insensitive() {
        let mut store = SeriesStore::with_known_channels(10);
        store.append(" green ", &ramp(0, 2));
        assert_eq!(store.get("Green").unwrap().len(), 2);
    }

    #[test]
    fn test_known_resolver_ignores_unknown() {
        let mut store = SeriesStore::new(10, ChannelResolver::KnownChannels, CollisionPolicy::Keep);
        assert!(store.append("PPG", &ramp(0, 2)).is_none());
        assert!(store.append("ir", &ramp(0, 2)).is_some());
        assert_eq!(store.channels().collect::<Vec<_>>(), vec!["IR"]);
    }

    #[test]
    fn test_fixed_and_custom_resolvers() {
        let fixed = ChannelResolver::Fixed(vec!["spo2".into()]);
        assert!(fixed.accepts("SPO2"));
        assert!(!fixed.accepts("RED"));

        let custom = ChannelResolver::Custom(Arc::new(|name: &str| name.starts_with("P")));
        assert!(custom.accepts("PPG"));
        assert!(!custom.accepts("IR"));
    }

    #[test]
    fn test_collision_keep_and_replace() {
        let mut keep = SeriesStore::new(10, ChannelResolver::AcceptAll, CollisionPolicy::Keep);
        keep.append("IR", &ramp(0, 3));
        assert!(!keep.register("ir"));
        assert_eq!(keep.get("IR").unwrap().len(), 3);

        let mut replace = SeriesStore::new(10, ChannelResolver::AcceptAll, CollisionPolicy::Replace);
        replace.append("IR", &ramp(0, 3));
        assert!(replace.register("ir"));
        assert!(replace.get("IR").unwrap().is_empty());
    }

    #[test]
    fn test_finite_bounds() {
        let points = vec![
            Sample::new(1.0, 5.0),
            Sample::new(f64::INFINITY, -2.0),
            Sample::new(-3.0, f64::NAN),
        ];
        assert_eq!(points.finite_bounds_x(), Some((-3.0, 1.0)));
        assert_eq!(points.finite_bounds_y(), Some((-2.0, 5.0)));
        assert_eq!(Vec::<Sample>::new().finite_bounds_x(), None);
    }
}
