use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::sample::Sample;

/// What happens to a sample whose timestamp sits exactly on the retention boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionBoundary {
    /// Evict only samples strictly older than the threshold.
    #[default]
    KeepBoundary,
    /// Evict samples at or older than the threshold.
    DropBoundary,
}

impl EvictionBoundary {
    fn is_expired(self, timestamp: DateTime<Utc>, threshold: DateTime<Utc>) -> bool {
        match self {
            EvictionBoundary::KeepBoundary => timestamp < threshold,
            EvictionBoundary::DropBoundary => timestamp <= threshold,
        }
    }
}

/// Insertion-ordered samples of the last `retention` worth of time.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: VecDeque<Sample>,
    retention: Duration,
    boundary: EvictionBoundary,
}

impl SampleBuffer {
    pub fn new(retention: Duration, boundary: EvictionBoundary) -> Self {
        Self::with_capacity(retention, boundary, 0)
    }

    pub fn with_capacity(retention: Duration, boundary: EvictionBoundary, capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            retention,
            boundary,
        }
    }

    /// Appends `sample` and evicts everything that fell out of the window
    /// ending at its timestamp. Returns the number of evicted samples.
    pub fn push(&mut self, sample: Sample) -> usize {
        let now = sample.timestamp();
        self.samples.push_back(sample);
        self.evict(now)
    }

    fn evict(&mut self, now: DateTime<Utc>) -> usize {
        // Nothing can be older than an unrepresentable threshold.
        let Some(threshold) = now.checked_sub_signed(self.retention) else {
            return 0;
        };
        let mut evicted = 0;
        while let Some(front) = self.samples.front() {
            if !self.boundary.is_expired(front.timestamp(), threshold) {
                break;
            }
            self.samples.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
