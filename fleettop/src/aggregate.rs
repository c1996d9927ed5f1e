//! Fleet aggregation: latest sample per host, a bounded recent-arrivals
//! window, and fleet-wide averages derived from the current set.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::types::MetricSample;

/// How many of the most recent arrivals (across all hosts) are retained.
pub const RECENT_WINDOW: usize = 8;

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    if dq.len() == cap {
        dq.pop_front();
    }
    dq.push_back(v);
}

/// Mean cpu/ram/disk over the current per-host set. Values are averaged as
/// received; nothing is clamped or validated here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FleetAverages {
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
}

/// Detached snapshot of the aggregate. Owns its data, so a caller can hold
/// one while the aggregate keeps moving.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateView {
    /// Latest sample for every known host, ordered by hostname.
    pub hosts: Vec<MetricSample>,
    /// Most recent arrivals in arrival order, oldest first.
    pub recent: Vec<MetricSample>,
    /// None until at least one host is known.
    pub averages: Option<FleetAverages>,
}

impl AggregateView {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn host(&self, hostname: &str) -> Option<&MetricSample> {
        self.hosts.iter().find(|s| s.hostname == hostname)
    }
}

/// Mutable aggregation state driven by the feed.
#[derive(Debug, Default)]
pub struct FleetAggregate {
    current: BTreeMap<String, MetricSample>,
    recent: VecDeque<MetricSample>,
}

impl FleetAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample in. The newest arrival for a hostname wins outright;
    /// the sample's own timestamp is carried but never consulted.
    pub fn apply(&mut self, sample: MetricSample) {
        push_capped(&mut self.recent, sample.clone(), RECENT_WINDOW);
        self.current.insert(sample.hostname.clone(), sample);
    }

    /// Number of distinct hosts seen so far.
    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Build a detached view of the current state.
    pub fn view(&self) -> AggregateView {
        let hosts: Vec<MetricSample> = self.current.values().cloned().collect();
        let averages = if hosts.is_empty() {
            None
        } else {
            let n = hosts.len() as f64;
            Some(FleetAverages {
                cpu: hosts.iter().map(|s| s.cpu).sum::<f64>() / n,
                ram: hosts.iter().map(|s| s.ram).sum::<f64>() / n,
                disk: hosts.iter().map(|s| s.disk).sum::<f64>() / n,
            })
        };
        AggregateView {
            hosts,
            recent: self.recent.iter().cloned().collect(),
            averages,
        }
    }
}
