/// Sliding-window event aggregator
///
/// Debounces per-window detections: a trigger fires once `count_threshold`
/// detections fall within `window` of the newest one, after which the window
/// is emptied so the next trigger needs a fresh run of detections.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// When stale detections are dropped from the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Only when a new detection is appended
    #[default]
    OnDetection,

    /// On every tick, including negative ones
    EveryTick,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Detections needed inside the window to fire
    pub count_threshold: usize,

    /// Maximum age of a retained detection
    pub window: Duration,

    pub eviction_policy: EvictionPolicy,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            count_threshold: 3,
            window: Duration::from_secs(60),
            eviction_policy: EvictionPolicy::OnDetection,
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<(), AggregatorError> {
        if self.count_threshold == 0 {
            return Err(AggregatorError::InvalidConfig(
                "count_threshold must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Outcome of recording one detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorDecision {
    /// Below threshold; `window_len` detections currently retained
    Pending { window_len: usize },

    /// Threshold reached with `detections` in the window, which is now empty
    Trigger { detections: usize },
}

impl AggregatorDecision {
    pub fn is_trigger(&self) -> bool {
        matches!(self, AggregatorDecision::Trigger { .. })
    }
}

/// Owner of the sliding window of detection instants
#[derive(Debug)]
pub struct EventAggregator {
    config: AggregatorConfig,
    window: VecDeque<Instant>,
}

impl EventAggregator {
    pub fn new(config: AggregatorConfig) -> Result<Self, AggregatorError> {
        config.validate()?;

        debug!(
            "Initializing aggregator: {} detections within {:?}, eviction {:?}",
            config.count_threshold, config.window, config.eviction_policy
        );

        Ok(Self {
            window: VecDeque::with_capacity(config.count_threshold),
            config,
        })
    }

    /// Append a positive detection at `now` and decide whether to fire
    ///
    /// Callers must pass non-decreasing instants.
    pub fn record_detection(&mut self, now: Instant) -> AggregatorDecision {
        self.window.push_back(now);
        self.evict_stale(now);

        let window_len = self.window.len();
        if window_len >= self.config.count_threshold {
            info!(
                "{} detections within {:?}, triggering",
                window_len, self.config.window
            );
            self.window.clear();
            return AggregatorDecision::Trigger {
                detections: window_len,
            };
        }

        debug!(
            "Detection recorded: {}/{} in window",
            window_len, self.config.count_threshold
        );
        AggregatorDecision::Pending { window_len }
    }

    /// Note a negative tick at `now`
    ///
    /// Leaves the window untouched unless the policy is `EveryTick`.
    pub fn observe_idle(&mut self, now: Instant) {
        if self.config.eviction_policy == EvictionPolicy::EveryTick {
            self.evict_stale(now);
        }
    }

    // Entries exactly `window` old are kept.
    fn evict_stale(&mut self, now: Instant) {
        while let Some(&oldest) = self.window.front() {
            if now.saturating_duration_since(oldest) > self.config.window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Detection instants currently retained, oldest first
    pub fn timestamps(&self) -> impl Iterator<Item = &Instant> {
        self.window.iter()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        debug!("Aggregator window cleared");
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }
}
