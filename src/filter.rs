//! Sample filtering for raw device position fixes.
//!
//! Device positioning is noisy: fixes jitter around the true position and
//! occasionally "teleport" hundreds of meters when the signal is poor. This
//! module keeps a bounded history of accepted fixes, rejects implausible jumps
//! and produces a confidence-weighted average of the most recent samples.
//!
//! Everything here is pure computation over the history the caller owns. No
//! I/O, no clocks, no blocking.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::geo::Coordinate;

/// Accuracy assumed when the device reports none (or a negative value)
pub const UNKNOWN_ACCURACY_METERS: f64 = 9999.0;

/// A single position fix as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub lat: f64,
    pub lng: f64,
    /// Radius of the 68% confidence circle reported by the device
    pub accuracy_meters: f64,
    /// Milliseconds since the Unix epoch when the fix was taken
    pub timestamp_ms: i64,
}

impl RawFix {
    pub fn new(lat: f64, lng: f64, accuracy_meters: f64, timestamp_ms: i64) -> Self {
        Self {
            lat,
            lng,
            accuracy_meters,
            timestamp_ms,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }

    /// Reported accuracy, or [`UNKNOWN_ACCURACY_METERS`] if the device gave nothing usable
    pub fn effective_accuracy(&self) -> f64 {
        if self.accuracy_meters.is_finite() && self.accuracy_meters >= 0.0 {
            self.accuracy_meters
        } else {
            UNKNOWN_ACCURACY_METERS
        }
    }
}

/// Weighted average position over the most recent accepted fixes
pub type SmoothedFix = Coordinate;

/// Tunable thresholds for jump rejection and smoothing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    /// A candidate farther than this from the last accepted fix is suspect
    pub jump_reject_meters: f64,
    /// ...and is rejected when its accuracy is worse than this
    pub jump_reject_accuracy: f64,
    /// Maximum number of fixes retained in the history
    pub history_capacity: usize,
    /// Number of most recent fixes averaged into the smoothed position
    pub smoothing_window: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            jump_reject_meters: 300.0,
            jump_reject_accuracy: 50.0,
            history_capacity: 20,
            smoothing_window: 5,
        }
    }
}

/// Bounded FIFO of accepted fixes, oldest first
#[derive(Debug, Clone, Default)]
pub struct SampleHistory {
    samples: VecDeque<RawFix>,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&RawFix> {
        self.samples.back()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, RawFix> {
        self.samples.iter()
    }

    fn push(&mut self, fix: RawFix, capacity: usize) {
        self.samples.push_back(fix);
        while self.samples.len() > capacity.max(1) {
            self.samples.pop_front();
        }
    }
}

/// Result of offering a candidate fix to the filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOutcome {
    pub accepted: bool,
    /// Recomputed average, present only when the candidate was accepted
    pub smoothed: Option<SmoothedFix>,
}

/// Jump rejection plus inverse-accuracy weighted smoothing
#[derive(Debug, Clone, Default)]
pub struct SampleFilter {
    config: FilterConfig,
}

impl SampleFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Offer a candidate fix. The history is only modified when the candidate is accepted.
    pub fn accept(&self, history: &mut SampleHistory, candidate: RawFix) -> FilterOutcome {
        if self.is_jump(history, &candidate) {
            return FilterOutcome {
                accepted: false,
                smoothed: None,
            };
        }

        history.push(candidate, self.config.history_capacity);
        FilterOutcome {
            accepted: true,
            smoothed: self.smoothed(history),
        }
    }

    /// Whether the candidate looks like a teleport glitch relative to the last accepted fix
    pub fn is_jump(&self, history: &SampleHistory, candidate: &RawFix) -> bool {
        let Some(prev) = history.last() else {
            return false;
        };
        let jump = prev.coordinate().distance_to(&candidate.coordinate());
        jump > self.config.jump_reject_meters
            && candidate.effective_accuracy() > self.config.jump_reject_accuracy
    }

    /// Weighted average of the last `smoothing_window` fixes, weight = 1 / max(accuracy, 1)
    pub fn smoothed(&self, history: &SampleHistory) -> Option<SmoothedFix> {
        let window = self.config.smoothing_window.max(1);
        let skip = history.len().saturating_sub(window);

        let (mut wsum, mut lat, mut lng) = (0.0, 0.0, 0.0);
        for s in history.iter().skip(skip) {
            let w = 1.0 / s.effective_accuracy().max(1.0);
            lat += s.lat * w;
            lng += s.lng * w;
            wsum += w;
        }

        if wsum > 0.0 {
            Some(Coordinate::new(lat / wsum, lng / wsum))
        } else {
            None
        }
    }
}

/// Qualitative confidence in the currently displayed fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Accurate,
    Inaccurate,
    Outdated,
}

impl TrustTier {
    /// Classify a fix by accuracy and age. Age wins over accuracy.
    pub fn classify(
        accuracy_meters: f64,
        age_ms: i64,
        accurate_within: f64,
        outdated_after_ms: i64,
    ) -> Self {
        if age_ms > outdated_after_ms {
            TrustTier::Outdated
        } else if accuracy_meters <= accurate_within {
            TrustTier::Accurate
        } else {
            TrustTier::Inaccurate
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::Accurate => "accurate",
            TrustTier::Inaccurate => "inaccurate",
            TrustTier::Outdated => "outdated",
        }
    }
}
