//! Trend detection over recent block means
//!
//! The detector keeps the last `trend_detection_window` observations (one per
//! block, the mean of the primary dimension) and fits a least-squares line
//! through them. The absolute correlation coefficient of the fit is the trend
//! strength; the slope sign gives the direction.

use crate::config::TrendConfig;
use crate::similarity::stats;
use crate::types::Window;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Direction of a fitted trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    /// Positive slope
    Up,
    /// Negative slope
    Down,
    /// Flat or not enough data
    #[default]
    None,
}

/// Result of [`TrendDetector::detect`]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrendSignal {
    /// Strength exceeds the configured threshold
    pub has_trend: bool,
    /// Slope direction
    pub direction: TrendDirection,
    /// Absolute correlation of the linear fit, in `[0, 1]`
    pub strength: f64,
}

/// Rolling linear-regression trend detector
#[derive(Debug, Clone)]
pub struct TrendDetector {
    window: usize,
    threshold: f64,
    history: VecDeque<f64>,
}

impl TrendDetector {
    /// Create a detector
    pub fn new(config: &TrendConfig) -> Self {
        Self {
            window: config.trend_detection_window.max(1),
            threshold: config.trend_threshold,
            history: VecDeque::with_capacity(config.trend_detection_window),
        }
    }

    /// Push one scalar observation, dropping the oldest beyond the window
    pub fn observe(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.history.push_back(value);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
    }

    /// Observe the mean of the primary dimension of a window
    ///
    /// Windows without values for that dimension are ignored.
    pub fn observe_window(&mut self, window: &Window, primary: &str) {
        let values = match window {
            Window::Flat(values) => Some(values.as_slice()),
            Window::Multi(dims) => dims.get(primary).map(Vec::as_slice),
        };
        if let Some(values) = values.filter(|v| !v.is_empty()) {
            self.observe(stats::mean(values));
        }
    }

    /// Number of retained observations
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True when nothing has been observed
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Fit the retained observations
    ///
    /// Fewer than three observations never report a trend.
    pub fn detect(&self) -> TrendSignal {
        if self.history.len() < 3 {
            return TrendSignal::default();
        }

        let values: Vec<f64> = self.history.iter().copied().collect();
        let Some(fit) = stats::linear_regression(&values) else {
            return TrendSignal::default();
        };

        let strength = fit.r.abs();
        let direction = if fit.slope > 0.0 {
            TrendDirection::Up
        } else if fit.slope < 0.0 {
            TrendDirection::Down
        } else {
            TrendDirection::None
        };

        TrendSignal {
            has_trend: strength > self.threshold,
            direction,
            strength,
        }
    }
}
