//! Heuristic resource forecasts.
//!
//! Up to four estimators run over the last 10 history points and are blended
//! with fixed per-estimator weights, renormalized over whichever estimators
//! had enough data. The output is a rough guide, not a statistical model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::history::TelemetrySnapshot;

/// Points considered by the estimators.
const WINDOW: usize = 10;
/// Below this many points only the rate is used.
const MIN_HISTORY: usize = 3;
const BASE_CONFIDENCE: f64 = 60.0;
const MAX_CONFIDENCE: f64 = 95.0;
/// Week projection assumes a small growth bonus over the current rate.
const WEEK_GROWTH: f64 = 1.15;

/// A forecast value with a 0–95 confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(rename = "prediction")]
    pub value: u64,
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakPrediction {
    /// "HH:00"
    pub peak_time: String,
    pub accuracy: u8,
}

/// Everything the query endpoint reports under `ai_predictions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub coins_1h: Prediction,
    pub coins_24h: Prediction,
    pub peak_time: PeakPrediction,
    pub week_projection: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Estimator {
    RecencyTrend,
    Seasonal,
    LinearTrend,
    Momentum,
}

impl Estimator {
    pub fn weight(&self) -> f64 {
        match self {
            Estimator::RecencyTrend => 0.30,
            Estimator::Seasonal => 0.25,
            Estimator::LinearTrend => 0.25,
            Estimator::Momentum => 0.20,
        }
    }
}

/// Prediction engine. Stateless apart from its hour tables.
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    /// Hour of day → accuracy reported when it is the next peak.
    peak_hours: BTreeMap<u32, u8>,
    trough_hours: Vec<u32>,
    fallback_peak: (u32, u8),
}

impl Default for PredictionEngine {
    fn default() -> Self {
        Self {
            peak_hours: BTreeMap::from([(14, 80), (15, 85), (16, 80), (20, 90), (21, 95), (22, 85)]),
            trough_hours: vec![2, 3, 4, 5, 6],
            fallback_peak: (20, 75),
        }
    }
}

impl PredictionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn hour_multiplier(&self, hour: u32) -> f64 {
        if self.peak_hours.contains_key(&hour) {
            1.3
        } else if self.trough_hours.contains(&hour) {
            0.6
        } else {
            1.0
        }
    }

    /// Raw estimates of every estimator whose data precondition holds.
    pub fn estimates(&self, history: &[f64], rate: f64, horizon_hours: f64, hour: u32) -> Vec<(Estimator, f64)> {
        let recent = &history[history.len().saturating_sub(WINDOW)..];
        let n = recent.len();
        let mut out = Vec::with_capacity(4);

        if n >= 2 {
            let last = recent[n - 1];
            let second_last = recent[n - 2];
            let delta = last - second_last;
            let smoothed = 0.4 * last + 0.6 * (second_last + delta);
            out.push((Estimator::RecencyTrend, smoothed + delta * horizon_hours));
        }

        out.push((Estimator::Seasonal, rate * self.hour_multiplier(hour) * horizon_hours));

        if n >= 5 {
            out.push((Estimator::LinearTrend, linear_trend(recent, horizon_hours)));
        }

        if n >= 3 {
            let last = recent[n - 1];
            let momentum = (last - recent[n - 3]) / 2.0;
            out.push((Estimator::Momentum, last + momentum * horizon_hours));
        }

        out
    }

    /// Forecast the resource value `horizon_hours` ahead. `hour` is the current
    /// local hour of day.
    pub fn predict(&self, history: &[f64], rate: f64, horizon_hours: f64, hour: u32) -> Prediction {
        if history.len() < MIN_HISTORY {
            return Prediction {
                value: clamp_round(rate * horizon_hours),
                confidence: BASE_CONFIDENCE as u8,
            };
        }

        let estimates = self.estimates(history, rate, horizon_hours, hour);
        let total_weight: f64 = estimates.iter().map(|(e, _)| e.weight()).sum();
        let blended = if total_weight > 0.0 {
            estimates.iter().map(|(e, v)| e.weight() * v).sum::<f64>() / total_weight
        } else {
            rate * horizon_hours
        };

        let bonus = if estimates.len() >= 3 { 20.0 } else { 0.0 };
        let confidence = (BASE_CONFIDENCE + 0.5 * history.len() as f64 + bonus).min(MAX_CONFIDENCE);

        Prediction {
            value: clamp_round(blended),
            confidence: confidence as u8,
        }
    }

    /// Next peak hour after `hour`, scanning the following 24 hours.
    pub fn peak_time(&self, hour: u32) -> PeakPrediction {
        let (peak, accuracy) = (1..=24)
            .map(|offset| (hour + offset) % 24)
            .find_map(|h| self.peak_hours.get(&h).map(|acc| (h, *acc)))
            .unwrap_or(self.fallback_peak);
        PeakPrediction {
            peak_time: format!("{peak:02}:00"),
            accuracy,
        }
    }

    /// The full prediction bundle for a snapshot.
    pub fn forecast(&self, snapshot: &TelemetrySnapshot, hour: u32) -> Forecast {
        let history = snapshot.resource_history();
        let rate = snapshot.resource_rate;
        Forecast {
            coins_1h: self.predict(&history, rate, 1.0, hour),
            coins_24h: self.predict(&history, rate, 24.0, hour),
            peak_time: self.peak_time(hour),
            week_projection: (rate * 24.0 * 7.0 * WEEK_GROWTH).max(0.0) as u64,
        }
    }
}

/// `last + slope·H` with an OLS slope over index vs value.
fn linear_trend(points: &[f64], horizon_hours: f64) -> f64 {
    let n = points.len() as f64;
    let last = points[points.len() - 1];
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = points.iter().sum::<f64>() / n;
    let (num, den) = points.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, y)| {
        let dx = i as f64 - x_mean;
        (num + dx * (y - y_mean), den + dx * dx)
    });
    if den == 0.0 {
        return last;
    }
    last + num / den * horizon_hours
}

fn clamp_round(v: f64) -> u64 {
    if v.is_finite() { v.round().max(0.0) as u64 } else { 0 }
}
