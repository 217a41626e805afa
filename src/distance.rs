//! Geometric-mean distance model for tracked birds.
//!
//! Distance is a relative, configurable geometric approximation derived from
//! apparent bbox size against a single-point calibration (a reference bird
//! of known wingspan whose box measured `reference_bbox_px` pixels at
//! `reference_distance_m` meters), not metric-accurate range-finding.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::detection::BoundingBox;
use crate::track::Track;
use crate::{Error, Result};

/// Calibration parameters for the distance model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Wingspan in meters of the reference class the calibration was taken
    /// against.
    pub reference_span_m: f64,

    /// Apparent bbox size (geometric-mean pixels) of the reference bird at
    /// the reference distance.
    pub reference_bbox_px: f64,

    /// Distance in meters at which the reference bbox size was observed.
    pub reference_distance_m: f64,

    /// Known average wingspans in meters, keyed by lowercase class label.
    /// Classes absent from this table get no distance estimate.
    pub wingspans_m: HashMap<String, f64>,

    /// Number of most recent valid raw samples smoothed per track.
    pub window: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        let mut wingspans_m = HashMap::new();
        wingspans_m.insert("seagull".to_string(), 1.0);

        Self {
            reference_span_m: 1.0,
            reference_bbox_px: 42.0,
            reference_distance_m: 40.0,
            wingspans_m,
            window: 5,
        }
    }
}

impl CalibrationConfig {
    /// Parse a wingspan table in `name: centimeters` format, one entry per
    /// line. Blank lines and unparseable values are skipped; names are
    /// lowercased and spans converted to meters.
    pub fn parse_wingspans(text: &str) -> HashMap<String, f64> {
        let mut table = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            let Some((name, span)) = line.split_once(':') else {
                continue;
            };
            if let Ok(cm) = span.trim().parse::<f64>() {
                if cm > 0.0 {
                    table.insert(name.trim().to_lowercase(), cm / 100.0);
                }
            }
        }
        table
    }
}

/// Converts detection geometry into smoothed per-track distance estimates.
///
/// Raw per-frame estimates are smoothed with the geometric mean of the
/// track's most recent valid samples. The geometric mean dampens transient
/// bbox-size spikes on a multiplicative quantity like inverse-size distance
/// while still following sustained trends.
#[derive(Debug, Clone)]
pub struct DistanceEstimator {
    config: CalibrationConfig,
}

impl DistanceEstimator {
    pub fn new(config: CalibrationConfig) -> Result<Self> {
        if config.window == 0 {
            return Err(Error::InvalidConfig(
                "smoothing window must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("reference_span_m", config.reference_span_m),
            ("reference_bbox_px", config.reference_bbox_px),
            ("reference_distance_m", config.reference_distance_m),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(Error::InvalidConfig(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }

        Ok(Self { config })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Raw single-frame estimate in meters for a labeled box.
    ///
    /// `None` when the box is degenerate or the class has no calibrated
    /// wingspan; an unknown distance is not an error.
    pub fn raw_estimate(&self, label: &str, bbox: &BoundingBox) -> Option<f64> {
        let size_px = bbox.size();
        if size_px <= 0.0 {
            return None;
        }
        // The table is lowercase-keyed; detector labels may not be.
        let span_m = *self.config.wingspans_m.get(&label.to_lowercase())?;

        Some(
            (span_m / self.config.reference_span_m)
                * (self.config.reference_bbox_px / size_px)
                * self.config.reference_distance_m,
        )
    }

    /// Ingest the track's latest observation into its smoothing window.
    ///
    /// Called once per matched frame; invalid raw estimates contribute
    /// nothing and the window keeps its previous samples.
    pub fn observe(&self, track: &mut Track) {
        let raw = self.raw_estimate(&track.label, track.last_bbox());
        if let Some(raw) = raw {
            track.push_distance_sample(raw, self.config.window);
        }
    }

    /// Smoothed distance for a track: the geometric mean of whatever valid
    /// samples its window currently holds. `None` with zero samples.
    pub fn estimate(&self, track: &Track) -> Option<f64> {
        geometric_mean(track.distance_history.iter().copied())
    }
}

/// Geometric mean of a non-empty sequence of positive samples.
///
/// A uniform window returns its value untouched, so a track seeing the same
/// raw reading for the whole window reports exactly that reading.
fn geometric_mean(samples: impl Iterator<Item = f64>) -> Option<f64> {
    let samples: Vec<f64> = samples.collect();
    let first = *samples.first()?;

    if samples.iter().all(|&s| s == first) {
        return Some(first);
    }

    let log_sum: f64 = samples.iter().map(|s| s.ln()).sum();
    Some((log_sum / samples.len() as f64).exp())
}
