//! Track state maintained by the tracker for one physical object.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::detection::{BoundingBox, Detection};

/// Track identifier, unique for the lifetime of a session and never reused
/// after a track expires.
pub type TrackId = u64;

/// Lifecycle state of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackState {
    Active,
    Expired,
}

/// One physical object followed across frames.
///
/// A track is created from the first detection that could not be matched to
/// any live track, updated on every matched frame, and expired once it has
/// gone unmatched for longer than the tracker's miss threshold.
#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: TrackId,
    /// Class label, fixed at creation.
    pub label: String,
    /// Most recent observed boxes, newest last. Bounded ring, never empty.
    pub bbox_history: VecDeque<BoundingBox>,
    /// Most recent valid raw distance samples, newest last. Every value is
    /// strictly positive; degenerate boxes and uncalibrated classes
    /// contribute nothing.
    pub distance_history: VecDeque<f64>,
    /// Consecutive frames matched since the last miss (the persistence
    /// metric): +1 on match, reset to 0 on miss. No partial credit.
    pub consecutive_matched_frames: u32,
    /// Consecutive frames without a match; reset to 0 on match.
    pub missed_frames: u32,
    pub last_seen_frame: usize,
    /// Confidence of the most recent matched detection (overlay output).
    pub last_confidence: f64,
    /// Largest bbox geometric-mean size ever observed for this track.
    pub max_bbox_size: f64,
    pub state: TrackState,
    history_capacity: usize,
}

impl Track {
    pub(crate) fn new(track_id: TrackId, detection: &Detection, history_capacity: usize) -> Self {
        let mut bbox_history = VecDeque::with_capacity(history_capacity);
        bbox_history.push_back(detection.bbox);

        Self {
            track_id,
            label: detection.label.clone(),
            bbox_history,
            distance_history: VecDeque::with_capacity(history_capacity),
            consecutive_matched_frames: 1,
            missed_frames: 0,
            last_seen_frame: detection.frame_index,
            last_confidence: detection.confidence,
            max_bbox_size: detection.bbox.size(),
            state: TrackState::Active,
            history_capacity,
        }
    }

    /// Most recent observed box. The history ring is seeded at creation and
    /// only ever pushed to, so it is never empty.
    pub fn last_bbox(&self) -> &BoundingBox {
        self.bbox_history
            .back()
            .unwrap_or_else(|| unreachable!("bbox_history is seeded at creation"))
    }

    /// Consecutive matched frames since the last miss.
    pub fn persistence(&self) -> u32 {
        self.consecutive_matched_frames
    }

    pub fn is_active(&self) -> bool {
        self.state == TrackState::Active
    }

    /// Fold a matched detection into the track.
    pub(crate) fn record_match(&mut self, detection: &Detection) {
        self.bbox_history.push_back(detection.bbox);
        while self.bbox_history.len() > self.history_capacity {
            self.bbox_history.pop_front();
        }

        self.consecutive_matched_frames += 1;
        self.missed_frames = 0;
        self.last_seen_frame = detection.frame_index;
        self.last_confidence = detection.confidence;
        self.max_bbox_size = self.max_bbox_size.max(detection.bbox.size());
    }

    /// Register a frame in which no detection matched this track.
    pub(crate) fn record_miss(&mut self) {
        self.missed_frames += 1;
        self.consecutive_matched_frames = 0;
    }

    /// Append a valid raw distance sample, keeping only the `window` most
    /// recent. Non-positive samples are ignored.
    pub(crate) fn push_distance_sample(&mut self, raw: f64, window: usize) {
        if raw <= 0.0 || !raw.is_finite() {
            return;
        }
        self.distance_history.push_back(raw);
        while self.distance_history.len() > window {
            self.distance_history.pop_front();
        }
    }
}
