//! Main tracker: frame-to-frame identity resolution.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::Detection;
use crate::matching::{resolve_matches, score_matrix, MatchMetric};
use crate::track::{Track, TrackId, TrackState};
use crate::{Error, Result};

/// Configuration for the tracker.
///
/// Every threshold is explicit; the defaults come from the calibration of
/// the original field deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Association metric between a track's latest box and a detection.
    pub metric: MatchMetric,

    /// Minimum match score; candidate pairs scoring below this never match.
    /// Must be strictly positive (a zero gate would match any same-class
    /// pair, including fully disjoint boxes).
    pub min_match_score: f64,

    /// A track expires once `missed_frames` exceeds this many consecutive
    /// frames without a match.
    pub miss_threshold: u32,

    /// Capacity of the per-track bbox and distance history rings.
    pub history_window: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            metric: MatchMetric::Iou,
            min_match_score: 0.03,
            miss_threshold: 5,
            history_window: 5,
        }
    }
}

/// Object tracker.
///
/// Maintains the set of live tracks for one session, associating each
/// frame's detections to existing tracks or spawning new ones, and expiring
/// tracks that have gone unmatched for too long. Track ids are assigned
/// monotonically and never reused after expiry.
#[derive(Debug)]
pub struct Tracker {
    /// Tracker configuration.
    pub config: TrackerConfig,

    /// Live tracks; everything in here is `Active`.
    tracks: Vec<Track>,

    /// Next id to assign.
    next_track_id: TrackId,
}

impl Tracker {
    /// Create a new tracker with the given configuration.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        if !(config.min_match_score > 0.0) || !config.min_match_score.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "min_match_score must be positive and finite, got {}",
                config.min_match_score
            )));
        }

        if config.history_window == 0 {
            return Err(Error::InvalidConfig(
                "history_window must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            config,
            tracks: Vec::new(),
            next_track_id: 0,
        })
    }

    /// Currently active tracks.
    pub fn active_tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Look up an active track by id.
    pub fn track(&self, track_id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    pub(crate) fn track_mut(&mut self, track_id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.track_id == track_id)
    }

    /// Total number of track ids handed out so far in this session.
    pub fn ids_assigned(&self) -> u64 {
        self.next_track_id
    }

    /// Update the tracker with one frame's detections.
    ///
    /// Matched tracks fold in their detection, unmatched tracks accrue a
    /// miss (and expire past the miss threshold), and every unmatched
    /// detection spawns a fresh track. Zero detections and zero tracks are
    /// both fine: the former is a miss for every live track.
    ///
    /// # Returns
    /// `(track_id, detection)` pairs in input order; every detection leaves
    /// with an id.
    pub fn update(
        &mut self,
        frame_index: usize,
        detections: Vec<Detection>,
    ) -> Vec<(TrackId, Detection)> {
        let scores = score_matrix(self.config.metric, &detections, &self.tracks);
        let track_ids: Vec<TrackId> = self.tracks.iter().map(|t| t.track_id).collect();
        let matched = resolve_matches(&scores, &track_ids, self.config.min_match_score);

        let mut assigned: Vec<Option<TrackId>> = vec![None; detections.len()];
        let mut track_matched = vec![false; self.tracks.len()];

        for &(det_idx, track_idx) in &matched {
            self.tracks[track_idx].record_match(&detections[det_idx]);
            assigned[det_idx] = Some(track_ids[track_idx]);
            track_matched[track_idx] = true;
        }

        // Unmatched tracks accrue a miss; too many misses retires the id.
        let miss_threshold = self.config.miss_threshold;
        for (track, was_matched) in self.tracks.iter_mut().zip(&track_matched) {
            if *was_matched {
                continue;
            }
            track.record_miss();
            if track.missed_frames > miss_threshold {
                track.state = TrackState::Expired;
                debug!(
                    track_id = track.track_id,
                    label = %track.label,
                    missed_frames = track.missed_frames,
                    "track expired"
                );
            }
        }
        self.tracks.retain(|t| t.is_active());

        // Unmatched detections spawn new tracks, in input order.
        for (det_idx, detection) in detections.iter().enumerate() {
            if assigned[det_idx].is_some() {
                continue;
            }
            let track_id = self.next_track_id;
            self.next_track_id += 1;

            debug!(track_id, label = %detection.label, frame_index, "track created");
            self.tracks
                .push(Track::new(track_id, detection, self.config.history_window));
            assigned[det_idx] = Some(track_id);
        }

        assigned
            .into_iter()
            .zip(detections)
            .map(|(id, det)| {
                let id = id.unwrap_or_else(|| unreachable!("every detection is assigned"));
                (id, det)
            })
            .collect()
    }

    /// Destroy all tracks and restart id allocation.
    ///
    /// Nothing from the previous session state survives a reset.
    pub fn reset(&mut self) {
        debug!(dropped = self.tracks.len(), "tracker reset");
        self.tracks.clear();
        self.next_track_id = 0;
    }
}
