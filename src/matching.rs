//! Detection-to-track association scoring and greedy resolution.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::track::{Track, TrackId};

/// Association metric between a track's most recent box and a detection.
///
/// Both metrics produce a score where higher is better, so the tracker's
/// minimum-score gate applies uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMetric {
    /// Intersection over Union of the two boxes, in [0, 1].
    Iou,
    /// Inverse centroid distance, `1 / (1 + d)` with `d` in pixels, in (0, 1].
    CentroidProximity,
}

impl MatchMetric {
    /// Score one candidate pair. Higher is better.
    pub fn score(&self, track: &Track, detection: &Detection) -> f64 {
        match self {
            MatchMetric::Iou => track.last_bbox().iou(&detection.bbox),
            MatchMetric::CentroidProximity => {
                let d = nalgebra::distance(
                    &track.last_bbox().centroid(),
                    &detection.bbox.centroid(),
                );
                1.0 / (1.0 + d)
            }
        }
    }
}

/// Build the score matrix (n_detections x n_tracks).
///
/// Pairs with mismatched class labels score negative infinity and can never
/// pass the gate.
pub fn score_matrix(
    metric: MatchMetric,
    detections: &[Detection],
    tracks: &[Track],
) -> DMatrix<f64> {
    let mut scores = DMatrix::zeros(detections.len(), tracks.len());

    for (i, det) in detections.iter().enumerate() {
        for (j, track) in tracks.iter().enumerate() {
            scores[(i, j)] = if track.label == det.label {
                metric.score(track, det)
            } else {
                f64::NEG_INFINITY
            };
        }
    }

    scores
}

/// Resolve matches greedily in descending score order.
///
/// Scores below `min_score` never match. Ties are broken by ascending track
/// id (oldest track wins), then by ascending detection index, so resolution
/// is fully deterministic. Each detection and each track is consumed at most
/// once.
///
/// # Arguments
/// * `scores` - Score matrix (n_detections x n_tracks)
/// * `track_ids` - Track id per matrix column, for tie-breaking
/// * `min_score` - Gate below which no match is allowed
///
/// # Returns
/// Matched `(det_idx, track_idx)` pairs.
pub fn resolve_matches(
    scores: &DMatrix<f64>,
    track_ids: &[TrackId],
    min_score: f64,
) -> Vec<(usize, usize)> {
    let n_detections = scores.nrows();
    let n_tracks = scores.ncols();

    if n_detections == 0 || n_tracks == 0 {
        return Vec::new();
    }

    // Collect all gated candidate pairs
    let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
    for i in 0..n_detections {
        for j in 0..n_tracks {
            let score = scores[(i, j)];
            if score.is_finite() && score >= min_score {
                pairs.push((score, i, j));
            }
        }
    }

    // Descending score; ties by ascending track id, then detection index
    pairs.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| track_ids[a.2].cmp(&track_ids[b.2]))
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut used_dets = vec![false; n_detections];
    let mut used_tracks = vec![false; n_tracks];
    let mut matched = Vec::new();

    for (_score, det_idx, track_idx) in pairs {
        if used_dets[det_idx] || used_tracks[track_idx] {
            continue;
        }
        matched.push((det_idx, track_idx));
        used_dets[det_idx] = true;
        used_tracks[track_idx] = true;
    }

    matched
}

/// Indices in `0..total` not present in the matched set.
pub fn unmatched(total: usize, matched: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut is_matched = vec![false; total];
    for idx in matched {
        is_matched[idx] = true;
    }
    (0..total).filter(|&i| !is_matched[i]).collect()
}
