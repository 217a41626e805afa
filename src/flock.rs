//! Per-frame flock grouping of co-located same-class tracks.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::track::{Track, TrackId};
use crate::{Error, Result};

/// Configuration for flock detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlockConfig {
    /// Minimum members to form a flock. Exact boundary: a group of exactly
    /// this many forms a flock, one fewer does not.
    pub min_flock_size: usize,

    /// Maximum centroid gap in pixels linking two tracks into the same
    /// group.
    pub proximity_px: f64,

    /// Persistence (consecutive matched frames) at or above which a member
    /// counts as stable.
    pub stable_min_persistence: u32,

    /// Tracks with a bbox geometric-mean size below this many pixels are
    /// too small to seed a group; they can only join via the extension
    /// rule.
    pub min_member_bbox_size: f64,

    /// Extra slack in pixels added to a flock's spatial envelope when
    /// admitting small or unstable stragglers.
    pub envelope_margin_px: f64,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            min_flock_size: 3,
            proximity_px: 150.0,
            stable_min_persistence: 3,
            min_member_bbox_size: 10.0,
            envelope_margin_px: 50.0,
        }
    }
}

/// A transient per-frame grouping of co-located same-class tracks.
///
/// Flocks are recomputed from scratch every frame and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flock {
    pub label: String,
    /// Member track ids; at least `min_flock_size` of them.
    pub member_track_ids: BTreeSet<TrackId>,
    /// Mean centroid of the member boxes.
    pub centroid: Point2<f64>,
    pub frame_index: usize,
}

/// Groups active tracks into flocks.
///
/// Base rule: per class, proximity-linked groups of at least
/// `min_flock_size` adequately-sized tracks form flocks. Extension rule:
/// a flock with a stable core additionally absorbs nearby same-class tracks
/// that are individually too small or too young to have seeded a group,
/// flickering detections that are plausibly part of the same flock. A track
/// belongs to at most one flock per frame; when several flocks qualify it
/// goes to the nearest centroid.
#[derive(Debug, Clone)]
pub struct FlockDetector {
    config: FlockConfig,
}

impl FlockDetector {
    pub fn new(config: FlockConfig) -> Result<Self> {
        if config.min_flock_size < 2 {
            return Err(Error::InvalidConfig(
                "min_flock_size must be at least 2".to_string(),
            ));
        }
        if !(config.proximity_px > 0.0) || !config.proximity_px.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "proximity_px must be positive and finite, got {}",
                config.proximity_px
            )));
        }

        Ok(Self { config })
    }

    pub fn config(&self) -> &FlockConfig {
        &self.config
    }

    /// Compute this frame's flocks from the currently active tracks.
    ///
    /// Only tracks matched in this frame count as members; a track that
    /// missed the frame still holds its last box, and that stale position
    /// must not keep a dispersed flock alive.
    pub fn evaluate(&self, frame_index: usize, tracks: &[Track]) -> Vec<Flock> {
        // Group by class; BTreeMap keeps class iteration deterministic.
        let mut by_label: BTreeMap<&str, Vec<&Track>> = BTreeMap::new();
        for track in tracks
            .iter()
            .filter(|t| t.is_active() && t.missed_frames == 0)
        {
            by_label.entry(&track.label).or_default().push(track);
        }

        let mut flocks = Vec::new();
        for (label, group) in by_label {
            self.evaluate_class(frame_index, label, &group, &mut flocks);
        }
        flocks
    }

    fn evaluate_class(
        &self,
        frame_index: usize,
        label: &str,
        group: &[&Track],
        flocks: &mut Vec<Flock>,
    ) {
        let seeds: Vec<&Track> = group
            .iter()
            .copied()
            .filter(|t| t.last_bbox().size() >= self.config.min_member_bbox_size)
            .collect();

        // Single-linkage clustering over the seed tracks.
        let mut assigned = vec![false; seeds.len()];
        let mut clusters: Vec<Vec<&Track>> = Vec::new();

        for start in 0..seeds.len() {
            if assigned[start] {
                continue;
            }
            let mut cluster = vec![seeds[start]];
            assigned[start] = true;
            let mut frontier = vec![start];

            while let Some(current) = frontier.pop() {
                for next in 0..seeds.len() {
                    if assigned[next] {
                        continue;
                    }
                    let gap = nalgebra::distance(
                        &seeds[current].last_bbox().centroid(),
                        &seeds[next].last_bbox().centroid(),
                    );
                    if gap <= self.config.proximity_px {
                        cluster.push(seeds[next]);
                        assigned[next] = true;
                        frontier.push(next);
                    }
                }
            }
            clusters.push(cluster);
        }

        let mut class_flocks: Vec<(Vec<&Track>, Point2<f64>)> = clusters
            .into_iter()
            .filter(|c| c.len() >= self.config.min_flock_size)
            .map(|members| {
                let centroid = mean_centroid(&members);
                (members, centroid)
            })
            .collect();

        if class_flocks.is_empty() {
            return;
        }

        // Extension rule: flocks with a stable core absorb leftover small or
        // unstable tracks inside their spatial envelope.
        let envelopes: Vec<Option<f64>> = class_flocks
            .iter()
            .map(|(members, centroid)| {
                let stable = members
                    .iter()
                    .filter(|t| t.persistence() >= self.config.stable_min_persistence)
                    .count();
                if stable < self.config.min_flock_size {
                    return None;
                }
                let reach = members
                    .iter()
                    .map(|t| nalgebra::distance(centroid, &t.last_bbox().centroid()))
                    .fold(0.0, f64::max);
                Some(reach + self.config.envelope_margin_px)
            })
            .collect();

        let member_ids: BTreeSet<TrackId> = class_flocks
            .iter()
            .flat_map(|(members, _)| members.iter().map(|t| t.track_id))
            .collect();

        for track in group {
            if member_ids.contains(&track.track_id) {
                continue;
            }
            let small = track.last_bbox().size() < self.config.min_member_bbox_size;
            let unstable = track.persistence() < self.config.stable_min_persistence;
            if !small && !unstable {
                continue;
            }

            // Nearest qualifying envelope wins; one flock per track.
            let centroid = track.last_bbox().centroid();
            let best = class_flocks
                .iter()
                .enumerate()
                .filter_map(|(i, (_, flock_centroid))| {
                    let envelope = envelopes[i]?;
                    let gap = nalgebra::distance(flock_centroid, &centroid);
                    (gap <= envelope).then_some((i, gap))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1));

            if let Some((i, _)) = best {
                debug!(
                    track_id = track.track_id,
                    label,
                    frame_index,
                    "unstable track absorbed into flock"
                );
                class_flocks[i].0.push(track);
            }
        }

        for (members, _) in class_flocks {
            // Final centroid includes absorbed members.
            let centroid = mean_centroid(&members);
            let flock = Flock {
                label: label.to_string(),
                member_track_ids: members.iter().map(|t| t.track_id).collect(),
                centroid,
                frame_index,
            };
            debug!(
                label,
                frame_index,
                members = flock.member_track_ids.len(),
                "flock detected"
            );
            flocks.push(flock);
        }
    }
}

fn mean_centroid(members: &[&Track]) -> Point2<f64> {
    let n = members.len() as f64;
    let (sx, sy) = members.iter().fold((0.0, 0.0), |(sx, sy), t| {
        let c = t.last_bbox().centroid();
        (sx + c.x, sy + c.y)
    });
    Point2::new(sx / n, sy / n)
}
