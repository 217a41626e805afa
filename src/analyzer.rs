//! Frame-by-frame analysis driver and whole-video aggregation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detection::{BoundingBox, Detection};
use crate::distance::{CalibrationConfig, DistanceEstimator};
use crate::flock::{Flock, FlockConfig, FlockDetector};
use crate::track::TrackId;
use crate::tracker::{Tracker, TrackerConfig};
use crate::{Error, Result};

/// External detector collaborator: detections for a given frame of one
/// video.
///
/// Treated as a pure function of the frame index; an empty result is fine.
/// Implementations surface decode/inference failures as
/// [`Error::IngestFailure`].
pub trait FrameSource: Send {
    /// Number of frames in the video. Valid frame indices are
    /// `[0, total_frames())`.
    fn total_frames(&self) -> usize;

    /// Detections for one frame.
    fn detections(&self, frame_index: usize) -> Result<Vec<Detection>>;
}

/// Cooperative cancellation flag for long-running analysis.
///
/// Cloning shares the flag; cancelling stops the run after the in-flight
/// frame completes, never mid-frame.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Incremental progress of a whole-video run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub frames_processed: usize,
    pub total_frames: usize,
}

/// Full engine configuration: one section per tunable component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub tracker: TrackerConfig,
    pub calibration: CalibrationConfig,
    pub flock: FlockConfig,
}

/// One tracked detection in a frame, overlay-ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedDetection {
    pub track_id: TrackId,
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
    /// Smoothed distance in meters; `None` when unknown.
    pub distance_m: Option<f64>,
    /// Consecutive matched frames for this track.
    pub persistence: u32,
}

/// Everything produced for a single processed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_index: usize,
    pub detections: Vec<TrackedDetection>,
    pub flocks: Vec<Flock>,
}

/// The track with the most matched frames for one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSpan {
    pub track_id: TrackId,
    pub frames: u64,
}

/// Aggregate statistics for one class over a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassReport {
    /// Number of distinct track ids ever seen for this class.
    pub total_unique_birds: usize,
    /// Track with the maximum matched-frame count; ties go to the lowest
    /// id.
    pub longest_tracking: TrackSpan,
}

/// Whole-video aggregate, keyed by class label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub per_class: BTreeMap<String, ClassReport>,
    /// Frames folded into the aggregate by this run.
    pub frames_processed: usize,
    /// False when the run was cancelled before reaching the final frame.
    pub completed: bool,
}

/// Running per-class aggregate, committed one whole frame at a time.
#[derive(Debug, Clone, Default)]
struct ClassAggregate {
    track_ids: BTreeSet<TrackId>,
    matched_frames: BTreeMap<TrackId, u64>,
}

impl ClassAggregate {
    fn record(&mut self, track_id: TrackId) {
        self.track_ids.insert(track_id);
        *self.matched_frames.entry(track_id).or_insert(0) += 1;
    }

    fn report(&self) -> ClassReport {
        // BTreeMap iterates in ascending id order, so strict `>` keeps the
        // lowest id on ties.
        let mut longest = TrackSpan {
            track_id: 0,
            frames: 0,
        };
        for (&track_id, &frames) in &self.matched_frames {
            if frames > longest.frames {
                longest = TrackSpan { track_id, frames };
            }
        }

        ClassReport {
            total_unique_birds: self.track_ids.len(),
            longest_tracking: longest,
        }
    }
}

/// All mutable state for one video session: the tracker and the running
/// aggregates. Owned explicitly per session and threaded through every
/// call; there is no process-wide tracking state.
#[derive(Debug)]
pub struct SessionState {
    pub tracker: Tracker,
    aggregate: BTreeMap<String, ClassAggregate>,
}

impl SessionState {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            tracker: Tracker::new(config.tracker.clone())?,
            aggregate: BTreeMap::new(),
        })
    }

    /// Destroy all tracks, restart id allocation and drop the aggregates.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.aggregate.clear();
    }

    /// Snapshot the aggregate accumulated so far.
    pub fn report(&self, frames_processed: usize, completed: bool) -> AnalysisReport {
        AnalysisReport {
            per_class: self
                .aggregate
                .iter()
                .map(|(label, agg)| (label.clone(), agg.report()))
                .collect(),
            frames_processed,
            completed,
        }
    }
}

/// Drives tracking, distance estimation and flock detection over frames,
/// folding results into a session's aggregate.
///
/// The analyzer itself is immutable and shared; all mutation happens on the
/// [`SessionState`] passed into each call.
#[derive(Debug, Clone)]
pub struct VideoAnalyzer {
    estimator: DistanceEstimator,
    flock_detector: FlockDetector,
}

impl VideoAnalyzer {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            estimator: DistanceEstimator::new(config.calibration.clone())?,
            flock_detector: FlockDetector::new(config.flock.clone())?,
        })
    }

    /// Process a single frame: ingest detections, update tracks, refresh
    /// distance estimates, detect flocks, and commit the frame to the
    /// session aggregate.
    ///
    /// With `reset` set, the session state is cleared before this frame's
    /// detections are processed, so nothing from the previous state leaks
    /// through. Errors leave the session state untouched.
    pub fn process_one(
        &self,
        state: &mut SessionState,
        source: &dyn FrameSource,
        frame_index: usize,
        reset: bool,
    ) -> Result<FrameResult> {
        let total_frames = source.total_frames();
        if frame_index >= total_frames {
            return Err(Error::OutOfRange {
                frame_index,
                total_frames,
            });
        }

        // Ingest before mutating anything, so a failed frame commits nothing.
        let detections = source.detections(frame_index)?;

        if reset {
            state.reset();
        }

        let assignments = state.tracker.update(frame_index, detections);

        for (track_id, _) in &assignments {
            if let Some(track) = state.tracker.track_mut(*track_id) {
                self.estimator.observe(track);
            }
        }

        let flocks = self
            .flock_detector
            .evaluate(frame_index, state.tracker.active_tracks());

        let tracked: Vec<TrackedDetection> = assignments
            .iter()
            .map(|(track_id, det)| {
                let track = state.tracker.track(*track_id);
                TrackedDetection {
                    track_id: *track_id,
                    label: det.label.clone(),
                    confidence: det.confidence,
                    bbox: det.bbox,
                    distance_m: track.and_then(|t| self.estimator.estimate(t)),
                    persistence: track.map(|t| t.persistence()).unwrap_or(0),
                }
            })
            .collect();

        // Commit to the aggregate last; the frame is now all-or-nothing.
        for (track_id, det) in &assignments {
            state
                .aggregate
                .entry(det.label.clone())
                .or_default()
                .record(*track_id);
        }

        debug!(
            frame_index,
            detections = tracked.len(),
            flocks = flocks.len(),
            "frame processed"
        );

        Ok(FrameResult {
            frame_index,
            detections: tracked,
            flocks,
        })
    }

    /// Run analysis from `start_frame` to the end of the video.
    ///
    /// Checks the cancel token between frames; a cancelled run stops
    /// cleanly after the in-flight frame and reports `completed = false`
    /// with a consistent aggregate for everything processed so far.
    /// Progress is reported after every committed frame.
    pub fn run(
        &self,
        state: &mut SessionState,
        source: &dyn FrameSource,
        start_frame: usize,
        cancel: &CancelToken,
        mut progress: impl FnMut(Progress),
    ) -> Result<AnalysisReport> {
        let total_frames = source.total_frames();
        if start_frame >= total_frames {
            return Err(Error::OutOfRange {
                frame_index: start_frame,
                total_frames,
            });
        }

        info!(start_frame, total_frames, "video analysis started");

        let mut frames_processed = 0;
        let mut completed = true;

        for frame_index in start_frame..total_frames {
            if cancel.is_cancelled() {
                info!(frame_index, frames_processed, "video analysis cancelled");
                completed = false;
                break;
            }

            self.process_one(state, source, frame_index, false)?;
            frames_processed += 1;
            progress(Progress {
                frames_processed,
                total_frames,
            });
        }

        if completed {
            info!(frames_processed, "video analysis finished");
        }

        Ok(state.report(frames_processed, completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory frame source scripted per frame.
    struct ScriptedSource {
        frames: Vec<Vec<Detection>>,
        fail_at: Option<usize>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Vec<Detection>>) -> Self {
            Self {
                frames,
                fail_at: None,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn total_frames(&self) -> usize {
            self.frames.len()
        }

        fn detections(&self, frame_index: usize) -> Result<Vec<Detection>> {
            if self.fail_at == Some(frame_index) {
                return Err(Error::IngestFailure(format!(
                    "decode error at frame {}",
                    frame_index
                )));
            }
            Ok(self.frames[frame_index].clone())
        }
    }

    fn det(label: &str, x: f64, frame: usize) -> Detection {
        Detection::new(label, BoundingBox::new(x, 0.0, 42.0, 42.0), 0.9, frame).unwrap()
    }

    fn engine() -> (VideoAnalyzer, SessionState) {
        let config = EngineConfig::default();
        (
            VideoAnalyzer::new(&config).unwrap(),
            SessionState::new(&config).unwrap(),
        )
    }

    // ===== process_one =====

    #[test]
    fn test_out_of_range_frame_rejected_without_mutation() {
        let (analyzer, mut state) = engine();
        let source = ScriptedSource::new(vec![vec![det("seagull", 0.0, 0)]]);

        let err = analyzer.process_one(&mut state, &source, 5, false);
        assert!(matches!(
            err,
            Err(Error::OutOfRange {
                frame_index: 5,
                total_frames: 1
            })
        ));
        assert!(state.tracker.active_tracks().is_empty());
        assert!(state.report(0, true).per_class.is_empty());
    }

    #[test]
    fn test_frame_result_carries_distance_and_persistence() {
        let (analyzer, mut state) = engine();
        let source = ScriptedSource::new(vec![
            vec![det("seagull", 0.0, 0)],
            vec![det("seagull", 2.0, 1)],
        ]);

        analyzer.process_one(&mut state, &source, 0, false).unwrap();
        let result = analyzer.process_one(&mut state, &source, 1, false).unwrap();

        assert_eq!(result.detections.len(), 1);
        let d = &result.detections[0];
        assert_eq!(d.track_id, 0);
        assert_eq!(d.persistence, 2);
        // 42px seagull box sits at the calibration distance
        assert!((d.distance_m.unwrap() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_flag_clears_state_before_processing() {
        let (analyzer, mut state) = engine();
        let source = ScriptedSource::new(vec![
            vec![det("seagull", 0.0, 0), det("seagull", 300.0, 0)],
            vec![det("seagull", 0.0, 1)],
        ]);

        analyzer.process_one(&mut state, &source, 0, false).unwrap();
        assert_eq!(state.tracker.active_tracks().len(), 2);

        let result = analyzer.process_one(&mut state, &source, 1, true).unwrap();
        // Fresh id allocation: the surviving detection restarts at id 0
        assert_eq!(result.detections[0].track_id, 0);
        assert_eq!(state.tracker.active_tracks().len(), 1);
        // Previous frame's aggregate is gone too
        let report = state.report(1, true);
        assert_eq!(report.per_class["seagull"].total_unique_birds, 1);
    }

    // ===== run / aggregation =====

    #[test]
    fn test_single_persistent_track_aggregate() {
        let (analyzer, mut state) = engine();
        let frames = (0..10).map(|f| vec![det("gull", 0.0, f)]).collect();
        let source = ScriptedSource::new(frames);

        let report = analyzer
            .run(&mut state, &source, 0, &CancelToken::new(), |_| {})
            .unwrap();

        assert!(report.completed);
        assert_eq!(report.frames_processed, 10);
        let gull = &report.per_class["gull"];
        assert_eq!(gull.total_unique_birds, 1);
        assert_eq!(gull.longest_tracking, TrackSpan { track_id: 0, frames: 10 });
    }

    #[test]
    fn test_longest_tracking_tie_goes_to_lowest_id() {
        let (analyzer, mut state) = engine();
        // Two birds, both present in every frame: equal counts
        let frames = (0..4)
            .map(|f| vec![det("gull", 0.0, f), det("gull", 500.0, f)])
            .collect();
        let source = ScriptedSource::new(frames);

        let report = analyzer
            .run(&mut state, &source, 0, &CancelToken::new(), |_| {})
            .unwrap();

        let gull = &report.per_class["gull"];
        assert_eq!(gull.total_unique_birds, 2);
        assert_eq!(gull.longest_tracking.track_id, 0);
        assert_eq!(gull.longest_tracking.frames, 4);
    }

    #[test]
    fn test_run_from_start_offset() {
        let (analyzer, mut state) = engine();
        let frames = (0..6).map(|f| vec![det("gull", 0.0, f)]).collect();
        let source = ScriptedSource::new(frames);

        let report = analyzer
            .run(&mut state, &source, 4, &CancelToken::new(), |_| {})
            .unwrap();
        assert_eq!(report.frames_processed, 2);
        assert_eq!(report.per_class["gull"].longest_tracking.frames, 2);
    }

    #[test]
    fn test_run_rejects_out_of_range_start() {
        let (analyzer, mut state) = engine();
        let source = ScriptedSource::new(vec![vec![]]);
        assert!(matches!(
            analyzer.run(&mut state, &source, 1, &CancelToken::new(), |_| {}),
            Err(Error::OutOfRange { .. })
        ));
    }

    // ===== Cancellation =====

    #[test]
    fn test_cancellation_leaves_consistent_partial_aggregate() {
        let (analyzer, mut state) = engine();
        let frames = (0..100).map(|f| vec![det("gull", 0.0, f)]).collect();
        let source = ScriptedSource::new(frames);

        let cancel = CancelToken::new();
        let stop_after = 7;
        let report = analyzer
            .run(&mut state, &source, 0, &cancel, |p| {
                if p.frames_processed == stop_after {
                    cancel.cancel();
                }
            })
            .unwrap();

        assert!(!report.completed);
        assert_eq!(report.frames_processed, stop_after);
        // The aggregate matches exactly the frames that were committed
        assert_eq!(
            report.per_class["gull"].longest_tracking.frames,
            stop_after as u64
        );
    }

    #[test]
    fn test_progress_reported_per_frame() {
        let (analyzer, mut state) = engine();
        let frames = (0..5).map(|f| vec![det("gull", 0.0, f)]).collect();
        let source = ScriptedSource::new(frames);

        let mut seen = Vec::new();
        analyzer
            .run(&mut state, &source, 0, &CancelToken::new(), |p| {
                seen.push(p.frames_processed)
            })
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    // ===== Ingest failure =====

    #[test]
    fn test_ingest_failure_aborts_preserving_prior_frames() {
        let (analyzer, mut state) = engine();
        let frames = (0..10).map(|f| vec![det("gull", 0.0, f)]).collect();
        let mut source = ScriptedSource::new(frames);
        source.fail_at = Some(3);

        let err = analyzer.run(&mut state, &source, 0, &CancelToken::new(), |_| {});
        assert!(matches!(err, Err(Error::IngestFailure(_))));

        // Frames 0..3 committed, the failing frame contributed nothing
        let report = state.report(3, false);
        assert_eq!(report.per_class["gull"].longest_tracking.frames, 3);
    }
}
