//! # Birdtrack - Bird Tracking & Analytics Engine
//!
//! Converts per-frame object detections produced by an external bird detector
//! into persistent tracked identities, per-track distance estimates,
//! persistence metrics, flock groupings and whole-video aggregate statistics.
//!
//! The detector itself, video decoding, storage and transport are external
//! collaborators; this crate owns everything between "here is a list of boxes
//! for frame N" and "here is the overlay payload / final report".
//!
//! ## Example
//!
//! ```rust,ignore
//! use birdtrack::{EngineConfig, SessionRegistry, CancelToken};
//!
//! let registry = SessionRegistry::new(EngineConfig::default()).unwrap();
//! registry.open("gulls.mp4", Box::new(my_frame_source));
//!
//! // Interactive stepping
//! let frame = registry.process_frame("gulls.mp4", 0, false).unwrap();
//!
//! // Whole-video analysis
//! let cancel = CancelToken::new();
//! let report = registry.analyze_video("gulls.mp4", 0, &cancel, |_| {}).unwrap();
//! ```

pub mod detection;
pub mod track;
pub mod matching;
pub mod tracker;
pub mod distance;
pub mod flock;
pub mod analyzer;
pub mod session;
pub mod background;

// Re-exports for convenience
pub use detection::{BoundingBox, Detection};
pub use track::{Track, TrackId, TrackState};
pub use matching::MatchMetric;
pub use tracker::{Tracker, TrackerConfig};
pub use distance::{CalibrationConfig, DistanceEstimator};
pub use flock::{Flock, FlockConfig, FlockDetector};
pub use analyzer::{
    AnalysisReport, CancelToken, EngineConfig, FrameResult, FrameSource, Progress, SessionState,
    VideoAnalyzer,
};
pub use session::SessionRegistry;
pub use background::{spawn_analysis, AnalysisHandle};

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur in the birdtrack engine
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Invalid detection: {0}")]
        InvalidDetection(String),

        #[error("Frame index {frame_index} out of range [0, {total_frames})")]
        OutOfRange {
            frame_index: usize,
            total_frames: usize,
        },

        #[error("Unknown video: {0}")]
        NotFound(String),

        #[error("Frame ingest failed: {0}")]
        IngestFailure(String),

        #[error("Background analysis task failed: {0}")]
        Background(String),
    }

    /// Result type for birdtrack operations
    pub type Result<T> = std::result::Result<T, Error>;
}
