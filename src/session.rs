//! Per-video session registry and caller-facing operations.
//!
//! One video session owns exactly one [`SessionState`]; sessions are fully
//! independent and keyed by a caller-chosen video id. The transport layer
//! (HTTP, websockets, CLI) decides how to drive these operations; nothing
//! here knows about requests or files.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::analyzer::{
    AnalysisReport, CancelToken, EngineConfig, FrameResult, FrameSource, Progress, SessionState,
    VideoAnalyzer,
};
use crate::{Error, Result};

/// One registered video: its tracking state plus its frame source.
struct Session {
    state: SessionState,
    source: Box<dyn FrameSource>,
}

/// Registry of independent video sessions.
///
/// The registry map is locked only for lookup; each session has its own
/// lock, so a long-running analysis of one video never blocks stepping
/// through another. Callers are expected to serialize calls for a single
/// video id; the per-session mutex enforces that at the boundary.
pub struct SessionRegistry {
    analyzer: VideoAnalyzer,
    config: EngineConfig,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self {
            analyzer: VideoAnalyzer::new(&config)?,
            config,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Register a video with its frame source, creating a fresh session.
    /// Re-opening an existing id replaces its session wholesale.
    pub fn open(&self, video_id: impl Into<String>, source: Box<dyn FrameSource>) -> Result<()> {
        let video_id = video_id.into();
        let session = Session {
            state: SessionState::new(&self.config)?,
            source,
        };
        info!(video_id = %video_id, "session opened");
        self.sessions
            .lock()
            .insert(video_id, Arc::new(Mutex::new(session)));
        Ok(())
    }

    fn session(&self, video_id: &str) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .lock()
            .get(video_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(video_id.to_string()))
    }

    /// Whether a session exists for this id.
    pub fn contains(&self, video_id: &str) -> bool {
        self.sessions.lock().contains_key(video_id)
    }

    /// Total frame count of a registered video.
    pub fn total_frames(&self, video_id: &str) -> Result<usize> {
        let session = self.session(video_id)?;
        let guard = session.lock();
        Ok(guard.source.total_frames())
    }

    /// Process a single frame interactively.
    ///
    /// With `reset_tracker` set, the session state is cleared before this
    /// frame's detections are processed. Fails with [`Error::OutOfRange`]
    /// when `frame_index` is not in `[0, total_frames)` and
    /// [`Error::NotFound`] for unknown video ids; neither creates or
    /// mutates state.
    pub fn process_frame(
        &self,
        video_id: &str,
        frame_index: usize,
        reset_tracker: bool,
    ) -> Result<FrameResult> {
        let session = self.session(video_id)?;
        let mut guard = session.lock();
        let Session { state, source } = &mut *guard;
        self.analyzer
            .process_one(state, source.as_ref(), frame_index, reset_tracker)
    }

    /// Analyze a whole video starting at `start_frame`.
    ///
    /// Long-running: holds the session lock for the duration, checks
    /// `cancel` between frames and reports progress after each committed
    /// frame. See [`crate::background::spawn_analysis`] for running this
    /// off the caller's thread.
    pub fn analyze_video(
        &self,
        video_id: &str,
        start_frame: usize,
        cancel: &CancelToken,
        progress: impl FnMut(Progress),
    ) -> Result<AnalysisReport> {
        let session = self.session(video_id)?;
        let mut guard = session.lock();
        let Session { state, source } = &mut *guard;
        self.analyzer
            .run(state, source.as_ref(), start_frame, cancel, progress)
    }

    /// Clear one session's tracking state and aggregates. Other sessions
    /// are unaffected.
    pub fn reset_session(&self, video_id: &str) -> Result<()> {
        let session = self.session(video_id)?;
        session.lock().state.reset();
        info!(video_id, "session reset");
        Ok(())
    }

    /// Drop a session entirely.
    pub fn close(&self, video_id: &str) -> Result<()> {
        self.sessions
            .lock()
            .remove(video_id)
            .map(|_| info!(video_id, "session closed"))
            .ok_or_else(|| Error::NotFound(video_id.to_string()))
    }
}
