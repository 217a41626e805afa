//! Whole-video analysis as a cancellable background task.
//!
//! Interactive stepping is a short synchronous call; a full-video run is
//! not. This module moves [`SessionRegistry::analyze_video`] onto the tokio
//! blocking pool, publishing incremental progress on a watch channel and
//! exposing cooperative cancellation.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::analyzer::{AnalysisReport, CancelToken, Progress};
use crate::session::SessionRegistry;
use crate::{Error, Result};

/// Handle to a running background analysis.
pub struct AnalysisHandle {
    cancel: CancelToken,
    progress: watch::Receiver<Progress>,
    task: JoinHandle<Result<AnalysisReport>>,
}

impl AnalysisHandle {
    /// Watch incremental progress; updated after every committed frame.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// Request cancellation. The run stops after the in-flight frame
    /// completes; the eventual report is consistent for everything
    /// processed and carries `completed = false`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish and take its report.
    pub async fn join(self) -> Result<AnalysisReport> {
        self.task
            .await
            .map_err(|e| Error::Background(e.to_string()))?
    }
}

/// Start a whole-video analysis on the blocking pool.
///
/// Must be called from within a tokio runtime. The session lock is held by
/// the worker for the duration of the run, so concurrent interactive calls
/// for the same video id queue behind it; other sessions are unaffected.
pub fn spawn_analysis(
    registry: Arc<SessionRegistry>,
    video_id: impl Into<String>,
    start_frame: usize,
) -> AnalysisHandle {
    let video_id = video_id.into();
    let cancel = CancelToken::new();
    let (progress_tx, progress_rx) = watch::channel(Progress {
        frames_processed: 0,
        total_frames: 0,
    });

    let worker_cancel = cancel.clone();
    let task = tokio::task::spawn_blocking(move || {
        registry.analyze_video(&video_id, start_frame, &worker_cancel, |p| {
            // Receivers may be long gone; progress is best-effort.
            let _ = progress_tx.send(p);
        })
    });

    AnalysisHandle {
        cancel,
        progress: progress_rx,
        task,
    }
}
