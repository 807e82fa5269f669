//! Progress reporting for fetch pipelines
//!
//! Fetchers report coarse 0-100 progress through a shared callback. The
//! mapping is fixed: start is ~3%, the first page or volume lands around 10%,
//! completion is 100%, and a cancelled fetch resets its indicator to 0.

use crate::record::SourceKind;
use std::sync::Arc;

/// Progress callback handed to every fetch job.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Events emitted while a pipeline runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Fetch kicked off; indicator moves off zero.
    FetchStarted { source: SourceKind },
    /// Coarse progress while pages or chunks arrive.
    FetchProgress { source: SourceKind, percent: u8 },
    /// Fetch finished; never emitted for a cancelled job.
    FetchCompleted { source: SourceKind },
    /// Fetch stopped on request; the indicator resets.
    FetchCancelled { source: SourceKind },
    /// Per-source table replaced in the store.
    RecordsStored { source: SourceKind, count: usize },
    /// Total view rebuilt after a source refresh.
    TotalRebuilt { count: usize },
}

impl ProgressEvent {
    /// Progress-bar value for this event, if it carries one.
    pub fn percent(&self) -> Option<u8> {
        match self {
            ProgressEvent::FetchStarted { .. } => Some(3),
            ProgressEvent::FetchProgress { percent, .. } => Some(*percent),
            ProgressEvent::FetchCompleted { .. } => Some(100),
            ProgressEvent::FetchCancelled { .. } => Some(0),
            _ => None,
        }
    }

    /// The source this event belongs to, if any.
    pub fn source(&self) -> Option<SourceKind> {
        match self {
            ProgressEvent::FetchStarted { source }
            | ProgressEvent::FetchProgress { source, .. }
            | ProgressEvent::FetchCompleted { source }
            | ProgressEvent::FetchCancelled { source }
            | ProgressEvent::RecordsStored { source, .. } => Some(*source),
            ProgressEvent::TotalRebuilt { .. } => None,
        }
    }
}

/// Callback that discards every event.
pub fn noop_progress() -> ProgressCallback {
    Arc::new(|_| {})
}
