// ============================================================================
// STROKES – per-action job strategies and the scheduler that runs them
// ============================================================================

mod job;
mod scheduler;
mod strategy;

use std::fmt;

use uuid::Uuid;

use crate::device::DeviceSnapshot;
use crate::error::PaintError;
use crate::geometry::Rect;

pub use job::{JobContext, JobFn, JobSpec};
pub use scheduler::StrokeScheduler;
pub use strategy::StrokeStrategy;

/// Unique stroke identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StrokeId(Uuid);

impl StrokeId {
    pub(crate) fn new() -> Self {
        StrokeId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for StrokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 hex digits are enough to tell strokes apart in logs.
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

/// Caller-side handle returned by `begin_stroke`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StrokeHandle {
    id: StrokeId,
}

impl StrokeHandle {
    pub(crate) fn new(id: StrokeId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> StrokeId {
        self.id
    }
}

/// Lifecycle of one stroke.
///
/// `Created → Initializing → Active → Finishing → Done`, or
/// `Active → Cancelling → Done`. Cancel may also interrupt `Created` and
/// `Initializing`. A stroke in `Finishing` ignores cancel requests; only a
/// failed finish job moves it to `Cancelling`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeState {
    Created,
    Initializing,
    Active,
    Finishing,
    Cancelling,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeEnd {
    Finished,
    Cancelled,
}

/// Final report of a stroke, handed out once by `wait`.
#[derive(Debug)]
pub struct StrokeOutcome {
    pub id: StrokeId,
    pub end: StrokeEnd,
    /// Dab-phase jobs (brush dabs and submitted jobs) that completed.
    pub dabs_applied: usize,
    /// Region of the target device touched by the stroke, if any.
    pub dirty: Option<Rect>,
    /// First job error, if a job failed.
    pub error: Option<PaintError>,
    /// Target device when the stroke began.
    pub before: DeviceSnapshot,
    /// Target device when the stroke reached `Done`.
    pub after: DeviceSnapshot,
}

impl StrokeOutcome {
    pub fn is_finished(&self) -> bool {
        self.end == StrokeEnd::Finished
    }
}
