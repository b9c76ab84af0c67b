//! Meditation test: landmark reduction, session lifecycle and evaluation.
//!
//! A session pulls [`FrameObservation`]s from a [`FrameSource`], reduces
//! them with a [`FrameReducer`], and is judged by [`evaluate`]. A passing
//! verdict is written to the progress store with [`apply_verdict`].

pub mod evaluator;
pub mod landmarks;
pub mod reducer;
pub mod session;

pub use evaluator::{
    apply_verdict, evaluate, threshold_failures, PassPolicy, SessionSummary, TestThresholds,
    TestVerdict, ThresholdFailure,
};
pub use landmarks::{eye_aspect_ratio, FrameObservation, Point};
pub use reducer::{FrameReducer, MetricsSnapshot, EAR_CLOSED_THRESHOLD, SNAPSHOT_INTERVAL_FRAMES};
pub use session::{
    CaptureGuard, Clock, FinishedSession, FrameSource, MeditationSession, SessionEnd,
    SessionOutcome, Step, StopRequest, StopSignal, SystemClock,
};
