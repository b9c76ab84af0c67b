//! Stillpoint - progression and meditation test engine for a guided course
//!
//! Stillpoint decides which levels and days of a meditation course a
//! learner may open, enforces daily access windows and the gap between
//! days, and runs the camera-based meditation test that gates advancement.
//! It is a library for a UI layer; it renders nothing itself.

pub mod biometrics;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;

pub use biometrics::{
    apply_verdict, evaluate, FinishedSession, FrameObservation, FrameReducer, FrameSource,
    MeditationSession, MetricsSnapshot, PassPolicy, SessionEnd, StopSignal, TestThresholds,
    TestVerdict,
};
pub use config::Config;
pub use core::{
    AccessPolicy, AccessWindow, CourseStructure, DaySlot, DayState, LevelState, LockReason,
    ProgressEntry, ProgressKey, ProgressStore, Progression,
};
pub use error::{FailOpen, Result, StillpointError};
pub use storage::{FileProgressRemote, MemoryProgressRemote, ProgressRemote, ProgressSync};
