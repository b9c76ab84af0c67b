//! Meditation test session lifecycle.
//!
//! A session owns the capture resource for its whole life. Starting a
//! session opens the frame source; every exit path (stop, cancel, deadline,
//! error, drop) releases it exactly once through [`CaptureGuard`].
//!
//! Frames are pulled one at a time and fully reduced before the next pull,
//! so the accumulators never see concurrent access. A stop or cancel
//! request is honored before the next pull; no frame is processed after it,
//! including a frame that was already being waited on when it arrived.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::biometrics::evaluator::SessionSummary;
use crate::biometrics::landmarks::FrameObservation;
use crate::biometrics::reducer::{FrameReducer, MetricsSnapshot};
use crate::error::{Result, StillpointError};

/// Source of landmark frames, e.g. a camera feeding a pose model.
///
/// The source never ends on its own; the session decides when to stop.
pub trait FrameSource {
    /// Acquire the capture device.
    ///
    /// Failing here means the session never starts.
    fn open(&mut self) -> Result<()>;

    /// Pull the next frame, waiting at most `timeout` for it.
    ///
    /// `timeout` is the time left before the session deadline. Returns
    /// `Ok(None)` when nothing arrived in that window; implementations must
    /// not block longer than `timeout`.
    fn next_frame(&mut self, timeout: std::time::Duration) -> Result<Option<FrameObservation>>;

    /// Release the capture device.
    fn release(&mut self);
}

/// Wall clock used for elapsed time and the deadline.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Scoped ownership of an opened frame source.
pub struct CaptureGuard<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
    released: bool,
}

impl<'a, S: FrameSource + ?Sized> CaptureGuard<'a, S> {
    /// Open the source. Any failure is reported as
    /// [`StillpointError::CaptureUnavailable`].
    pub fn acquire(source: &'a mut S) -> Result<Self> {
        source.open().map_err(|err| match err {
            StillpointError::CaptureUnavailable { .. } => err,
            other => StillpointError::capture_unavailable(other.to_string()),
        })?;
        Ok(Self {
            source,
            released: false,
        })
    }

    fn next_frame(&mut self, timeout: std::time::Duration) -> Result<Option<FrameObservation>> {
        if self.released {
            return Err(StillpointError::invalid_state(
                "frame requested after capture was released",
            ));
        }
        self.source.next_frame(timeout)
    }

    /// Release the source; later calls do nothing.
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.source.release();
        }
    }

    /// Whether the source has been released.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl<S: FrameSource + ?Sized> Drop for CaptureGuard<'_, S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// Finish and evaluate what was collected.
    Stop,
    /// Discard the session.
    Cancel,
}

const SIGNAL_NONE: u8 = 0;
const SIGNAL_STOP: u8 = 1;
const SIGNAL_CANCEL: u8 = 2;

/// Cross-thread stop/cancel flag for [`MeditationSession::run`].
///
/// Cancel takes precedence over stop when both are requested.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicU8>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.fetch_max(SIGNAL_STOP, Ordering::SeqCst);
    }

    pub fn request_cancel(&self) {
        self.0.fetch_max(SIGNAL_CANCEL, Ordering::SeqCst);
    }

    /// The pending request, if any.
    pub fn requested(&self) -> Option<StopRequest> {
        match self.0.load(Ordering::SeqCst) {
            SIGNAL_STOP => Some(StopRequest::Stop),
            SIGNAL_CANCEL => Some(StopRequest::Cancel),
            _ => None,
        }
    }
}

/// How a finished session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The caller stopped it.
    Stopped,
    /// It reached the maximum duration.
    TimedOut,
}

/// A session finalized for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedSession {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: SessionOutcome,
    /// Seconds between start and the last processed frame.
    pub elapsed_seconds: f64,
    pub frames_processed: u64,
    /// Snapshots in emission order.
    pub timeline: Vec<MetricsSnapshot>,
    pub eye_closed_percent: f64,
    pub head_movement: f64,
    pub hand_movement: f64,
    pub hand_stability: f64,
}

impl FinishedSession {
    /// Session duration as seen by the evaluator: the time of the last
    /// snapshot, or 0 without snapshots.
    pub fn duration_seconds(&self) -> f64 {
        self.timeline.last().map(|s| s.t).unwrap_or(0.0)
    }

    /// Evaluator input.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            eye_closed_percent: self.eye_closed_percent,
            head_movement: self.head_movement,
            hand_movement: self.hand_movement,
            hand_stability: self.hand_stability,
            duration_seconds: self.duration_seconds(),
        }
    }
}

/// Result of [`MeditationSession::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    Finished(FinishedSession),
    Cancelled,
}

/// Result of a single [`MeditationSession::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// A frame was reduced; carries a snapshot when one was emitted.
    Frame(Option<MetricsSnapshot>),
    /// The source had no frame within the remaining time.
    Idle,
    /// The maximum duration has elapsed; finalize the session.
    DeadlineReached,
}

/// A pulled frame that has not been reduced yet.
enum Pulled {
    Frame(FrameObservation, DateTime<Utc>),
    Idle,
    DeadlineReached,
}

/// A running meditation test.
pub struct MeditationSession<'a, S: FrameSource + ?Sized, C: Clock> {
    capture: CaptureGuard<'a, S>,
    clock: C,
    started_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    elapsed_seconds: f64,
    reducer: FrameReducer,
    timeline: Vec<MetricsSnapshot>,
}

impl<'a, S: FrameSource + ?Sized, C: Clock> MeditationSession<'a, S, C> {
    /// Open the capture source and start the clock.
    ///
    /// If the source cannot open, no session and no accumulators exist.
    pub fn start(source: &'a mut S, clock: C, max_duration: Duration) -> Result<Self> {
        let capture = CaptureGuard::acquire(source)?;
        let started_at = clock.now();
        tracing::info!(max_minutes = max_duration.num_minutes(), "meditation session started");

        Ok(Self {
            capture,
            clock,
            started_at,
            deadline: started_at + max_duration,
            elapsed_seconds: 0.0,
            reducer: FrameReducer::new(),
            timeline: Vec::new(),
        })
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time at which the session ends on its own.
    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Seconds from start to the last processed frame.
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    /// Snapshots emitted so far.
    pub fn timeline(&self) -> &[MetricsSnapshot] {
        &self.timeline
    }

    /// Live accumulators.
    pub fn reducer(&self) -> &FrameReducer {
        &self.reducer
    }

    /// Pull and reduce one frame, unless the deadline has passed.
    ///
    /// A frame that arrives after the deadline is dropped unprocessed.
    pub fn step(&mut self) -> Result<Step> {
        Ok(match self.pull()? {
            Pulled::Frame(frame, now) => Step::Frame(self.reduce(&frame, now)),
            Pulled::Idle => Step::Idle,
            Pulled::DeadlineReached => Step::DeadlineReached,
        })
    }

    /// Wait for one frame, bounded by the time left before the deadline.
    fn pull(&mut self) -> Result<Pulled> {
        let now = self.clock.now();
        if now >= self.deadline {
            return Ok(Pulled::DeadlineReached);
        }

        let budget = (self.deadline - now).to_std().unwrap_or_default();
        let frame = self.capture.next_frame(budget)?;
        let now = self.clock.now();
        if now >= self.deadline {
            return Ok(Pulled::DeadlineReached);
        }

        Ok(match frame {
            Some(frame) => Pulled::Frame(frame, now),
            None => Pulled::Idle,
        })
    }

    fn reduce(&mut self, frame: &FrameObservation, now: DateTime<Utc>) -> Option<MetricsSnapshot> {
        self.elapsed_seconds = seconds_between(self.started_at, now);
        let snapshot = self.reducer.process(frame, self.elapsed_seconds);
        if let Some(snapshot) = snapshot {
            self.timeline.push(snapshot);
        }
        snapshot
    }

    /// Finalize at the caller's request.
    pub fn stop(self) -> FinishedSession {
        self.finish(SessionOutcome::Stopped)
    }

    /// Discard the session and release the capture source.
    pub fn cancel(mut self) {
        self.capture.release();
        tracing::info!(
            frames = self.reducer.processed_frames(),
            "meditation session cancelled"
        );
    }

    /// Pull frames until a stop or cancel request, or the deadline.
    pub fn run(mut self, signal: &StopSignal) -> Result<SessionEnd> {
        loop {
            if let Some(request) = signal.requested() {
                return Ok(self.end_on(request));
            }

            let (frame, now) = match self.pull()? {
                Pulled::Frame(frame, now) => (frame, now),
                Pulled::Idle => continue,
                Pulled::DeadlineReached => {
                    return Ok(SessionEnd::Finished(self.finish(SessionOutcome::TimedOut)))
                }
            };

            // A request raised while waiting on the source drops that frame.
            if let Some(request) = signal.requested() {
                return Ok(self.end_on(request));
            }
            self.reduce(&frame, now);
        }
    }

    fn end_on(self, request: StopRequest) -> SessionEnd {
        match request {
            StopRequest::Cancel => {
                self.cancel();
                SessionEnd::Cancelled
            }
            StopRequest::Stop => SessionEnd::Finished(self.stop()),
        }
    }

    fn finish(mut self, outcome: SessionOutcome) -> FinishedSession {
        self.capture.release();
        let ended_at = self.clock.now();

        if outcome == SessionOutcome::TimedOut {
            tracing::info!("meditation session reached its maximum duration");
        } else {
            tracing::info!(
                elapsed_seconds = self.elapsed_seconds,
                "meditation session stopped"
            );
        }

        FinishedSession {
            started_at: self.started_at,
            ended_at,
            outcome,
            elapsed_seconds: self.elapsed_seconds,
            frames_processed: self.reducer.processed_frames(),
            eye_closed_percent: self.reducer.eye_closed_percent(),
            head_movement: self.reducer.head_movement(),
            hand_movement: self.reducer.hand_movement(),
            hand_stability: self.reducer.hand_stability(),
            timeline: std::mem::take(&mut self.timeline),
        }
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::biometrics::landmarks::fixtures::face;
    use crate::biometrics::landmarks::Point;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-04-10T07:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn closed_eyes() -> FrameObservation {
        FrameObservation::empty().with_face(face(0.05, Point::new(0.5, 0.5)))
    }

    #[test]
    fn test_capture_unavailable_never_starts() {
        let mut source = ScriptedSource {
            fail_open: true,
            ..Default::default()
        };
        let clock = SteppingClock::new(t0(), Duration::milliseconds(33));
        let unavailable = matches!(
            MeditationSession::start(&mut source, &clock, Duration::minutes(60)),
            Err(StillpointError::CaptureUnavailable { .. })
        );

        assert!(unavailable);
        assert_eq!(source.opened, 0);
        assert_eq!(source.pulled, 0);
        assert_eq!(source.released, 0);
    }

    #[test]
    fn test_open_errors_become_capture_unavailable() {
        struct Broken;
        impl FrameSource for Broken {
            fn open(&mut self) -> Result<()> {
                Err(StillpointError::invalid_state("driver busy"))
            }
            fn next_frame(&mut self, _: std::time::Duration) -> Result<Option<FrameObservation>> {
                unreachable!()
            }
            fn release(&mut self) {
                unreachable!()
            }
        }

        let mut source = Broken;
        let result = MeditationSession::start(&mut source, SystemClock, Duration::minutes(1));
        assert!(matches!(result, Err(StillpointError::CaptureUnavailable { .. })));
    }

    #[test]
    fn test_stop_finalizes_and_releases_once() {
        let signal = StopSignal::new();
        let mut source = ScriptedSource::repeating(closed_eyes());
        source.stop_after = Some((60, signal.clone(), StopRequest::Stop));
        let clock = SteppingClock::new(t0(), Duration::milliseconds(17));

        let session = MeditationSession::start(&mut source, &clock, Duration::minutes(60)).unwrap();
        let end = session.run(&signal).unwrap();

        let finished = match end {
            SessionEnd::Finished(f) => f,
            SessionEnd::Cancelled => panic!("expected a finished session"),
        };
        assert_eq!(finished.outcome, SessionOutcome::Stopped);
        // The 60th frame was pulled after the request and is dropped.
        assert_eq!(finished.frames_processed, 59);
        assert_eq!(finished.timeline.len(), 1);
        assert_eq!(finished.eye_closed_percent, 100.0);
        assert!(finished.duration_seconds() > 0.0);
        assert_eq!(source.pulled, 60);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_cancel_discards_and_releases_once() {
        let signal = StopSignal::new();
        let mut source = ScriptedSource::repeating(closed_eyes());
        source.stop_after = Some((10, signal.clone(), StopRequest::Cancel));
        let clock = SteppingClock::new(t0(), Duration::milliseconds(17));

        let session = MeditationSession::start(&mut source, &clock, Duration::minutes(60)).unwrap();
        assert_eq!(session.run(&signal).unwrap(), SessionEnd::Cancelled);
        assert_eq!(source.pulled, 10);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_stop_during_pull_drops_that_frame() {
        let signal = StopSignal::new();
        let mut source = ScriptedSource::repeating(closed_eyes());
        source.stop_after = Some((1, signal.clone(), StopRequest::Stop));
        let clock = SteppingClock::new(t0(), Duration::milliseconds(17));

        let session = MeditationSession::start(&mut source, &clock, Duration::minutes(60)).unwrap();
        let finished = match session.run(&signal).unwrap() {
            SessionEnd::Finished(f) => f,
            SessionEnd::Cancelled => panic!("expected a finished session"),
        };

        assert_eq!(finished.frames_processed, 0);
        assert_eq!(finished.elapsed_seconds, 0.0);
        assert!(finished.timeline.is_empty());
        assert_eq!(source.pulled, 1);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_cancel_during_pull_drops_that_frame() {
        let signal = StopSignal::new();
        let mut source = ScriptedSource::repeating(closed_eyes());
        // Cancel arrives with the frame that would complete the first snapshot.
        source.stop_after = Some((30, signal.clone(), StopRequest::Cancel));
        let clock = SteppingClock::new(t0(), Duration::milliseconds(17));

        let session = MeditationSession::start(&mut source, &clock, Duration::minutes(60)).unwrap();
        assert_eq!(session.run(&signal).unwrap(), SessionEnd::Cancelled);
        assert_eq!(source.pulled, 30);
        assert_eq!(source.released, 1);
        assert_eq!(signal.requested(), Some(StopRequest::Cancel));
    }

    #[test]
    fn test_stalled_source_still_times_out() {
        let signal = StopSignal::new();
        let mut source = ScriptedSource {
            stall: true,
            ..Default::default()
        };
        let clock = SteppingClock::new(t0(), Duration::minutes(1));

        let session = MeditationSession::start(&mut source, &clock, Duration::minutes(60)).unwrap();
        let finished = match session.run(&signal).unwrap() {
            SessionEnd::Finished(f) => f,
            SessionEnd::Cancelled => panic!("deadline must finalize, not cancel"),
        };

        assert_eq!(finished.outcome, SessionOutcome::TimedOut);
        assert_eq!(finished.frames_processed, 0);
        assert_eq!(source.released, 1);
        assert!(!source.timeouts.is_empty());
        assert_eq!(source.timeouts[0], std::time::Duration::from_secs(59 * 60));
        assert!(source.timeouts.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_pull_waits_at_most_until_deadline() {
        let mut source = ScriptedSource::repeating(closed_eyes());
        // Reads: start (t0), pre-pull check (t0+10m), post-pull (t0+20m).
        let clock = SteppingClock::new(t0(), Duration::minutes(10));
        let mut session =
            MeditationSession::start(&mut source, &clock, Duration::minutes(60)).unwrap();

        assert_eq!(session.step().unwrap(), Step::Frame(None));
        session.cancel();
        assert_eq!(source.timeouts, vec![std::time::Duration::from_secs(50 * 60)]);
    }

    #[test]
    fn test_cancel_wins_over_stop() {
        let signal = StopSignal::new();
        signal.request_stop();
        signal.request_cancel();
        assert_eq!(signal.requested(), Some(StopRequest::Cancel));
        signal.request_stop();
        assert_eq!(signal.requested(), Some(StopRequest::Cancel));
    }

    #[test]
    fn test_no_frame_after_stop_request() {
        let signal = StopSignal::new();
        signal.request_stop();
        let mut source = ScriptedSource::repeating(closed_eyes());
        let clock = SteppingClock::new(t0(), Duration::milliseconds(17));

        let session = MeditationSession::start(&mut source, &clock, Duration::minutes(60)).unwrap();
        let end = session.run(&signal).unwrap();
        assert!(matches!(end, SessionEnd::Finished(ref f) if f.frames_processed == 0));
        assert_eq!(source.pulled, 0);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_deadline_fires_without_caller_action() {
        let signal = StopSignal::new();
        let mut source = ScriptedSource::repeating(closed_eyes());
        // One clock read per second: the 60 minute limit passes after a
        // couple of thousand frames.
        let clock = SteppingClock::new(t0(), Duration::seconds(1));

        let session = MeditationSession::start(&mut source, &clock, Duration::minutes(60)).unwrap();
        let finished = match session.run(&signal).unwrap() {
            SessionEnd::Finished(f) => f,
            SessionEnd::Cancelled => panic!("deadline must finalize, not cancel"),
        };

        assert_eq!(finished.outcome, SessionOutcome::TimedOut);
        assert!(finished.elapsed_seconds < 3600.0);
        assert!(finished.frames_processed > 0);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_frame_after_deadline_is_dropped() {
        let mut source = ScriptedSource::repeating(closed_eyes());
        // Reads: start (t0), pre-pull check (t0+30m), post-pull (t0+60m).
        let clock = SteppingClock::new(t0(), Duration::minutes(30));
        let mut session =
            MeditationSession::start(&mut source, &clock, Duration::minutes(60)).unwrap();

        assert_eq!(session.step().unwrap(), Step::DeadlineReached);
        assert_eq!(session.reducer().processed_frames(), 0);
        let finished = session.stop();
        assert_eq!(finished.frames_processed, 0);
        assert_eq!(source.pulled, 1);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_source_error_still_releases() {
        let signal = StopSignal::new();
        let mut source = ScriptedSource::repeating(closed_eyes());
        source.fail_after = Some(5);
        let clock = SteppingClock::new(t0(), Duration::milliseconds(17));

        let session = MeditationSession::start(&mut source, &clock, Duration::minutes(60)).unwrap();
        assert!(session.run(&signal).is_err());
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_dropping_session_releases() {
        let mut source = ScriptedSource::repeating(closed_eyes());
        {
            let mut session =
                MeditationSession::start(&mut source, SystemClock, Duration::minutes(60)).unwrap();
            session.step().unwrap();
        }
        assert_eq!(source.opened, 1);
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_step_reports_snapshots() {
        let mut source = ScriptedSource::repeating(closed_eyes());
        let clock = SteppingClock::new(t0(), Duration::milliseconds(10));
        let mut session =
            MeditationSession::start(&mut source, &clock, Duration::minutes(60)).unwrap();

        let mut emitted = 0;
        for _ in 0..30 {
            if let Step::Frame(Some(_)) = session.step().unwrap() {
                emitted += 1;
            }
        }
        assert_eq!(emitted, 1);
        assert_eq!(session.timeline().len(), 1);
        assert!(session.elapsed_seconds() > 0.0);
        session.cancel();
        assert_eq!(source.released, 1);
    }

    #[test]
    fn test_summary_uses_last_snapshot_time() {
        let finished = FinishedSession {
            started_at: t0(),
            ended_at: t0(),
            outcome: SessionOutcome::Stopped,
            elapsed_seconds: 12.0,
            frames_processed: 10,
            timeline: Vec::new(),
            eye_closed_percent: 50.0,
            head_movement: 0.0,
            hand_movement: 0.0,
            hand_stability: 1.0,
        };
        assert_eq!(finished.duration_seconds(), 0.0);
        assert_eq!(finished.summary().duration_seconds, 0.0);
        assert_eq!(finished.summary().eye_closed_percent, 50.0);
    }
}
