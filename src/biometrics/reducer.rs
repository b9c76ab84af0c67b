//! Per-frame reduction of landmark observations into session metrics.
//!
//! Frames are reduced strictly in arrival order. Accumulators only grow:
//! a frame without a face or without hands contributes nothing and leaves
//! every accumulator and every "previous position" untouched.

use serde::{Deserialize, Serialize};

use crate::biometrics::landmarks::{
    eye_aspect_ratio, FrameObservation, Point, LEFT_EYE, NOSE_TIP, RIGHT_EYE,
};

/// Both eyes below this aspect ratio count as closed.
pub const EAR_CLOSED_THRESHOLD: f64 = 0.18;

/// A snapshot is emitted every this many processed frames (about once per
/// second at 30 fps; this is a frame count, not a timer).
pub const SNAPSHOT_INTERVAL_FRAMES: u64 = 30;

/// Stability score for a cumulative hand displacement.
pub fn hand_stability(hand_movement: f64) -> f64 {
    1.0 / (1.0 + hand_movement)
}

/// Session metrics at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Elapsed session seconds.
    pub t: f64,
    pub eye_closed_pct: f64,
    pub head_move: f64,
    pub hand_move: f64,
    pub hand_stability: f64,
}

/// Running accumulators for one session.
#[derive(Debug, Clone, Default)]
pub struct FrameReducer {
    processed_frames: u64,
    face_frames: u64,
    closed_frames: u64,
    head_movement: f64,
    hand_movement: f64,
    previous_nose: Option<Point>,
    previous_hands: Option<Vec<Point>>,
    last_elapsed: f64,
}

impl FrameReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reduce one frame. Returns a snapshot on every
    /// [`SNAPSHOT_INTERVAL_FRAMES`]th frame.
    pub fn process(
        &mut self,
        frame: &FrameObservation,
        elapsed_seconds: f64,
    ) -> Option<MetricsSnapshot> {
        if let Some(face) = frame.face_landmarks() {
            self.reduce_face(face);
        }

        let centers = frame.hand_centers();
        if !centers.is_empty() {
            self.reduce_hands(centers);
        }

        self.processed_frames += 1;
        self.last_elapsed = elapsed_seconds;
        if self.processed_frames % SNAPSHOT_INTERVAL_FRAMES == 0 {
            let snapshot = self.snapshot(elapsed_seconds);
            tracing::debug!(
                t = snapshot.t,
                eye_closed_pct = snapshot.eye_closed_pct,
                head_move = snapshot.head_move,
                hand_move = snapshot.hand_move,
                "metrics snapshot"
            );
            Some(snapshot)
        } else {
            None
        }
    }

    fn reduce_face(&mut self, face: &[Point]) {
        self.face_frames += 1;

        let left = eye_aspect_ratio(face, &LEFT_EYE);
        let right = eye_aspect_ratio(face, &RIGHT_EYE);
        if let (Some(left), Some(right)) = (left, right) {
            if left < EAR_CLOSED_THRESHOLD && right < EAR_CLOSED_THRESHOLD {
                self.closed_frames += 1;
            }
        }

        let nose = face[NOSE_TIP];
        if let Some(previous) = self.previous_nose {
            self.head_movement += previous.distance(&nose);
        }
        self.previous_nose = Some(nose);
    }

    // Hands are matched by detection order, not identity.
    fn reduce_hands(&mut self, centers: Vec<Point>) {
        if let Some(previous) = &self.previous_hands {
            if previous.len() == centers.len() {
                self.hand_movement += previous
                    .iter()
                    .zip(&centers)
                    .map(|(a, b)| a.distance(b))
                    .sum::<f64>();
            }
        }
        self.previous_hands = Some(centers);
    }

    /// Metrics as of now, stamped with `t`.
    pub fn snapshot(&self, t: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            t,
            eye_closed_pct: self.eye_closed_percent(),
            head_move: self.head_movement,
            hand_move: self.hand_movement,
            hand_stability: self.hand_stability(),
        }
    }

    /// Metrics as of the last processed frame.
    pub fn current_metrics(&self) -> MetricsSnapshot {
        self.snapshot(self.last_elapsed)
    }

    /// Share of face frames with both eyes closed, 0 before any face frame.
    pub fn eye_closed_percent(&self) -> f64 {
        if self.face_frames == 0 {
            return 0.0;
        }
        self.closed_frames as f64 / self.face_frames as f64 * 100.0
    }

    /// Cumulative nose displacement.
    pub fn head_movement(&self) -> f64 {
        self.head_movement
    }

    /// Cumulative wrist displacement over all hands.
    pub fn hand_movement(&self) -> f64 {
        self.hand_movement
    }

    pub fn hand_stability(&self) -> f64 {
        hand_stability(self.hand_movement)
    }

    /// Frames reduced so far, with or without detections.
    pub fn processed_frames(&self) -> u64 {
        self.processed_frames
    }

    /// Frames in which a face was detected.
    pub fn face_frames(&self) -> u64 {
        self.face_frames
    }

    /// Face frames classified as eyes closed.
    pub fn closed_frames(&self) -> u64 {
        self.closed_frames
    }
}
