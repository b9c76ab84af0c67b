//! Landmark observations delivered by the capture service.
//!
//! Coordinates are normalized image coordinates as produced by a 468-point
//! face mesh and 21-point hand model. A frame may carry no face and any
//! number of hands; absence is normal and never an error.

use serde::{Deserialize, Serialize};

/// Number of points in a face mesh.
pub const FACE_LANDMARK_COUNT: usize = 468;

/// Number of points in a hand skeleton.
pub const HAND_LANDMARK_COUNT: usize = 21;

/// Left eye contour: outer corner, two upper lid points, inner corner, two
/// lower lid points.
pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];

/// Right eye contour, same ordering as [`LEFT_EYE`].
pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];

/// Nose tip, used as the head position.
pub const NOSE_TIP: usize = 1;

/// Wrist, used as the hand position.
pub const WRIST: usize = 0;

/// A 2D landmark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Landmarks detected in one captured frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    /// Face mesh, if a face was detected.
    #[serde(default)]
    pub face: Option<Vec<Point>>,
    /// One landmark set per detected hand.
    #[serde(default)]
    pub hands: Vec<Vec<Point>>,
}

impl FrameObservation {
    /// A frame with nothing detected.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Attach a face mesh.
    pub fn with_face(mut self, face: Vec<Point>) -> Self {
        self.face = Some(face);
        self
    }

    /// Attach hand landmark sets.
    pub fn with_hands(mut self, hands: Vec<Vec<Point>>) -> Self {
        self.hands = hands;
        self
    }

    /// The face mesh, if present and complete.
    ///
    /// A truncated mesh is treated as no face at all.
    pub fn face_landmarks(&self) -> Option<&[Point]> {
        self.face
            .as_deref()
            .filter(|face| face.len() >= FACE_LANDMARK_COUNT)
    }

    /// Wrist position of each hand, in detection order.
    ///
    /// Hands without a wrist point are skipped.
    pub fn hand_centers(&self) -> Vec<Point> {
        self.hands
            .iter()
            .filter_map(|hand| hand.get(WRIST).copied())
            .collect()
    }
}

/// Eye aspect ratio for one eye.
///
/// `EAR = (|p2 - p6| + |p3 - p5|) / (2 |p1 - p4|)` over the six contour
/// points. Returns `None` when the mesh is too short or the eye corners
/// coincide.
pub fn eye_aspect_ratio(face: &[Point], eye: &[usize; 6]) -> Option<f64> {
    let p = |i: usize| face.get(eye[i]);
    let (p1, p2, p3, p4, p5, p6) = (p(0)?, p(1)?, p(2)?, p(3)?, p(4)?, p(5)?);

    let horizontal = p1.distance(p4);
    if horizontal <= f64::EPSILON {
        return None;
    }
    Some((p2.distance(p6) + p3.distance(p5)) / (2.0 * horizontal))
}
