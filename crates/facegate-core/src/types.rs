use serde::{Deserialize, Serialize};

/// A normalized image-plane point (x, y in [0, 1]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in normalized units.
    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// One face's landmark set, indexed by landmark id (FaceMesh topology).
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoints {
    points: Vec<Point>,
}

impl Keypoints {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn get(&self, index: usize) -> Option<Point> {
        self.points.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Result of one landmark inference pass.
#[derive(Debug, Clone, PartialEq)]
pub enum KeypointFrame {
    /// No face found in the frame.
    Absent,
    Present(Keypoints),
}

impl From<Option<Keypoints>> for KeypointFrame {
    fn from(value: Option<Keypoints>) -> Self {
        match value {
            Some(kp) => KeypointFrame::Present(kp),
            None => KeypointFrame::Absent,
        }
    }
}

/// An encoded still frame, opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StillImage {
    pub data: Vec<u8>,
    pub content_type: &'static str,
}

impl StillImage {
    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            data,
            content_type: "image/jpeg",
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Guided five-pose capture producing a batch for enrollment.
    Enrollment,
    /// Single-shot capture for a recognition attempt.
    Verification,
}

/// Caller-facing snapshot of a capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureStatus {
    pub session_id: String,
    pub mode: CaptureMode,
    pub prompt: String,
    /// Hysteresis progress toward the next automatic acceptance, 0–100.
    pub progress_percent: u8,
    pub confidence: u32,
    pub occlusion_blocked: bool,
    pub step: usize,
    /// Number of pose steps; 0 in verification mode.
    pub step_count: usize,
    /// A still is being captured for an acceptance that has already fired.
    pub accepting: bool,
    pub complete: bool,
    pub accepted_frames: usize,
}

/// Result of a recognition attempt returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerifyOutcome {
    Match { subject: String, timestamp: String },
    NoMatch { reason: Option<String> },
}

/// A past successful recognition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub subject: String,
    pub time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(0.3, 0.4);
        assert!((a.distance(&b) - 0.5).abs() < 1e-6);
        assert!((b.distance(&a) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_keypoints_out_of_range() {
        let kp = Keypoints::new(vec![Point::new(0.1, 0.2)]);
        assert_eq!(kp.get(0), Some(Point::new(0.1, 0.2)));
        assert_eq!(kp.get(1), None);
        assert_eq!(kp.len(), 1);
    }

    #[test]
    fn test_keypoint_frame_from_option() {
        assert_eq!(KeypointFrame::from(None), KeypointFrame::Absent);
        let kp = Keypoints::new(vec![]);
        assert_eq!(
            KeypointFrame::from(Some(kp.clone())),
            KeypointFrame::Present(kp)
        );
    }

    #[test]
    fn test_verify_outcome_json_shape() {
        let outcome = VerifyOutcome::Match {
            subject: "an".into(),
            timestamp: "08:00:00 - 01/02/2026".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "match");
        assert_eq!(json["subject"], "an");

        let none: VerifyOutcome =
            serde_json::from_str(r#"{"outcome":"no_match","reason":null}"#).unwrap();
        assert_eq!(none, VerifyOutcome::NoMatch { reason: None });
    }
}
