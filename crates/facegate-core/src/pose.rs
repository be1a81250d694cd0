//! Pose challenges and the per-frame pose classifier.
//!
//! Each challenge is a declarative record: a prompt shown to the user and a
//! pure predicate over [`FaceGeometry`]. The orchestrator only ever indexes
//! [`CHALLENGES`] by step, so poses can be added or reordered here without
//! touching the session logic.

use crate::types::Keypoints;

// FaceMesh (468-point) landmark ids.
pub const NOSE_TIP: usize = 1;
pub const LEFT_CHEEK: usize = 234;
pub const RIGHT_CHEEK: usize = 454;

pub const PROMPT_HOLD_STILL: &str = "Hold still";
pub const PROMPT_SEARCHING: &str = "Searching for face...";
pub const PROMPT_OCCLUDED: &str = "Please remove your mask or face covering";
pub const PROMPT_COMPLETE: &str = "Capture complete";
pub const PROMPT_READY: &str = "Ready to check in";

/// Derived measurements for one face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceGeometry {
    /// Left/right symmetry proxy in [0, 1]; 0.5 is centered.
    pub yaw_ratio: f32,
    /// Cheek-to-cheek distance in normalized units, a proxy for camera distance.
    pub face_width: f32,
}

impl FaceGeometry {
    /// Measure yaw ratio and face width from the nose and cheek landmarks.
    ///
    /// Yaw compares horizontal offsets only: the nose tip sits below the
    /// cheek line, and a vertical component would pull every ratio toward 0.5.
    /// Face width is the straight cheek-to-cheek distance.
    ///
    /// Returns `None` when a landmark is missing or the geometry is degenerate
    /// (nose level with both cheeks, or non-finite coordinates).
    pub fn measure(keypoints: &Keypoints) -> Option<Self> {
        let nose = keypoints.get(NOSE_TIP)?;
        let left = keypoints.get(LEFT_CHEEK)?;
        let right = keypoints.get(RIGHT_CHEEK)?;

        let dist_left = (nose.x - left.x).abs();
        let dist_right = (nose.x - right.x).abs();
        let span = dist_left + dist_right;
        // Rejects NaN as well as zero.
        if !(span > 0.0) || !span.is_finite() {
            return None;
        }

        Some(Self {
            yaw_ratio: dist_left / span,
            face_width: left.distance(&right),
        })
    }
}

/// One required pose in the enrollment sequence.
#[derive(Debug, Clone, Copy)]
pub struct PoseChallenge {
    pub name: &'static str,
    pub prompt: &'static str,
    predicate: fn(&FaceGeometry) -> bool,
}

impl PoseChallenge {
    pub const fn new(
        name: &'static str,
        prompt: &'static str,
        predicate: fn(&FaceGeometry) -> bool,
    ) -> Self {
        Self {
            name,
            prompt,
            predicate,
        }
    }

    pub fn accepts(&self, geometry: &FaceGeometry) -> bool {
        (self.predicate)(geometry)
    }
}

fn frontal(g: &FaceGeometry) -> bool {
    g.yaw_ratio > 0.4 && g.yaw_ratio < 0.6 && g.face_width > 0.15 && g.face_width < 0.35
}

fn close(g: &FaceGeometry) -> bool {
    g.face_width > 0.30
}

fn far(g: &FaceGeometry) -> bool {
    g.face_width < 0.10
}

fn yaw_left(g: &FaceGeometry) -> bool {
    g.yaw_ratio > 0.65
}

fn yaw_right(g: &FaceGeometry) -> bool {
    g.yaw_ratio < 0.35
}

/// The enrollment sequence, in capture order.
pub const CHALLENGES: [PoseChallenge; 5] = [
    PoseChallenge::new("frontal", "Look straight", frontal),
    PoseChallenge::new("close", "Move closer", close),
    PoseChallenge::new("far", "Move back", far),
    PoseChallenge::new("yaw_left", "Turn left", yaw_left),
    PoseChallenge::new("yaw_right", "Turn right", yaw_right),
];

/// Number of enrollment steps; `step == STEP_COUNT` means complete.
pub const STEP_COUNT: usize = CHALLENGES.len();

/// Classifier output for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoseVerdict {
    pub pass: bool,
    pub prompt: &'static str,
}

/// Evaluate a present face against the challenge for `step`.
///
/// The prompt is the step's instruction; the caller decides whether to show
/// it or a hold message on pass. Steps past the end never pass.
pub fn classify(keypoints: &Keypoints, step: usize) -> PoseVerdict {
    let Some(challenge) = CHALLENGES.get(step) else {
        return PoseVerdict {
            pass: false,
            prompt: PROMPT_COMPLETE,
        };
    };

    let pass = FaceGeometry::measure(keypoints).is_some_and(|g| challenge.accepts(&g));
    PoseVerdict {
        pass,
        prompt: challenge.prompt,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::types::{Keypoints, Point};

    use super::{LEFT_CHEEK, NOSE_TIP, RIGHT_CHEEK};

    /// Build a FaceMesh-sized keypoint set with the three measured landmarks
    /// placed on a horizontal line, so both ratios are exact.
    pub fn face(nose_x: f32, left_x: f32, right_x: f32) -> Keypoints {
        let mut points = vec![Point::new(0.5, 0.5); 468];
        points[NOSE_TIP] = Point::new(nose_x, 0.5);
        points[LEFT_CHEEK] = Point::new(left_x, 0.5);
        points[RIGHT_CHEEK] = Point::new(right_x, 0.5);
        Keypoints::new(points)
    }

    /// Centered face of the given width.
    pub fn centered(width: f32) -> Keypoints {
        face(0.5, 0.5 - width / 2.0, 0.5 + width / 2.0)
    }

    pub fn frontal() -> Keypoints {
        centered(0.25)
    }

    pub fn close() -> Keypoints {
        centered(0.40)
    }

    pub fn far() -> Keypoints {
        centered(0.06)
    }

    /// yaw ratio 0.8
    pub fn turned_left() -> Keypoints {
        face(0.56, 0.40, 0.60)
    }

    /// yaw ratio 0.2
    pub fn turned_right() -> Keypoints {
        face(0.44, 0.40, 0.60)
    }

    /// Passing keypoints for each step, in order.
    pub fn for_step(step: usize) -> Keypoints {
        match step {
            0 => frontal(),
            1 => close(),
            2 => far(),
            3 => turned_left(),
            _ => turned_right(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;
    use crate::types::Point;

    fn geometry(yaw_ratio: f32, face_width: f32) -> FaceGeometry {
        FaceGeometry {
            yaw_ratio,
            face_width,
        }
    }

    #[test]
    fn test_measure_centered_face() {
        let g = FaceGeometry::measure(&fixtures::centered(0.2)).unwrap();
        assert!((g.yaw_ratio - 0.5).abs() < 1e-6);
        assert!((g.face_width - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_yaw_ignores_vertical_nose_offset() {
        // Nose tip below the cheek line, head turned left.
        let mut points = vec![Point::new(0.5, 0.5); 468];
        points[NOSE_TIP] = Point::new(0.57, 0.58);
        points[LEFT_CHEEK] = Point::new(0.40, 0.50);
        points[RIGHT_CHEEK] = Point::new(0.65, 0.50);
        let kp = Keypoints::new(points);

        let g = FaceGeometry::measure(&kp).unwrap();
        assert!((g.yaw_ratio - 0.17 / 0.25).abs() < 1e-5, "yaw {}", g.yaw_ratio);
        assert!((g.face_width - 0.25).abs() < 1e-6);
        assert!(classify(&kp, 3).pass);
    }

    #[test]
    fn test_face_width_is_straight_distance() {
        let mut points = vec![Point::new(0.5, 0.5); 468];
        points[NOSE_TIP] = Point::new(0.5, 0.5);
        points[LEFT_CHEEK] = Point::new(0.3, 0.4);
        points[RIGHT_CHEEK] = Point::new(0.6, 0.8); // 0.3/0.4 triangle
        let g = FaceGeometry::measure(&Keypoints::new(points)).unwrap();
        assert!((g.face_width - 0.5).abs() < 1e-6);
        assert!((g.yaw_ratio - 0.2 / 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_measure_missing_landmark() {
        let kp = Keypoints::new(vec![Point::new(0.5, 0.5); 10]);
        assert!(FaceGeometry::measure(&kp).is_none());
    }

    #[test]
    fn test_measure_degenerate() {
        let kp = fixtures::face(0.5, 0.5, 0.5);
        assert!(FaceGeometry::measure(&kp).is_none());
    }

    #[test]
    fn test_measure_non_finite() {
        let kp = fixtures::face(f32::NAN, 0.4, 0.6);
        assert!(FaceGeometry::measure(&kp).is_none());
    }

    #[test]
    fn test_step0_boundaries_are_strict() {
        let c = &CHALLENGES[0];
        assert!(c.accepts(&geometry(0.5, 0.25)));
        assert!(!c.accepts(&geometry(0.4, 0.25)));
        assert!(!c.accepts(&geometry(0.6, 0.25)));
        assert!(!c.accepts(&geometry(0.5, 0.15)));
        assert!(!c.accepts(&geometry(0.5, 0.35)));
    }

    #[test]
    fn test_step1_boundary() {
        let c = &CHALLENGES[1];
        assert!(!c.accepts(&geometry(0.5, 0.30)));
        assert!(c.accepts(&geometry(0.5, 0.31)));
    }

    #[test]
    fn test_step2_boundary() {
        let c = &CHALLENGES[2];
        assert!(!c.accepts(&geometry(0.5, 0.10)));
        assert!(c.accepts(&geometry(0.5, 0.09)));
    }

    #[test]
    fn test_step3_boundary() {
        let c = &CHALLENGES[3];
        assert!(!c.accepts(&geometry(0.65, 0.2)));
        assert!(c.accepts(&geometry(0.66, 0.2)));
    }

    #[test]
    fn test_step4_boundary() {
        let c = &CHALLENGES[4];
        assert!(!c.accepts(&geometry(0.35, 0.2)));
        assert!(c.accepts(&geometry(0.34, 0.2)));
    }

    #[test]
    fn test_prompts_in_order() {
        let prompts: Vec<_> = CHALLENGES.iter().map(|c| c.prompt).collect();
        assert_eq!(
            prompts,
            ["Look straight", "Move closer", "Move back", "Turn left", "Turn right"]
        );
        assert_eq!(STEP_COUNT, 5);
    }

    #[test]
    fn test_classify_each_fixture_passes_only_its_step() {
        for step in 0..STEP_COUNT {
            let verdict = classify(&fixtures::for_step(step), step);
            assert!(verdict.pass, "step {step} fixture should pass");
            assert_eq!(verdict.prompt, CHALLENGES[step].prompt);
        }
        assert!(!classify(&fixtures::frontal(), 1).pass);
        assert!(!classify(&fixtures::far(), 0).pass);
        assert!(!classify(&fixtures::turned_left(), 4).pass);
    }

    #[test]
    fn test_classify_past_end() {
        let verdict = classify(&fixtures::frontal(), STEP_COUNT);
        assert!(!verdict.pass);
        assert_eq!(verdict.prompt, PROMPT_COMPLETE);
    }

    #[test]
    fn test_classify_degenerate_fails() {
        let verdict = classify(&fixtures::face(0.5, 0.5, 0.5), 2);
        assert!(!verdict.pass);
        assert_eq!(verdict.prompt, "Move back");
    }
}
