//! facegate-core — Guided face capture pipeline.
//!
//! Turns a stream of per-frame face landmarks into a small set of accepted
//! stills: pose classification, hysteresis smoothing, an occlusion veto and
//! the capture session state machine. Landmarks come from an SCRFD face
//! detector and a FaceMesh model running via ONNX Runtime.

pub mod batch;
pub mod detector;
pub mod hysteresis;
pub mod landmarks;
pub mod occlusion;
pub mod pose;
pub mod session;
pub mod types;

use std::path::PathBuf;

pub use batch::{BatchCollector, BatchError, EnrollmentBatch};
pub use hysteresis::{Accumulator, HysteresisConfig};
pub use detector::{DetectorError, FaceBox, FaceDetector};
pub use landmarks::{FaceCrop, FaceLandmarker, FaceMesh, LandmarkError, LandmarkSource};
pub use occlusion::{CheckTicket, OcclusionGate, Resolution};
pub use session::{AcceptTicket, AcceptTrigger, Acceptance, Phase, Session, SessionError};
pub use types::{
    CaptureMode, CaptureStatus, HistoryRecord, KeypointFrame, Keypoints, Point, StillImage,
    VerifyOutcome,
};

/// FaceMesh model file name inside the model directory.
pub const FACEMESH_MODEL_FILE: &str = "face_landmark.onnx";

/// SCRFD face detector model file name inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";

/// `$XDG_DATA_HOME/facegate/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate/models")
}
