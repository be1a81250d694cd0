//! Face landmarks via ONNX Runtime.
//!
//! [`FaceLandmarker`] runs the SCRFD detector on the frame, cuts a square
//! face-centred crop around the strongest box and runs a MediaPipe FaceMesh
//! export (192×192 input, 468 landmarks) on it. Landmarks are mapped back to
//! coordinates normalized over the full frame.

use crate::detector::{DetectorError, FaceBox, FaceDetector};
use crate::types::{KeypointFrame, Keypoints, Point};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FACEMESH_INPUT_SIZE: usize = 192;
const FACEMESH_LANDMARK_COUNT: usize = 468;
/// Each landmark is exported as (x, y, z).
const FACEMESH_LANDMARK_DIMS: usize = 3;
const FACEMESH_PRESENCE_THRESHOLD: f32 = 0.5;
/// Crop side relative to the longer side of the detected box. FaceMesh
/// expects some margin around the face.
const CROP_SCALE: f32 = 1.5;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}; export face_landmark to ONNX and place it in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer too short: expected {expected}, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("face detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Per-frame landmark inference. Invoked once per processing cycle.
pub trait LandmarkSource {
    fn detect(&mut self, frame: &[u8], width: u32, height: u32)
        -> Result<KeypointFrame, LandmarkError>;
}

/// Square region of the frame, in pixels, fed to FaceMesh. May extend past
/// the frame edges; those pixels read as black.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceCrop {
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

impl FaceCrop {
    /// Square crop centred on `face`, [`CROP_SCALE`] times its longer side.
    pub fn around(face: &FaceBox) -> Self {
        let (cx, cy) = face.center();
        let size = face.width.max(face.height) * CROP_SCALE;
        Self {
            x: cx - size / 2.0,
            y: cy - size / 2.0,
            size,
        }
    }

    /// Model input pixel to frame pixel.
    fn to_frame(&self, ix: f32, iy: f32) -> (f32, f32) {
        let scale = self.size / FACEMESH_INPUT_SIZE as f32;
        (self.x + ix * scale, self.y + iy * scale)
    }
}

/// FaceMesh landmark model. Runs on a face crop, not the whole frame.
pub struct FaceMesh {
    session: Session,
    output_count: usize,
}

impl FaceMesh {
    /// Load the FaceMesh ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, LandmarkError> {
        if !Path::new(model_path).exists() {
            return Err(LandmarkError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_count = session.outputs().len();
        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FaceMesh model"
        );

        if output_count < 2 {
            return Err(LandmarkError::InferenceFailed(format!(
                "FaceMesh model requires landmark and presence outputs, got {output_count}"
            )));
        }

        Ok(Self {
            session,
            output_count,
        })
    }

    /// Run the model on `crop` of a grayscale frame.
    pub fn infer(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        crop: &FaceCrop,
    ) -> Result<KeypointFrame, LandmarkError> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 || frame.len() < w * h {
            return Err(LandmarkError::InvalidFrame {
                expected: w * h,
                actual: frame.len(),
            });
        }

        let input = preprocess(frame, w, h, crop);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Output order differs between exports; tell them apart by size.
        let mut landmarks: Option<Vec<f32>> = None;
        let mut presence_logit: Option<f32> = None;
        for idx in 0..self.output_count {
            let (_, data) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| LandmarkError::InferenceFailed(format!("output {idx}: {e}")))?;
            match data.len() {
                n if n == FACEMESH_LANDMARK_COUNT * FACEMESH_LANDMARK_DIMS => {
                    landmarks = Some(data.to_vec());
                }
                1 => presence_logit = Some(data[0]),
                _ => {}
            }
        }

        let landmarks = landmarks.ok_or_else(|| {
            LandmarkError::InferenceFailed("no 468×3 landmark output found".into())
        })?;
        let presence = sigmoid(presence_logit.ok_or_else(|| {
            LandmarkError::InferenceFailed("no face presence output found".into())
        })?);

        Ok(decode_landmarks(&landmarks, presence, crop, width, height))
    }
}

/// Production landmark source: SCRFD face box, then FaceMesh on the crop.
pub struct FaceLandmarker {
    detector: FaceDetector,
    mesh: FaceMesh,
}

impl FaceLandmarker {
    pub fn new(detector: FaceDetector, mesh: FaceMesh) -> Self {
        Self { detector, mesh }
    }

    pub fn load(detector_path: &str, mesh_path: &str) -> Result<Self, LandmarkError> {
        Ok(Self::new(
            FaceDetector::load(detector_path)?,
            FaceMesh::load(mesh_path)?,
        ))
    }
}

impl LandmarkSource for FaceLandmarker {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<KeypointFrame, LandmarkError> {
        let faces = self.detector.detect(frame, width, height)?;
        let Some(face) = faces.first() else {
            return Ok(KeypointFrame::Absent);
        };
        if faces.len() > 1 {
            tracing::trace!(count = faces.len(), "several faces; using the strongest");
        }
        self.mesh.infer(frame, width, height, &FaceCrop::around(face))
    }
}

/// Sample `crop` into a 192×192 NCHW tensor in [0, 1]. Pixels outside the
/// frame are zero.
fn preprocess(frame: &[u8], width: usize, height: usize, crop: &FaceCrop) -> Array4<f32> {
    let size = FACEMESH_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let pixel = |x: i64, y: i64| -> f32 {
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            0.0
        } else {
            frame[y as usize * width + x as usize] as f32
        }
    };

    for y in 0..size {
        for x in 0..size {
            let (sx, sy) = crop.to_frame(x as f32 + 0.5, y as f32 + 0.5);
            let (sx, sy) = (sx - 0.5, sy - 0.5);
            let (x0, y0) = (sx.floor(), sy.floor());
            let (fx, fy) = (sx - x0, sy - y0);
            let (x0, y0) = (x0 as i64, y0 as i64);

            let val = pixel(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + pixel(x0 + 1, y0) * fx * (1.0 - fy)
                + pixel(x0, y0 + 1) * (1.0 - fx) * fy
                + pixel(x0 + 1, y0 + 1) * fx * fy;

            let normalized = val / 255.0;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Convert raw (x, y, z) triples in crop input-pixel units into keypoints
/// normalized over the full frame.
fn decode_landmarks(
    raw: &[f32],
    presence: f32,
    crop: &FaceCrop,
    width: u32,
    height: u32,
) -> KeypointFrame {
    if presence < FACEMESH_PRESENCE_THRESHOLD {
        return KeypointFrame::Absent;
    }
    let (w, h) = (width as f32, height as f32);
    let points = raw
        .chunks_exact(FACEMESH_LANDMARK_DIMS)
        .map(|c| {
            let (x, y) = crop.to_frame(c[0], c[1]);
            Point::new(x / w, y / h)
        })
        .collect();
    KeypointFrame::Present(Keypoints::new(points))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crop(x: f32, y: f32, size: f32) -> FaceCrop {
        FaceCrop { x, y, size }
    }

    #[test]
    fn test_crop_around_box_is_square_and_centred() {
        let face = FaceBox {
            x: 100.0,
            y: 80.0,
            width: 100.0,
            height: 120.0,
            confidence: 0.9,
        };
        assert_eq!(FaceCrop::around(&face), crop(60.0, 50.0, 180.0));
    }

    #[test]
    fn test_preprocess_output_shape() {
        let frame = vec![128u8; 64 * 48];
        let tensor = preprocess(&frame, 64, 48, &crop(0.0, 0.0, 48.0));
        assert_eq!(tensor.shape(), &[1, 3, FACEMESH_INPUT_SIZE, FACEMESH_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_samples_only_the_crop() {
        // Left half black, right half white; the crop sits in the white half.
        let frame: Vec<u8> = (0..64 * 64).map(|i| if i % 64 >= 32 { 255 } else { 0 }).collect();
        let tensor = preprocess(&frame, 64, 64, &crop(40.0, 20.0, 16.0));
        for y in (0..FACEMESH_INPUT_SIZE).step_by(11) {
            for x in (0..FACEMESH_INPUT_SIZE).step_by(7) {
                assert!((tensor[[0, 0, y, x]] - 1.0).abs() < 1e-5, "({x},{y})");
            }
        }
    }

    #[test]
    fn test_preprocess_pads_outside_frame() {
        let frame = vec![255u8; 64 * 64];
        let tensor = preprocess(&frame, 64, 64, &crop(56.0, 0.0, 16.0));
        assert!((tensor[[0, 0, 96, 0]] - 1.0).abs() < 1e-5);
        assert_eq!(tensor[[0, 0, 96, 191]], 0.0);
    }

    #[test]
    fn test_preprocess_channels_identical() {
        let frame: Vec<u8> = (0..(32 * 32)).map(|i| (i % 251) as u8).collect();
        let tensor = preprocess(&frame, 32, 32, &crop(4.0, 4.0, 24.0));
        for y in (0..FACEMESH_INPUT_SIZE).step_by(17) {
            for x in (0..FACEMESH_INPUT_SIZE).step_by(13) {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(8.0) > 0.99);
        assert!(sigmoid(-8.0) < 0.01);
    }

    #[test]
    fn test_decode_low_presence_is_absent() {
        let raw = vec![96.0; FACEMESH_LANDMARK_COUNT * 3];
        let frame = decode_landmarks(&raw, 0.2, &crop(0.0, 0.0, 192.0), 640, 480);
        assert_eq!(frame, KeypointFrame::Absent);
    }

    #[test]
    fn test_decode_maps_crop_to_frame() {
        let mut raw = vec![0.0; FACEMESH_LANDMARK_COUNT * 3];
        raw[3] = 96.0; // landmark 1 x
        raw[4] = 48.0; // landmark 1 y
        raw[5] = -12.0; // z is dropped
        // 384 px crop at (100, 50): one input pixel is two frame pixels.
        let KeypointFrame::Present(kp) =
            decode_landmarks(&raw, 0.9, &crop(100.0, 50.0, 384.0), 640, 480)
        else {
            panic!("expected a face");
        };
        assert_eq!(kp.len(), FACEMESH_LANDMARK_COUNT);
        let p = kp.get(1).unwrap();
        assert!((p.x - 292.0 / 640.0).abs() < 1e-6);
        assert!((p.y - 146.0 / 480.0).abs() < 1e-6);
        let origin = kp.get(0).unwrap();
        assert!((origin.x - 100.0 / 640.0).abs() < 1e-6);
    }

    #[test]
    fn test_centred_face_crop_keeps_frontal_geometry() {
        // A frontal face detected mid-frame comes back mid-frame, so yaw
        // ratios are computed in frame space, not crop space.
        let face = FaceBox {
            x: 270.0,
            y: 190.0,
            width: 100.0,
            height: 100.0,
            confidence: 0.9,
        };
        let c = FaceCrop::around(&face);
        let mut raw = vec![0.0; FACEMESH_LANDMARK_COUNT * 3];
        raw[3] = 96.0;
        raw[4] = 96.0;
        let KeypointFrame::Present(kp) = decode_landmarks(&raw, 0.9, &c, 640, 480) else {
            panic!("expected a face");
        };
        let nose = kp.get(1).unwrap();
        assert!((nose.x - 0.5).abs() < 1e-5);
        assert!((nose.y - 0.5).abs() < 1e-5);
    }
}
