//! SCRFD face detector via ONNX Runtime.
//!
//! Finds face boxes in a grayscale frame so the landmark model can run on a
//! face-centred crop. Only the score and box heads are decoded; the five-point
//! keypoint head is ignored.

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx from insightface and place it in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer too short: expected {expected}, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Scale and padding applied when fitting the frame into the square input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - new_w) / 2.0).floor(),
            pad_y: ((target as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Input-tensor coordinates back to frame pixels.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// (score, bbox) output indices for one stride.
type StrideOutputs = (usize, usize);

pub struct FaceDetector {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = model_path, outputs = ?names, "loaded SCRFD model");

        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires score and bbox outputs for 3 strides, got {}",
                names.len()
            )));
        }

        let stride_outputs = discover_outputs(&names);
        tracing::debug!(?stride_outputs, "SCRFD output mapping");

        Ok(Self {
            session,
            stride_outputs,
        })
    }

    /// Detect faces, strongest first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 || frame.len() < w * h {
            return Err(DetectorError::InvalidFrame {
                expected: w * h,
                actual: frame.len(),
            });
        }

        let (input, letterbox) = preprocess(frame, w, h);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut boxes = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in SCRFD_STRIDES.iter().zip(&self.stride_outputs) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, deltas) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            boxes.extend(decode_stride(
                scores,
                deltas,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(nms(boxes, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox a grayscale frame into the normalized 640×640 NCHW input.
fn preprocess(frame: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
    let size = SCRFD_INPUT_SIZE;
    let letterbox = Letterbox::fit(width, height, size);
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let (sx, sy) = letterbox.to_frame(x as f32 + 0.5, y as f32 + 0.5);
            let pixel = if sx < 0.0 || sy < 0.0 || sx >= width as f32 || sy >= height as f32 {
                SCRFD_MEAN
            } else {
                bilinear(frame, width, height, sx - 0.5, sy - 0.5)
            };
            let normalized = (pixel - SCRFD_MEAN) / SCRFD_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    (tensor, letterbox)
}

/// Bilinear sample with edge clamping.
fn bilinear(frame: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);
    let (x0, y0) = (x.floor() as usize, y.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(width - 1), (y0 + 1).min(height - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let px = |xi: usize, yi: usize| frame[yi * width + xi] as f32;
    px(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + px(x1, y0) * fx * (1.0 - fy)
        + px(x0, y1) * (1.0 - fx) * fy
        + px(x1, y1) * fx * fy
}

/// Map outputs to strides by name (`score_8`, `bbox_8`, ...), falling back
/// to the usual positional layout of scores first, then boxes.
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |head: &str, stride: usize| {
        let target = format!("{head}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named.as_deref() {
        Some(&[a, b, c]) => [a, b, c],
        _ => {
            tracing::info!(?names, "SCRFD output names not recognized; using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode the boxes of one stride level above `threshold` into frame pixels.
fn decode_stride(
    scores: &[f32],
    deltas: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceBox> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&idx| scores[idx] > threshold)
        .filter_map(|idx| {
            let d = deltas.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid_w) as f32 * step;
            let ay = (cell / grid_w) as f32 * step;

            let (x1, y1) = letterbox.to_frame(ax - d[0] * step, ay - d[1] * step);
            let (x2, y2) = letterbox.to_frame(ax + d[2] * step, ay + d[3] * step);
            Some(FaceBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: scores[idx],
            })
        })
        .collect()
}

/// Greedy non-maximum suppression. The result is sorted by confidence.
fn nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
