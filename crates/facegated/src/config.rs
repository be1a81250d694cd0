use facegate_core::occlusion::MIN_CHECK_INTERVAL;
use facegate_core::HysteresisConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the SCRFD and FaceMesh ONNX models.
    pub model_dir: PathBuf,
    /// Base URL of the enrollment/recognition backend.
    pub backend_url: String,
    /// Per-request timeout for backend calls.
    pub request_timeout_secs: u64,
    /// Frames to reach before a pose is accepted, and the per-frame gain/penalty.
    pub hysteresis: HysteresisConfig,
    /// Minimum spacing between occlusion checks; never below 500 ms.
    pub occlusion_interval_ms: u64,
    /// Number of warmup frames to discard when streaming starts.
    pub warmup_frames: usize,
    /// JPEG quality for accepted stills and occlusion checks.
    pub jpeg_quality: u8,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let parsed_u32 = |key: &str| parsed(key).and_then(|v| u32::try_from(v).ok());
        let defaults = HysteresisConfig::default();

        Self {
            camera_device: lookup("FACEGATE_CAMERA_DEVICE")
                .unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir: lookup("FACEGATE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(facegate_core::default_model_dir),
            backend_url: lookup("FACEGATE_BACKEND_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            request_timeout_secs: parsed("FACEGATE_REQUEST_TIMEOUT_SECS").unwrap_or(10),
            hysteresis: HysteresisConfig {
                target: parsed_u32("FACEGATE_CONFIDENCE_TARGET").unwrap_or(defaults.target),
                gain: parsed_u32("FACEGATE_CONFIDENCE_GAIN").unwrap_or(defaults.gain),
                penalty: parsed_u32("FACEGATE_CONFIDENCE_PENALTY").unwrap_or(defaults.penalty),
            },
            occlusion_interval_ms: parsed("FACEGATE_OCCLUSION_INTERVAL_MS")
                .unwrap_or(500)
                .max(MIN_CHECK_INTERVAL.as_millis() as u64),
            warmup_frames: parsed("FACEGATE_WARMUP_FRAMES")
                .map(|v| v as usize)
                .unwrap_or(4),
            jpeg_quality: parsed("FACEGATE_JPEG_QUALITY")
                .map(|v| v.clamp(1, 100) as u8)
                .unwrap_or(90),
        }
    }

    /// Path to the FaceMesh landmark model.
    pub fn facemesh_model_path(&self) -> String {
        self.model_dir
            .join(facegate_core::FACEMESH_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(facegate_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn occlusion_interval(&self) -> Duration {
        Duration::from_millis(self.occlusion_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.backend_url, "http://localhost:8000");
        assert_eq!(c.hysteresis, HysteresisConfig::default());
        assert_eq!(c.occlusion_interval(), Duration::from_millis(500));
        assert_eq!(c.jpeg_quality, 90);
        assert!(c.facemesh_model_path().ends_with("face_landmark.onnx"));
        assert!(c.detector_model_path().ends_with("det_10g.onnx"));
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("FACEGATE_CAMERA_DEVICE", "/dev/video4"),
            ("FACEGATE_CONFIDENCE_TARGET", "30"),
            ("FACEGATE_CONFIDENCE_PENALTY", "2"),
            ("FACEGATE_OCCLUSION_INTERVAL_MS", "750"),
            ("FACEGATE_MODEL_DIR", "/opt/models"),
        ]);
        assert_eq!(c.camera_device, "/dev/video4");
        assert_eq!(c.hysteresis.target, 30);
        assert_eq!(c.hysteresis.gain, 1);
        assert_eq!(c.hysteresis.penalty, 2);
        assert_eq!(c.occlusion_interval_ms, 750);
        assert_eq!(c.facemesh_model_path(), "/opt/models/face_landmark.onnx");
        assert_eq!(c.detector_model_path(), "/opt/models/det_10g.onnx");
    }

    #[test]
    fn test_unparseable_falls_back() {
        let c = config(&[
            ("FACEGATE_CONFIDENCE_TARGET", "lots"),
            ("FACEGATE_JPEG_QUALITY", "500"),
        ]);
        assert_eq!(c.hysteresis.target, 20);
        assert_eq!(c.jpeg_quality, 100);
    }

    #[test]
    fn test_out_of_range_counts_fall_back() {
        let c = config(&[
            ("FACEGATE_CONFIDENCE_TARGET", "4294967296"),
            ("FACEGATE_CONFIDENCE_GAIN", "4294967297"),
        ]);
        assert_eq!(c.hysteresis.target, 20);
        assert_eq!(c.hysteresis.gain, 1);
    }

    #[test]
    fn test_occlusion_interval_floor() {
        let c = config(&[("FACEGATE_OCCLUSION_INTERVAL_MS", "0")]);
        assert_eq!(c.occlusion_interval(), Duration::from_millis(500));

        let c = config(&[("FACEGATE_OCCLUSION_INTERVAL_MS", "120")]);
        assert_eq!(c.occlusion_interval_ms, 500);
    }
}
