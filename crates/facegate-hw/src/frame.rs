//! Frame type, pixel-format conversion and still encoding.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// A captured camera frame: grayscale for inference, plus the packed YUYV
/// source when the sensor delivers colour.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    /// Raw YUYV buffer, used to encode colour stills.
    pub yuyv: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Encode the frame as a JPEG still: colour when the YUYV source was kept,
    /// grayscale otherwise.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let pixels = (self.width * self.height) as usize;
        if self.width == 0 || self.height == 0 || self.data.len() < pixels {
            return Err(FrameError::InvalidLength {
                expected: pixels,
                actual: self.data.len(),
            });
        }

        let mut out = Vec::with_capacity(pixels / 8);
        let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        match &self.yuyv {
            Some(yuyv) => {
                let rgb = yuyv_to_rgb(yuyv, self.width, self.height)?;
                encoder.encode(&rgb, self.width, self.height, ExtendedColorType::Rgb8)
            }
            None => encoder.encode(
                &self.data[..pixels],
                self.width,
                self.height,
                ExtendedColorType::L8,
            ),
        }
        .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(out)
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert packed YUYV (4:2:2) to interleaved RGB using full-range BT.601.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for px in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (px[1], px[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(px[0], u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(px[2], u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = u as f32 - 128.0;
    let cr = v as f32 - 128.0;
    let clamp = |c: f32| c.round().clamp(0.0, 255.0) as u8;
    [
        clamp(y + 1.402 * cr),
        clamp(y - 0.344_136 * cb - 0.714_136 * cr),
        clamp(y + 1.772 * cb),
    ]
}

/// Downscale 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    Ok(buf[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("JPEG encoding failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(width: u32, height: u32) -> Frame {
        Frame {
            data: (0..width * height).map(|i| (i % 256) as u8).collect(),
            yuyv: None,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // little-endian 0x1234, 0xABCD
        let buf = vec![0x34, 0x12, 0xCD, 0xAB];
        assert_eq!(y16_to_grayscale(&buf, 2, 1).unwrap(), vec![0x12, 0xAB]);
    }

    #[test]
    fn test_encode_jpeg_has_soi_and_eoi() {
        let jpeg = gray(32, 24).encode_jpeg(90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_yuyv_to_rgb_neutral_chroma_is_gray() {
        let yuyv = vec![100, 128, 200, 128];
        assert_eq!(
            yuyv_to_rgb(&yuyv, 2, 1).unwrap(),
            vec![100, 100, 100, 200, 200, 200]
        );
    }

    #[test]
    fn test_yuyv_to_rgb_red_chroma() {
        // Cr at maximum pushes red up and green down.
        let rgb = yuyv_to_rgb(&[120, 128, 120, 255], 2, 1).unwrap();
        assert_eq!(rgb[0], 255);
        assert!(rgb[1] < 60, "green {}", rgb[1]);
        assert_eq!(rgb[2], 120);
    }

    #[test]
    fn test_encode_colour_jpeg() {
        let mut frame = gray(16, 8);
        frame.yuyv = Some(
            (0..16 * 8)
                .flat_map(|i| [(i % 256) as u8, 90, (i % 256) as u8, 200])
                .take(16 * 8 * 2)
                .collect(),
        );
        let colour = frame.encode_jpeg(90).unwrap();
        assert_eq!(&colour[..2], &[0xFF, 0xD8]);

        let gray_only = gray(16, 8).encode_jpeg(90).unwrap();
        assert_ne!(colour, gray_only);
    }

    #[test]
    fn test_encode_colour_rejects_short_yuyv() {
        let mut frame = gray(8, 8);
        frame.yuyv = Some(vec![0; 10]);
        assert!(matches!(
            frame.encode_jpeg(90),
            Err(FrameError::InvalidLength { expected: 128, actual: 10 })
        ));
    }

    #[test]
    fn test_encode_jpeg_rejects_short_buffer() {
        let mut frame = gray(8, 8);
        frame.data.truncate(10);
        assert!(matches!(
            frame.encode_jpeg(90),
            Err(FrameError::InvalidLength { expected: 64, actual: 10 })
        ));
    }
}
