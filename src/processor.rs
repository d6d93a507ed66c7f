use std::sync::Arc;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};

use crate::detector::FaceDetector;
use crate::errors::{Result, WorkerError};
use crate::overlay;
use crate::types::DetectionResult;

const JPEG_QUALITY: u8 = 85;

/// Per-frame transformation: decode JPEG, run face detection, draw the
/// detection boxes and the camera/FPS overlay, re-encode as JPEG.
pub struct FrameProcessor {
    camera_label: String,
    detector: Arc<dyn FaceDetector>,
}

impl FrameProcessor {
    pub fn new(camera_id: &str, detector: Arc<dyn FaceDetector>) -> Self {
        Self {
            camera_label: format!("CAMERA: {}", camera_id.to_uppercase()),
            detector,
        }
    }

    pub fn process(&self, frame: &[u8], fps: f64) -> Result<(Bytes, DetectionResult)> {
        let decoded = image::load_from_memory_with_format(frame, ImageFormat::Jpeg)
            .map_err(WorkerError::decode)?;
        let mut rgba = decoded.to_rgba8();

        let detection = self.detector.detect(&rgba)?;

        for bbox in &detection.boxes {
            overlay::draw_box_outline(&mut rgba, bbox, overlay::RED);
        }
        overlay::draw_text(&mut rgba, 10, 10, &self.camera_label, overlay::WHITE);
        overlay::draw_text(&mut rgba, 10, 25, &format!("FPS: {fps:.1}"), overlay::WHITE);

        let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();
        let mut encoded = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY);
        encoder.encode_image(&rgb).map_err(WorkerError::encode)?;

        Ok((Bytes::from(encoded), detection))
    }
}
