use image::RgbaImage;

use crate::errors::Result;
use crate::types::DetectionResult;

/// Face detection capability.
///
/// Implementations must be safe to share across camera workers; the worker
/// calls `detect` on its own task and adds no serialization of its own. A
/// blocking implementation therefore stalls only its own camera's pipeline.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, img: &RgbaImage) -> Result<DetectionResult>;
}

/// No-op detector used when no native face model is wired in. Frames pass
/// through the pipeline unannotated and no alerts fire.
pub struct StubDetector;

impl FaceDetector for StubDetector {
    fn detect(&self, _img: &RgbaImage) -> Result<DetectionResult> {
        Ok(DetectionResult::default())
    }
}
