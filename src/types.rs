use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-camera configuration entry parsed from `CAMERA_CONFIGS`.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub id: String,
    pub rtsp_url: String,
}

/// Axis-aligned detection rectangle with a confidence score.
///
/// Coordinates satisfy `x0 < x1` and `y0 < y1` for any box produced by a
/// detector; boxes read back from the wire are not re-validated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
    pub score: f64,
}

impl BoundingBox {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32, score: f64) -> Self {
        Self { x0, y0, x1, y1, score }
    }

    /// Clips the box to a `width` x `height` image. Returns `None` when the
    /// clipped rectangle is empty.
    pub fn clip(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let x0 = self.x0.max(0);
        let y0 = self.y0.max(0);
        let x1 = self.x1.min(width as i32);
        let y1 = self.y1.min(height as i32);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }
        Some(BoundingBox { x0, y0, x1, y1, score: self.score })
    }
}

/// The set of boxes a detector found in one frame. Order is detector-defined.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub boxes: Vec<BoundingBox>,
}

/// Alert payload posted to the backend when a frame contains faces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub camera_id: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub detections: Vec<BoundingBox>,
    /// Base64 of the annotated JPEG.
    pub snapshot: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}
