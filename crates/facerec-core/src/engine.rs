//! Inference boundary: the pixel-level detection, landmark and descriptor
//! computations, supplied by a backend such as `facerec-onnx`.

use crate::buffer::PixelBuffer;
use crate::types::{BoundingBox, DetectorModel, LandmarkModel, Point};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The model backing this capability was never loaded.
    #[error("model not loaded: {0}")]
    ModelUnavailable(String),
    /// The backend does not implement this variant at all.
    #[error("unsupported by this engine: {0}")]
    Unsupported(String),
    /// The computation itself failed; carries the backend's message.
    #[error("{0}")]
    Failed(String),
}

/// Backend that runs the three pixel-level stages.
///
/// Implementations are shared across threads behind the recognizer's
/// read lock, so every method takes `&self`.
pub trait InferenceEngine: Send + Sync {
    /// Face boxes in image coordinates. An empty result means no faces.
    fn detect(
        &self,
        image: &PixelBuffer,
        upsample: u32,
        model: DetectorModel,
    ) -> Result<Vec<BoundingBox>, EngineError>;

    /// One landmark set per face, in `faces` order. A complete set holds
    /// `model.points_per_face()` points; a face the model could only partly
    /// place may come back shorter without failing the batch.
    fn predict_landmarks(
        &self,
        image: &PixelBuffer,
        faces: &[BoundingBox],
        model: LandmarkModel,
    ) -> Result<Vec<Vec<Point>>, EngineError>;

    /// Descriptors for `points.len() / points_per_face` faces, flattened:
    /// 128 values per face.
    fn encode(
        &self,
        image: &PixelBuffer,
        points: &[Point],
        points_per_face: usize,
        jitters: u32,
    ) -> Result<Vec<f64>, EngineError>;
}
