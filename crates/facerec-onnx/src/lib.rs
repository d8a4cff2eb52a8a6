//! facerec-onnx — ONNX Runtime inference backend for facerec-core.
//!
//! Runs SCRFD detection, 68- and 5-point landmark regression and a
//! 128-dimensional descriptor network behind [`InferenceEngine`].

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod landmarks;
pub mod models;

use detector::FaceDetector;
use encoder::FaceEncoder;
use facerec_core::{
    BoundingBox, DetectorModel, EngineError, InferenceEngine, LandmarkModel, PixelBuffer, Point,
    Recognizer, RecognizerError,
};
use landmarks::LandmarkPredictor;
use std::path::PathBuf;
use thiserror::Error;

pub use models::{default_model_dir, ModelPaths, ModelStatus};

#[derive(Error, Debug)]
pub enum OnnxError {
    #[error("{name} model not found at {} (place it in the model directory)", .path.display())]
    ModelNotFound { name: &'static str, path: PathBuf },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// All loaded models. The 5-point landmark model is loaded only when its
/// file is present.
pub struct OnnxEngine {
    detector: FaceDetector,
    landmarks_68: LandmarkPredictor,
    landmarks_5: Option<LandmarkPredictor>,
    encoder: FaceEncoder,
}

impl OnnxEngine {
    pub fn load(paths: &ModelPaths) -> Result<Self, OnnxError> {
        paths.validate_required()?;

        let detector = FaceDetector::load(&paths.detector)?;
        let landmarks_68 = LandmarkPredictor::load("landmarks_68", &paths.landmarks_68, 68)?;
        let landmarks_5 = if paths.landmarks_5.exists() {
            Some(LandmarkPredictor::load("landmarks_5", &paths.landmarks_5, 5)?)
        } else {
            tracing::warn!(
                path = %paths.landmarks_5.display(),
                "5-point landmark model not found, small landmark model disabled"
            );
            None
        };
        let encoder = FaceEncoder::load(&paths.encoder)?;

        Ok(Self {
            detector,
            landmarks_68,
            landmarks_5,
            encoder,
        })
    }

    pub fn has_small_landmarks(&self) -> bool {
        self.landmarks_5.is_some()
    }
}

/// Load the models under `paths` and wrap them in a [`Recognizer`].
pub fn open(paths: &ModelPaths) -> Result<Recognizer<OnnxEngine>, RecognizerError> {
    let engine = OnnxEngine::load(paths).map_err(|e| match e {
        OnnxError::ModelNotFound { .. } => RecognizerError::ModelUnavailable(e.to_string()),
        other => RecognizerError::Inference {
            operation: "load models",
            message: other.to_string(),
        },
    })?;
    tracing::info!(small_landmarks = engine.has_small_landmarks(), "recognizer ready");
    Ok(Recognizer::new(engine))
}

fn failed(e: OnnxError) -> EngineError {
    EngineError::Failed(e.to_string())
}

impl InferenceEngine for OnnxEngine {
    fn detect(
        &self,
        image: &PixelBuffer,
        upsample: u32,
        model: DetectorModel,
    ) -> Result<Vec<BoundingBox>, EngineError> {
        match model {
            DetectorModel::Fast => self.detector.detect(image, upsample).map_err(failed),
            DetectorModel::Accurate => Err(EngineError::Unsupported(format!(
                "{model} detector is not available in the ONNX backend"
            ))),
        }
    }

    fn predict_landmarks(
        &self,
        image: &PixelBuffer,
        faces: &[BoundingBox],
        model: LandmarkModel,
    ) -> Result<Vec<Vec<Point>>, EngineError> {
        let predictor = match model {
            LandmarkModel::Large => &self.landmarks_68,
            LandmarkModel::Small => self.landmarks_5.as_ref().ok_or_else(|| {
                EngineError::ModelUnavailable(format!(
                    "5-point landmark model ({})",
                    models::LANDMARKS_5_FILE
                ))
            })?,
        };
        debug_assert_eq!(predictor.points(), model.points_per_face());
        predictor.predict(image, faces).map_err(failed)
    }

    fn encode(
        &self,
        image: &PixelBuffer,
        landmarks: &[Point],
        points_per_face: usize,
        jitters: u32,
    ) -> Result<Vec<f64>, EngineError> {
        self.encoder
            .encode(image, landmarks, points_per_face, jitters)
            .map_err(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_models_is_unavailable() {
        let paths = ModelPaths::in_dir("/nonexistent/facerec-models");
        match open(&paths) {
            Err(RecognizerError::ModelUnavailable(msg)) => assert!(msg.contains("detector")),
            Err(other) => panic!("expected ModelUnavailable, got {other:?}"),
            Ok(_) => panic!("expected failure without model files"),
        }
    }

    #[test]
    fn test_model_not_found_message_names_path() {
        let err = OnnxError::ModelNotFound {
            name: "encoder",
            path: PathBuf::from("/m/face_encoder_128.onnx"),
        };
        let msg = err.to_string();
        assert!(msg.contains("encoder"));
        assert!(msg.contains("/m/face_encoder_128.onnx"));
    }
}
