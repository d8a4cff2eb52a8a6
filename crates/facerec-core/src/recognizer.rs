//! Pipeline orchestrator: detect → landmarks → descriptors over a shared
//! inference engine.
//!
//! The engine sits behind a `RwLock<Option<E>>`. Every stage holds the read
//! lock only for its own engine call. Stages that need another stage first
//! (landmarks without boxes, descriptors) call it with no guard held and take
//! the lock again afterwards; `std::sync::RwLock` does not allow recursive
//! read acquisition while a writer waits. `close` takes the write lock and
//! drops the engine.

use crate::buffer::PixelBuffer;
use crate::engine::{EngineError, InferenceEngine};
use crate::landmarks::{FaceLandmarks, FaceLandmarksSmall, Landmarks, RawLandmarks};
use crate::types::{
    BoundingBox, Descriptor, DetectedFace, DetectorModel, LandmarkModel, DESCRIPTOR_LEN,
};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecognizerError {
    #[error("face recognizer not initialized or already closed")]
    NotInitialized,
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{operation} failed: {message}")]
    Inference {
        operation: &'static str,
        message: String,
    },
}

impl RecognizerError {
    fn engine(operation: &'static str, err: EngineError) -> Self {
        match err {
            EngineError::ModelUnavailable(m) => RecognizerError::ModelUnavailable(m),
            EngineError::Unsupported(m) => RecognizerError::UnsupportedModel(m),
            EngineError::Failed(message) => RecognizerError::Inference { operation, message },
        }
    }

    fn inference(operation: &'static str, message: String) -> Self {
        RecognizerError::Inference { operation, message }
    }
}

/// Face recognition pipeline over an inference engine `E`.
pub struct Recognizer<E: InferenceEngine> {
    engine: RwLock<Option<E>>,
}

impl<E: InferenceEngine> Recognizer<E> {
    /// Take ownership of an opened engine.
    pub fn new(engine: E) -> Self {
        tracing::debug!("face recognizer opened");
        Self {
            engine: RwLock::new(Some(engine)),
        }
    }

    /// Release the engine. Later calls to any stage fail with
    /// [`RecognizerError::NotInitialized`]; closing again is a no-op.
    pub fn close(&self) {
        let mut guard = self.engine.write().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            tracing::info!("face recognizer closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.engine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run `f` against the engine under the read lock. The guard is released
    /// before this returns, so callers may chain stages freely.
    fn with_engine<T>(
        &self,
        f: impl FnOnce(&E) -> Result<T, RecognizerError>,
    ) -> Result<T, RecognizerError> {
        let guard = self.engine.read().unwrap_or_else(PoisonError::into_inner);
        let engine = guard.as_ref().ok_or(RecognizerError::NotInitialized)?;
        f(engine)
    }

    fn ensure_open(&self) -> Result<(), RecognizerError> {
        self.with_engine(|_| Ok(()))
    }

    /// Detect faces. `upsample` below 1 means 1. Boxes are clamped to the image.
    pub fn face_locations(
        &self,
        image: &PixelBuffer,
        upsample: i32,
        model: DetectorModel,
    ) -> Result<Vec<BoundingBox>, RecognizerError> {
        self.with_engine(|engine| {
            if image.is_empty() {
                return Err(RecognizerError::InvalidArgument(format!(
                    "cannot detect faces in a {}x{} image",
                    image.width(),
                    image.height()
                )));
            }
            let upsample = upsample.max(1) as u32;

            let boxes = engine
                .detect(image, upsample, model)
                .map_err(|e| RecognizerError::engine("face detection", e))?;

            let boxes: Vec<BoundingBox> = boxes
                .iter()
                .map(|b| b.clamp_to(image.height(), image.width()))
                .collect();

            tracing::debug!(faces = boxes.len(), upsample, %model, "detected faces");
            Ok(boxes)
        })
    }

    /// Raw landmark points, one set per box in input order. With no boxes
    /// given, faces are detected first with the fast detector.
    pub fn face_landmarks_raw(
        &self,
        image: &PixelBuffer,
        locations: Option<&[BoundingBox]>,
        model: LandmarkModel,
    ) -> Result<Vec<RawLandmarks>, RecognizerError> {
        self.ensure_open()?;

        let detected;
        let locations = match locations {
            Some(locations) => locations,
            None => {
                detected = self.face_locations(image, 1, DetectorModel::Fast)?;
                &detected
            }
        };

        if locations.is_empty() {
            return Ok(Vec::new());
        }

        self.with_engine(|engine| {
            let sets = engine
                .predict_landmarks(image, locations, model)
                .map_err(|e| RecognizerError::engine("landmark detection", e))?;

            if sets.len() != locations.len() {
                return Err(RecognizerError::inference(
                    "landmark detection",
                    format!(
                        "expected landmarks for {} faces with the {model} model, got {}",
                        locations.len(),
                        sets.len()
                    ),
                ));
            }

            let per_face = model.points_per_face();
            let short = sets.iter().filter(|s| s.len() != per_face).count();
            if short > 0 {
                tracing::warn!(faces = sets.len(), short, %model, "incomplete landmark sets");
            }

            tracing::debug!(faces = locations.len(), %model, "predicted landmarks");
            Ok(sets.into_iter().map(RawLandmarks::new).collect())
        })
    }

    /// Named contours from the 68-point model. A face whose point set came back
    /// short gets an empty [`FaceLandmarks`] in its slot.
    pub fn face_landmarks(
        &self,
        image: &PixelBuffer,
        locations: Option<&[BoundingBox]>,
    ) -> Result<Vec<FaceLandmarks>, RecognizerError> {
        let raw = self.face_landmarks_raw(image, locations, LandmarkModel::Large)?;
        Ok(raw
            .iter()
            .map(|r| FaceLandmarks::from_raw(r).unwrap_or_default())
            .collect())
    }

    /// Named contours from the 5-point model.
    pub fn face_landmarks_small(
        &self,
        image: &PixelBuffer,
        locations: Option<&[BoundingBox]>,
    ) -> Result<Vec<FaceLandmarksSmall>, RecognizerError> {
        let raw = self.face_landmarks_raw(image, locations, LandmarkModel::Small)?;
        Ok(raw
            .iter()
            .map(|r| FaceLandmarksSmall::from_raw(r).unwrap_or_default())
            .collect())
    }

    /// One descriptor per face whose landmark set is complete, in box order.
    /// `jitters` below 1 means 1.
    pub fn face_encodings(
        &self,
        image: &PixelBuffer,
        locations: Option<&[BoundingBox]>,
        jitters: i32,
        model: LandmarkModel,
    ) -> Result<Vec<Descriptor>, RecognizerError> {
        self.ensure_open()?;
        let jitters = jitters.max(1) as u32;

        let raw = self.face_landmarks_raw(image, locations, model)?;
        let encoded = self.encode_landmarks(image, &raw, model.points_per_face(), jitters)?;
        Ok(encoded.into_iter().flatten().collect())
    }

    /// Detect with the fast detector, then compute contours and descriptors.
    ///
    /// Always returns one entry per detected face; a face whose landmarks came
    /// back incomplete keeps its box but has neither contours nor descriptor.
    pub fn detect_and_encode(
        &self,
        image: &PixelBuffer,
        upsample: i32,
        jitters: i32,
    ) -> Result<Vec<DetectedFace>, RecognizerError> {
        let jitters = jitters.max(1) as u32;
        let locations = self.face_locations(image, upsample, DetectorModel::Fast)?;
        if locations.is_empty() {
            return Ok(Vec::new());
        }

        let model = LandmarkModel::Large;
        let raw = self.face_landmarks_raw(image, Some(&locations), model)?;
        let descriptors = self.encode_landmarks(image, &raw, model.points_per_face(), jitters)?;

        let faces = locations
            .into_iter()
            .zip(raw.iter().zip(descriptors))
            .map(|(location, (raw, descriptor))| DetectedFace {
                location,
                landmarks: FaceLandmarks::from_raw(raw).map(Landmarks::Large),
                descriptor,
            })
            .collect();

        Ok(faces)
    }

    /// Encode every complete landmark set. The result is index-aligned with
    /// `raw`; incomplete sets get `None` and never reach the engine.
    fn encode_landmarks(
        &self,
        image: &PixelBuffer,
        raw: &[RawLandmarks],
        per_face: usize,
        jitters: u32,
    ) -> Result<Vec<Option<Descriptor>>, RecognizerError> {
        let complete: Vec<usize> = (0..raw.len())
            .filter(|&i| raw[i].len() == per_face)
            .collect();
        let mut slots: Vec<Option<Descriptor>> = vec![None; raw.len()];
        if complete.is_empty() {
            return Ok(slots);
        }
        if complete.len() < raw.len() {
            tracing::warn!(
                faces = raw.len(),
                complete = complete.len(),
                "some faces have incomplete landmarks; their descriptors are omitted"
            );
        }

        let flat: Vec<_> = complete
            .iter()
            .flat_map(|&i| raw[i].points.iter().copied())
            .collect();

        let descriptors = self.with_engine(|engine| {
            let values = engine
                .encode(image, &flat, per_face, jitters)
                .map_err(|e| RecognizerError::engine("face encoding", e))?;

            let expected = complete.len() * DESCRIPTOR_LEN;
            if values.len() != expected {
                return Err(RecognizerError::inference(
                    "face encoding",
                    format!(
                        "expected {expected} values for {} faces, got {}",
                        complete.len(),
                        values.len()
                    ),
                ));
            }

            tracing::debug!(faces = complete.len(), jitters, "computed descriptors");
            values
                .chunks_exact(DESCRIPTOR_LEN)
                .map(|chunk| {
                    Descriptor::try_from(chunk)
                        .map_err(|e| RecognizerError::inference("face encoding", e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        for (slot, descriptor) in complete.into_iter().zip(descriptors) {
            slots[slot] = Some(descriptor);
        }
        Ok(slots)
    }
}
