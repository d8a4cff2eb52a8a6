//! facerec-core — Face detection, landmark and descriptor pipeline.
//!
//! The pixel-level work is delegated to an [`InferenceEngine`]; this crate
//! orchestrates the stages, reconstructs named landmark contours, matches
//! 128-value descriptors and persists them.

pub mod buffer;
pub mod codec;
pub mod engine;
pub mod landmarks;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use buffer::{ImageError, PixelBuffer};
pub use codec::CodecError;
pub use engine::{EngineError, InferenceEngine};
pub use landmarks::{FaceLandmarks, FaceLandmarksSmall, Landmarks, RawLandmarks};
pub use matcher::{BestMatch, EuclideanMatcher, MatchResult, Matcher, DEFAULT_TOLERANCE};
pub use recognizer::{Recognizer, RecognizerError};
pub use types::{
    BoundingBox, Descriptor, DetectedFace, DetectorModel, LandmarkModel, NamedDescriptor, Point,
    DESCRIPTOR_LEN,
};
