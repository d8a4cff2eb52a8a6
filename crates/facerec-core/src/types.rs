use crate::landmarks::Landmarks;
use crate::recognizer::RecognizerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of values in a face descriptor.
pub const DESCRIPTOR_LEN: usize = 128;

/// A 2D landmark coordinate in integer pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Face region in CSS order: top, right, bottom, left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
    pub left: i64,
}

impl BoundingBox {
    pub const fn new(top: i64, right: i64, bottom: i64, left: i64) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    /// Clamp every side independently into `[0, width] × [0, height]`.
    ///
    /// The result may have zero or negative area; callers treat that as
    /// "no region".
    pub fn clamp_to(&self, height: u32, width: u32) -> Self {
        let h = i64::from(height);
        let w = i64::from(width);
        Self {
            top: self.top.clamp(0, h),
            right: self.right.clamp(0, w),
            bottom: self.bottom.clamp(0, h),
            left: self.left.clamp(0, w),
        }
    }

    pub fn width(&self) -> i64 {
        self.right - self.left
    }

    pub fn height(&self) -> i64 {
        self.bottom - self.top
    }

    /// True when the box covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width() * self.height()
        }
    }
}

/// Which face detector the inference engine should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorModel {
    /// Fast approximate detector.
    #[default]
    Fast,
    /// Slower detector with higher recall.
    Accurate,
}

impl DetectorModel {
    pub const fn name(self) -> &'static str {
        match self {
            DetectorModel::Fast => "fast",
            DetectorModel::Accurate => "accurate",
        }
    }
}

impl fmt::Display for DetectorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DetectorModel {
    type Err = RecognizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "hog" => Ok(DetectorModel::Fast),
            "accurate" | "cnn" => Ok(DetectorModel::Accurate),
            other => Err(RecognizerError::UnsupportedModel(format!(
                "detector '{other}' (valid: fast, accurate)"
            ))),
        }
    }
}

/// Which landmark predictor the inference engine should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LandmarkModel {
    /// 68-point predictor.
    #[default]
    Large,
    /// 5-point predictor.
    Small,
}

impl LandmarkModel {
    /// Fixed number of points the model emits per face.
    pub const fn points_per_face(self) -> usize {
        match self {
            LandmarkModel::Large => 68,
            LandmarkModel::Small => 5,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            LandmarkModel::Large => "large",
            LandmarkModel::Small => "small",
        }
    }
}

impl fmt::Display for LandmarkModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LandmarkModel {
    type Err = RecognizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "large" | "68" => Ok(LandmarkModel::Large),
            "small" | "5" => Ok(LandmarkModel::Small),
            other => Err(RecognizerError::UnsupportedModel(format!(
                "landmark model '{other}' (valid: large, small)"
            ))),
        }
    }
}

/// 128-value face descriptor. Lower Euclidean distance means more similar faces.
///
/// Serialized as a plain array of numbers; deserialization rejects any other length.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Descriptor([f64; DESCRIPTOR_LEN]);

impl Descriptor {
    pub const fn new(values: [f64; DESCRIPTOR_LEN]) -> Self {
        Self(values)
    }

    pub const fn zeros() -> Self {
        Self([0.0; DESCRIPTOR_LEN])
    }

    pub fn values(&self) -> &[f64; DESCRIPTOR_LEN] {
        &self.0
    }

    pub fn values_mut(&mut self) -> &mut [f64; DESCRIPTOR_LEN] {
        &mut self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.0.iter()
    }

    /// Euclidean distance to another descriptor.
    pub fn distance(&self, other: &Descriptor) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    /// Euclidean norm.
    pub fn magnitude(&self) -> f64 {
        self.0.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        Self::zeros()
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Descriptor").field(&&self.0[..]).finish()
    }
}

impl std::ops::Index<usize> for Descriptor {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl std::ops::IndexMut<usize> for Descriptor {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.0[index]
    }
}

impl From<[f64; DESCRIPTOR_LEN]> for Descriptor {
    fn from(values: [f64; DESCRIPTOR_LEN]) -> Self {
        Self(values)
    }
}

impl From<Descriptor> for Vec<f64> {
    fn from(d: Descriptor) -> Self {
        d.0.to_vec()
    }
}

/// A descriptor was built from the wrong number of values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("descriptor must have {DESCRIPTOR_LEN} values, got {0}")]
pub struct DescriptorLengthError(pub usize);

impl TryFrom<&[f64]> for Descriptor {
    type Error = DescriptorLengthError;

    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        let array: [f64; DESCRIPTOR_LEN] = values
            .try_into()
            .map_err(|_| DescriptorLengthError(values.len()))?;
        Ok(Self(array))
    }
}

impl TryFrom<Vec<f64>> for Descriptor {
    type Error = DescriptorLengthError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Self::try_from(values.as_slice())
    }
}

/// One detection result from the combined pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub location: BoundingBox,
    /// Named contours, present when the landmark stage produced a full point set.
    pub landmarks: Option<Landmarks>,
    /// Descriptor, present when the encoding stage produced one for this face.
    pub descriptor: Option<Descriptor>,
}

/// A persisted identity: display name, descriptor and optional free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedDescriptor {
    pub name: String,
    pub encoding: Descriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl NamedDescriptor {
    pub fn new(name: impl Into<String>, encoding: Descriptor) -> Self {
        Self {
            name: name.into(),
            encoding,
            metadata: None,
        }
    }
}
