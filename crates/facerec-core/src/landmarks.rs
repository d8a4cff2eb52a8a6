//! Landmark point sets and their reconstruction into named contours.
//!
//! The 68-point layout stores the outer and inner lip boundaries once each,
//! so both lip contours are stitched together from the two runs to form
//! closed polygons.

use crate::types::Point;
use serde::{Deserialize, Serialize};
use std::ops::Range;

const JAWLINE: Range<usize> = 0..17;
const LEFT_EYEBROW: Range<usize> = 17..22;
const RIGHT_EYEBROW: Range<usize> = 22..27;
const NOSE_BRIDGE: Range<usize> = 27..31;
const NOSE_TIP: Range<usize> = 31..36;
const LEFT_EYE: Range<usize> = 36..42;
const RIGHT_EYE: Range<usize> = 42..48;
/// Outer lip from the left mouth corner over the top to the right corner.
const UPPER_LIP_OUTER: Range<usize> = 48..55;
/// Inner upper lip walked right to left, back towards the left corner.
const UPPER_LIP_INNER: [usize; 5] = [64, 63, 62, 61, 60];
/// Outer lip from the right mouth corner along the bottom.
const LOWER_LIP_OUTER: Range<usize> = 54..60;
const MOUTH_LEFT_CORNER: usize = 48;
/// Inner lower lip walked left to right.
const LOWER_LIP_INNER: [usize; 5] = [60, 67, 66, 65, 64];

const SMALL_NOSE_TIP: usize = 4;
const SMALL_LEFT_EYE: Range<usize> = 2..4;
const SMALL_RIGHT_EYE: Range<usize> = 0..2;

/// Flat landmark output for one face, in model order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawLandmarks {
    pub points: Vec<Point>,
}

impl RawLandmarks {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn run(&self, range: Range<usize>) -> Vec<Point> {
        self.points[range].to_vec()
    }

    fn pick<'a>(&'a self, indices: &'a [usize]) -> impl Iterator<Item = Point> + 'a {
        indices.iter().map(move |&i| self.points[i])
    }
}

/// Contours from the 68-point model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub jawline: Vec<Point>,
    pub left_eyebrow: Vec<Point>,
    pub right_eyebrow: Vec<Point>,
    pub nose_bridge: Vec<Point>,
    pub nose_tip: Vec<Point>,
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
    pub upper_lip: Vec<Point>,
    pub lower_lip: Vec<Point>,
}

impl FaceLandmarks {
    /// Group a 68-point set into contours. Returns `None` for shorter sets.
    pub fn from_raw(raw: &RawLandmarks) -> Option<Self> {
        if raw.len() < 68 {
            return None;
        }

        let mut upper_lip = raw.run(UPPER_LIP_OUTER);
        upper_lip.extend(raw.pick(&UPPER_LIP_INNER));

        let mut lower_lip = raw.run(LOWER_LIP_OUTER);
        lower_lip.push(raw.points[MOUTH_LEFT_CORNER]);
        lower_lip.extend(raw.pick(&LOWER_LIP_INNER));

        Some(Self {
            jawline: raw.run(JAWLINE),
            left_eyebrow: raw.run(LEFT_EYEBROW),
            right_eyebrow: raw.run(RIGHT_EYEBROW),
            nose_bridge: raw.run(NOSE_BRIDGE),
            nose_tip: raw.run(NOSE_TIP),
            left_eye: raw.run(LEFT_EYE),
            right_eye: raw.run(RIGHT_EYE),
            upper_lip,
            lower_lip,
        })
    }

    /// True for the placeholder left where a face had too few points.
    pub fn is_empty(&self) -> bool {
        self.contours().iter().all(|(_, pts)| pts.is_empty())
    }

    /// All contours with their names, in model order.
    pub fn contours(&self) -> [(&'static str, &[Point]); 9] {
        [
            ("jawline", self.jawline.as_slice()),
            ("left_eyebrow", self.left_eyebrow.as_slice()),
            ("right_eyebrow", self.right_eyebrow.as_slice()),
            ("nose_bridge", self.nose_bridge.as_slice()),
            ("nose_tip", self.nose_tip.as_slice()),
            ("left_eye", self.left_eye.as_slice()),
            ("right_eye", self.right_eye.as_slice()),
            ("upper_lip", self.upper_lip.as_slice()),
            ("lower_lip", self.lower_lip.as_slice()),
        ]
    }
}

/// Contours from the 5-point model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FaceLandmarksSmall {
    pub nose_tip: Vec<Point>,
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
}

impl FaceLandmarksSmall {
    /// Group a 5-point set into contours. Returns `None` for shorter sets.
    pub fn from_raw(raw: &RawLandmarks) -> Option<Self> {
        if raw.len() < 5 {
            return None;
        }
        Some(Self {
            nose_tip: vec![raw.points[SMALL_NOSE_TIP]],
            left_eye: raw.run(SMALL_LEFT_EYE),
            right_eye: raw.run(SMALL_RIGHT_EYE),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.nose_tip.is_empty() && self.left_eye.is_empty() && self.right_eye.is_empty()
    }
}

/// Contours from either landmark model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum Landmarks {
    Large(FaceLandmarks),
    Small(FaceLandmarksSmall),
}

impl Landmarks {
    pub fn is_empty(&self) -> bool {
        match self {
            Landmarks::Large(l) => l.is_empty(),
            Landmarks::Small(s) => s.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Point `i` sits at (i, 100 + i) so every index is recognisable.
    fn indexed(n: usize) -> RawLandmarks {
        RawLandmarks::new(
            (0..n as i64)
                .map(|i| Point::new(i, 100 + i))
                .collect(),
        )
    }

    fn indices(points: &[Point]) -> Vec<i64> {
        points.iter().map(|p| p.x).collect()
    }

    #[test]
    fn test_contour_lengths() {
        let lm = FaceLandmarks::from_raw(&indexed(68)).unwrap();
        let lens: Vec<usize> = lm.contours().iter().map(|(_, p)| p.len()).collect();
        assert_eq!(lens, vec![17, 5, 5, 4, 5, 6, 6, 12, 12]);
    }

    #[test]
    fn test_simple_ranges() {
        let lm = FaceLandmarks::from_raw(&indexed(68)).unwrap();
        assert_eq!(indices(&lm.jawline), (0..17).collect::<Vec<_>>());
        assert_eq!(indices(&lm.left_eyebrow), (17..22).collect::<Vec<_>>());
        assert_eq!(indices(&lm.right_eyebrow), (22..27).collect::<Vec<_>>());
        assert_eq!(indices(&lm.nose_bridge), (27..31).collect::<Vec<_>>());
        assert_eq!(indices(&lm.nose_tip), (31..36).collect::<Vec<_>>());
        assert_eq!(indices(&lm.left_eye), (36..42).collect::<Vec<_>>());
        assert_eq!(indices(&lm.right_eye), (42..48).collect::<Vec<_>>());
    }

    #[test]
    fn test_upper_lip_loop() {
        let raw = indexed(68);
        let lm = FaceLandmarks::from_raw(&raw).unwrap();
        assert_eq!(
            indices(&lm.upper_lip),
            vec![48, 49, 50, 51, 52, 53, 54, 64, 63, 62, 61, 60]
        );
        assert_eq!(lm.upper_lip.last(), Some(&raw.points[60]));
    }

    #[test]
    fn test_lower_lip_loop() {
        let raw = indexed(68);
        let lm = FaceLandmarks::from_raw(&raw).unwrap();
        assert_eq!(
            indices(&lm.lower_lip),
            vec![54, 55, 56, 57, 58, 59, 48, 60, 67, 66, 65, 64]
        );
        // The outer run closes back on the left mouth corner before the inner run.
        assert_eq!(lm.lower_lip[6], raw.points[48]);
    }

    #[test]
    fn test_short_set_is_rejected() {
        assert!(FaceLandmarks::from_raw(&indexed(67)).is_none());
        assert!(FaceLandmarksSmall::from_raw(&indexed(4)).is_none());
        assert!(FaceLandmarks::default().is_empty());
    }

    #[test]
    fn test_small_mapping() {
        let lm = FaceLandmarksSmall::from_raw(&indexed(5)).unwrap();
        assert_eq!(indices(&lm.nose_tip), vec![4]);
        assert_eq!(indices(&lm.left_eye), vec![2, 3]);
        assert_eq!(indices(&lm.right_eye), vec![0, 1]);
        assert!(!lm.is_empty());
    }

    #[test]
    fn test_landmarks_tagged_json() {
        let lm = Landmarks::Small(FaceLandmarksSmall::from_raw(&indexed(5)).unwrap());
        let json = serde_json::to_value(&lm).unwrap();
        assert_eq!(json["model"], "small");
        let back: Landmarks = serde_json::from_value(json).unwrap();
        assert_eq!(back, lm);
    }
}
