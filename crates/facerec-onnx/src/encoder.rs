//! 128-dimensional face descriptor network via ONNX Runtime.
//!
//! Each face is aligned to a 150×150 RGB chip from its landmarks. With
//! jittering, the descriptor is the mean over several randomly perturbed
//! chips; the first chip is always the unperturbed one.

use crate::alignment::{self, reference_anchors};
use crate::models::load_session;
use crate::OnnxError;
use facerec_core::{PixelBuffer, Point, DESCRIPTOR_LEN};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::Mutex;

const CHIP_SIZE: usize = 150;
/// Per-channel RGB means subtracted before scaling.
const CHIP_MEAN: [f32; 3] = [122.782, 117.001, 104.298];
const CHIP_SCALE: f32 = 256.0;

const JITTER_SEED: u64 = 0x5eed_face;
const JITTER_MAX_ROTATION: f32 = 3.0 * std::f32::consts::PI / 180.0;
const JITTER_SCALE_RANGE: f32 = 0.05;
/// Maximum translation as a fraction of the chip edge.
const JITTER_MAX_SHIFT: f32 = 0.02;

/// One perturbation applied to the chip's destination anchors.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Jitter {
    angle: f32,
    scale: f32,
    shift: (f32, f32),
    mirror: bool,
}

impl Jitter {
    const IDENTITY: Self = Self {
        angle: 0.0,
        scale: 1.0,
        shift: (0.0, 0.0),
        mirror: false,
    };

    fn random(rng: &mut StdRng) -> Self {
        let max_shift = JITTER_MAX_SHIFT * CHIP_SIZE as f32;
        Self {
            angle: rng.gen_range(-JITTER_MAX_ROTATION..=JITTER_MAX_ROTATION),
            scale: rng.gen_range(1.0 - JITTER_SCALE_RANGE..=1.0 + JITTER_SCALE_RANGE),
            shift: (
                rng.gen_range(-max_shift..=max_shift),
                rng.gen_range(-max_shift..=max_shift),
            ),
            mirror: rng.gen_bool(0.5),
        }
    }

    /// Rotate and scale `anchors` about the chip centre, then translate.
    fn apply(&self, anchors: &[(f32, f32)]) -> Vec<(f32, f32)> {
        let c = CHIP_SIZE as f32 / 2.0;
        let (sin, cos) = self.angle.sin_cos();
        anchors
            .iter()
            .map(|&(x, y)| {
                let (dx, dy) = (x - c, y - c);
                (
                    c + self.scale * (cos * dx - sin * dy) + self.shift.0,
                    c + self.scale * (sin * dx + cos * dy) + self.shift.1,
                )
            })
            .collect()
    }
}

/// `count` perturbations, the first always the identity. Deterministic for
/// a given seed.
fn jitter_plan(count: u32, seed: u64) -> Vec<Jitter> {
    let mut rng = StdRng::seed_from_u64(seed);
    std::iter::once(Jitter::IDENTITY)
        .chain(std::iter::repeat_with(|| Jitter::random(&mut rng)))
        .take(count.max(1) as usize)
        .collect()
}

/// Seed derived from the face's landmarks, so repeated calls agree.
fn seed_for(points: &[Point]) -> u64 {
    points.iter().fold(JITTER_SEED, |acc, p| {
        acc.wrapping_mul(0x100_0000_01b3)
            .wrapping_add((p.x as u64) ^ ((p.y as u64) << 32))
    })
}

/// Descriptor network wrapper.
pub struct FaceEncoder {
    session: Mutex<Session>,
}

impl FaceEncoder {
    pub fn load(model_path: &Path) -> Result<Self, OnnxError> {
        let session = load_session("encoder", model_path)?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Descriptors for every face in `landmarks` (flattened,
    /// `points_per_face` per face), `DESCRIPTOR_LEN` values each.
    pub fn encode(
        &self,
        image: &PixelBuffer,
        landmarks: &[Point],
        points_per_face: usize,
        jitters: u32,
    ) -> Result<Vec<f64>, OnnxError> {
        if points_per_face == 0 {
            return Ok(Vec::new());
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| OnnxError::InferenceFailed("encoder session poisoned".into()))?;
        let references = reference_anchors(CHIP_SIZE);
        let mut out = Vec::with_capacity(landmarks.len() / points_per_face * DESCRIPTOR_LEN);

        for face in landmarks.chunks_exact(points_per_face) {
            let anchors = alignment::anchors_from_landmarks(face).ok_or_else(|| {
                OnnxError::InferenceFailed(format!(
                    "cannot align a face from {points_per_face} landmarks"
                ))
            })?;
            let plan = jitter_plan(jitters, seed_for(face));

            let mut sum = [0.0f64; DESCRIPTOR_LEN];
            for jitter in &plan {
                let dst = jitter.apply(&references[..anchors.len()]);
                let mut chip = alignment::align_face(image, &anchors, &dst, CHIP_SIZE);
                if jitter.mirror {
                    alignment::mirror_chip(&mut chip, CHIP_SIZE);
                }

                let input = preprocess(&chip);
                let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
                let (_, raw) = outputs[0]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| OnnxError::InferenceFailed(format!("descriptor extraction: {e}")))?;

                if raw.len() != DESCRIPTOR_LEN {
                    return Err(OnnxError::InferenceFailed(format!(
                        "expected {DESCRIPTOR_LEN}-dim descriptor, got {}",
                        raw.len()
                    )));
                }
                for (acc, &v) in sum.iter_mut().zip(raw) {
                    *acc += f64::from(v);
                }
            }

            let n = plan.len() as f64;
            out.extend(sum.iter().map(|v| v / n));
        }

        Ok(out)
    }
}

/// Packed RGB chip to NCHW tensor: mean-subtracted and scaled per channel.
fn preprocess(chip: &[u8]) -> Array4<f32> {
    let size = CHIP_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (i, px) in chip.chunks_exact(3).take(size * size).enumerate() {
        let (y, x) = (i / size, i % size);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (px[c] as f32 - CHIP_MEAN[c]) / CHIP_SCALE;
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let chip = vec![128u8; CHIP_SIZE * CHIP_SIZE * 3];
        assert_eq!(preprocess(&chip).shape(), &[1, 3, CHIP_SIZE, CHIP_SIZE]);
    }

    #[test]
    fn test_preprocess_per_channel_means() {
        let chip: Vec<u8> = std::iter::repeat([200u8, 100, 50])
            .take(CHIP_SIZE * CHIP_SIZE)
            .flatten()
            .collect();
        let t = preprocess(&chip);
        assert!((t[[0, 0, 3, 4]] - (200.0 - 122.782) / 256.0).abs() < 1e-6);
        assert!((t[[0, 1, 3, 4]] - (100.0 - 117.001) / 256.0).abs() < 1e-6);
        assert!((t[[0, 2, 3, 4]] - (50.0 - 104.298) / 256.0).abs() < 1e-6);
    }

    #[test]
    fn test_jitter_plan_starts_with_identity() {
        let plan = jitter_plan(5, 42);
        assert_eq!(plan.len(), 5);
        assert_eq!(plan[0], Jitter::IDENTITY);
        assert!(plan[1..].iter().all(|j| *j != Jitter::IDENTITY));
    }

    #[test]
    fn test_jitter_plan_minimum_one() {
        assert_eq!(jitter_plan(0, 1), vec![Jitter::IDENTITY]);
    }

    #[test]
    fn test_jitter_plan_deterministic() {
        assert_eq!(jitter_plan(4, 7), jitter_plan(4, 7));
    }

    #[test]
    fn test_jitter_bounds() {
        let max_shift = JITTER_MAX_SHIFT * CHIP_SIZE as f32;
        for j in jitter_plan(50, 3) {
            assert!(j.angle.abs() <= JITTER_MAX_ROTATION);
            assert!((j.scale - 1.0).abs() <= JITTER_SCALE_RANGE + 1e-6);
            assert!(j.shift.0.abs() <= max_shift && j.shift.1.abs() <= max_shift);
        }
    }

    #[test]
    fn test_identity_jitter_keeps_anchors() {
        let refs = reference_anchors(CHIP_SIZE);
        let moved = Jitter::IDENTITY.apply(&refs);
        for (a, b) in refs.iter().zip(&moved) {
            assert!((a.0 - b.0).abs() < 1e-4 && (a.1 - b.1).abs() < 1e-4);
        }
    }

    #[test]
    fn test_jitter_shift_translates() {
        let j = Jitter {
            shift: (2.0, -1.0),
            ..Jitter::IDENTITY
        };
        assert_eq!(j.apply(&[(10.0, 10.0)]), vec![(12.0, 9.0)]);
    }

    #[test]
    fn test_seed_depends_on_points() {
        let a = [Point::new(1, 2), Point::new(3, 4)];
        let b = [Point::new(1, 2), Point::new(3, 5)];
        assert_eq!(seed_for(&a), seed_for(&a));
        assert_ne!(seed_for(&a), seed_for(&b));
    }
}
