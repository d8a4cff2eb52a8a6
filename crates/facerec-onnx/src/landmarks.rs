//! Landmark regression: one square crop per face in, `points × (x, y)`
//! normalized coordinates out.

use crate::alignment::warp_affine;
use crate::models::load_session;
use crate::OnnxError;
use facerec_core::{BoundingBox, PixelBuffer, Point};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

const LANDMARK_INPUT_SIZE: usize = 112;
/// Crop edge relative to the longer side of the face box.
const LANDMARK_CROP_SCALE: f32 = 1.2;

/// Square source region fed to the regressor, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CropRegion {
    x0: f32,
    y0: f32,
    size: f32,
}

impl CropRegion {
    fn around(face: &BoundingBox) -> Self {
        let cx = (face.left + face.right) as f32 / 2.0;
        let cy = (face.top + face.bottom) as f32 / 2.0;
        let size = (face.width().max(face.height()).max(1) as f32) * LANDMARK_CROP_SCALE;
        Self {
            x0: cx - size / 2.0,
            y0: cy - size / 2.0,
            size,
        }
    }

    /// Map a normalized `[0, 1]` coordinate pair back into the image.
    fn denormalize(&self, nx: f32, ny: f32) -> Point {
        Point::new(
            (self.x0 + nx * self.size).round() as i64,
            (self.y0 + ny * self.size).round() as i64,
        )
    }
}

/// ONNX landmark regressor producing a fixed number of points per face.
pub struct LandmarkPredictor {
    session: Mutex<Session>,
    points: usize,
    name: &'static str,
}

impl LandmarkPredictor {
    pub fn load(name: &'static str, model_path: &Path, points: usize) -> Result<Self, OnnxError> {
        let session = load_session(name, model_path)?;
        Ok(Self {
            session: Mutex::new(session),
            points,
            name,
        })
    }

    pub fn points(&self) -> usize {
        self.points
    }

    /// One `points`-long landmark set per face, in `faces` order.
    pub fn predict(
        &self,
        image: &PixelBuffer,
        faces: &[BoundingBox],
    ) -> Result<Vec<Vec<Point>>, OnnxError> {
        let mut out = Vec::with_capacity(faces.len());
        let mut session = self
            .session
            .lock()
            .map_err(|_| OnnxError::InferenceFailed(format!("{} session poisoned", self.name)))?;

        for face in faces {
            let region = CropRegion::around(face);
            let input = preprocess(image, &region);

            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, coords) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| OnnxError::InferenceFailed(format!("{} output: {e}", self.name)))?;

            out.push(decode(coords, self.points, &region)?);
        }

        Ok(out)
    }
}

/// Sample the crop region into a `[0, 1]`-scaled NCHW tensor.
fn preprocess(image: &PixelBuffer, region: &CropRegion) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE;
    let s = size as f32 / region.size;
    let crop = warp_affine(image, &[s, 0.0, -region.x0 * s, 0.0, s, -region.y0 * s], size);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (i, px) in crop.chunks_exact(3).enumerate() {
        let (y, x) = (i / size, i % size);
        for c in 0..3 {
            tensor[[0, c, y, x]] = px[c] as f32 / 255.0;
        }
    }
    tensor
}

fn decode(coords: &[f32], points: usize, region: &CropRegion) -> Result<Vec<Point>, OnnxError> {
    if coords.len() < points * 2 {
        return Err(OnnxError::InferenceFailed(format!(
            "expected {} landmark coordinates, got {}",
            points * 2,
            coords.len()
        )));
    }
    Ok(coords[..points * 2]
        .chunks_exact(2)
        .map(|xy| region.denormalize(xy[0], xy[1]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_region_square_and_centered() {
        let face = BoundingBox::new(100, 250, 300, 150);
        let r = CropRegion::around(&face);
        assert!((r.size - 240.0).abs() < 1e-4);
        assert!((r.x0 + r.size / 2.0 - 200.0).abs() < 1e-4);
        assert!((r.y0 + r.size / 2.0 - 200.0).abs() < 1e-4);
    }

    #[test]
    fn test_crop_region_degenerate_box() {
        let r = CropRegion::around(&BoundingBox::new(10, 10, 10, 10));
        assert!(r.size > 0.0);
    }

    #[test]
    fn test_decode_denormalizes() {
        let region = CropRegion {
            x0: 50.0,
            y0: 20.0,
            size: 100.0,
        };
        let points = decode(&[0.0, 0.0, 0.5, 0.25, 1.0, 1.0], 3, &region).unwrap();
        assert_eq!(
            points,
            vec![Point::new(50, 20), Point::new(100, 45), Point::new(150, 120)]
        );
    }

    #[test]
    fn test_decode_ignores_extra_outputs() {
        let region = CropRegion {
            x0: 0.0,
            y0: 0.0,
            size: 10.0,
        };
        let points = decode(&[0.1, 0.2, 0.9, 0.9], 1, &region).unwrap();
        assert_eq!(points, vec![Point::new(1, 2)]);
    }

    #[test]
    fn test_decode_short_output_fails() {
        let region = CropRegion {
            x0: 0.0,
            y0: 0.0,
            size: 10.0,
        };
        assert!(matches!(
            decode(&[0.1; 9], 5, &region),
            Err(OnnxError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_preprocess_scales_to_unit_range() {
        let mut image = PixelBuffer::new(20, 20);
        for y in 0..20 {
            for x in 0..20 {
                image.set(x, y, [255, 0, 51]);
            }
        }
        let region = CropRegion {
            x0: 0.0,
            y0: 0.0,
            size: 20.0,
        };
        let t = preprocess(&image, &region);
        assert_eq!(t.shape(), &[1, 3, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE]);
        assert!((t[[0, 0, 50, 50]] - 1.0).abs() < 1e-6);
        assert!(t[[0, 1, 50, 50]].abs() < 1e-6);
        assert!((t[[0, 2, 50, 50]] - 0.2).abs() < 1e-6);
    }
}
