//! Face-chip alignment via a 4-DOF similarity transform.
//!
//! Maps landmark-derived anchor points (eye centres, nose, mouth corners)
//! onto canonical positions with a least-squares similarity fit, then warps
//! the RGB image into a square chip for the descriptor network.

use facerec_core::{PixelBuffer, Point};

/// Canonical anchor positions in a 112×112 chip: left eye, right eye, nose,
/// left mouth corner, right mouth corner.
const REFERENCE_ANCHORS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Reference anchors rescaled to a `size`×`size` chip.
pub fn reference_anchors(size: usize) -> [(f32, f32); 5] {
    let s = size as f32 / 112.0;
    REFERENCE_ANCHORS_112.map(|(x, y)| (x * s, y * s))
}

fn mean(points: &[Point]) -> (f32, f32) {
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x as f32, sy + p.y as f32));
    (sx / n, sy / n)
}

fn as_f32(p: Point) -> (f32, f32) {
    (p.x as f32, p.y as f32)
}

/// Anchor points for one face, in the order of [`reference_anchors`].
///
/// 68-point sets give all five anchors; 5-point sets give eyes and nose only.
/// Returns `None` for any other layout.
pub fn anchors_from_landmarks(points: &[Point]) -> Option<Vec<(f32, f32)>> {
    match points.len() {
        68 => Some(vec![
            mean(&points[36..42]),
            mean(&points[42..48]),
            as_f32(points[30]),
            as_f32(points[48]),
            as_f32(points[54]),
        ]),
        5 => Some(vec![
            mean(&points[2..4]),
            mean(&points[0..2]),
            as_f32(points[4]),
        ]),
        _ => None,
    }
}

/// Estimate a 2×3 similarity transform (scale, rotation, translation) taking
/// `src` onto `dst` in the least-squares sense. Uses the first
/// `min(src.len(), dst.len())` pairs.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
pub fn estimate_similarity_transform(src: &[(f32, f32)], dst: &[(f32, f32)]) -> [f32; 6] {
    // Normal equations of A * [a, b, tx, ty]^T = B, two rows per pair:
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16];
    let mut atb = [0.0f32; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            // Degenerate anchors (e.g. all coincident): identity scale.
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Warp `image` through `matrix` into a packed `out_size`×`out_size` RGB chip.
///
/// Bilinear sampling; pixels mapped from outside the image are black.
pub fn warp_affine(image: &PixelBuffer, matrix: &[f32; 6], out_size: usize) -> Vec<u8> {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    let mut output = vec![0u8; out_size * out_size * 3];

    // M = [[a, -b], [b, a]], det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return output;
    }
    let ia = a / det;
    let ib = b / det;

    let (w, h) = (image.width() as i64, image.height() as i64);
    let sample = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            image
                .get(x as u32, y as u32)
                .map(|p| p.map(f32::from))
                .unwrap_or([0.0; 3])
        } else {
            [0.0; 3]
        }
    };

    for oy in 0..out_size {
        for ox in 0..out_size {
            // src = M^-1 * (dst - t)
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let tl = sample(x0, y0);
            let tr = sample(x0 + 1, y0);
            let bl = sample(x0, y0 + 1);
            let br = sample(x0 + 1, y0 + 1);

            let off = (oy * out_size + ox) * 3;
            for c in 0..3 {
                let val = tl[c] * (1.0 - fx) * (1.0 - fy)
                    + tr[c] * fx * (1.0 - fy)
                    + bl[c] * (1.0 - fx) * fy
                    + br[c] * fx * fy;
                output[off + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    output
}

/// Mirror a packed RGB chip left to right in place.
pub fn mirror_chip(chip: &mut [u8], size: usize) {
    for row in chip.chunks_exact_mut(size * 3) {
        for x in 0..size / 2 {
            let (l, r) = (x * 3, (size - 1 - x) * 3);
            for c in 0..3 {
                row.swap(l + c, r + c);
            }
        }
    }
}

/// Warp the face whose anchors are `src` so they land on `dst` in a
/// `size`×`size` chip.
pub fn align_face(
    image: &PixelBuffer,
    src: &[(f32, f32)],
    dst: &[(f32, f32)],
    size: usize,
) -> Vec<u8> {
    let matrix = estimate_similarity_transform(src, dst);
    warp_affine(image, &matrix, size)
}
