//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the RGB image into a square canvas, decodes the three
//! anchor-free stride heads and suppresses overlaps with NMS. Upsampling
//! enlarges the canvas so small faces cover more anchors.

use crate::alignment::warp_affine;
use crate::models::load_session;
use crate::OnnxError;
use facerec_core::{BoundingBox, PixelBuffer};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MAX_INPUT_SIZE: usize = 1920;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Placement of the source image inside the detector canvas.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// A candidate box in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Detection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

impl Detection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn to_box(self) -> BoundingBox {
        BoundingBox::new(
            self.y1.round() as i64,
            self.x2.round() as i64,
            self.y2.round() as i64,
            self.x1.round() as i64,
        )
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Mutex<Session>,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, OnnxError> {
        let session = load_session("detector", model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 6 {
            return Err(OnnxError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            stride_indices,
        })
    }

    /// Detect faces, returning boxes in descending confidence order.
    /// `upsample` of 1 is the native canvas; each step adds another
    /// multiple of it, up to the maximum canvas.
    pub fn detect(&self, image: &PixelBuffer, upsample: u32) -> Result<Vec<BoundingBox>, OnnxError> {
        let size = canvas_size(upsample);
        let (input, letterbox) = preprocess(image, size);

        let mut session = self
            .session
            .lock()
            .map_err(|_| OnnxError::InferenceFailed("detector session poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| OnnxError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| OnnxError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                size,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let kept = nms(all_detections, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = kept.len(), canvas = size, "SCRFD detection");
        Ok(kept.into_iter().map(Detection::to_box).collect())
    }
}

/// Square canvas edge for an upsample level, a multiple of the largest stride.
fn canvas_size(upsample: u32) -> usize {
    (SCRFD_INPUT_SIZE * upsample.max(1) as usize).min(SCRFD_MAX_INPUT_SIZE)
}

/// Letterbox `image` into a `size`×`size` NCHW tensor in SCRFD's input range.
/// The padding is black, as in the reference preprocessing.
fn preprocess(image: &PixelBuffer, size: usize) -> (Array4<f32>, Letterbox) {
    let (w, h) = (image.width().max(1) as f32, image.height().max(1) as f32);
    let scale = (size as f32 / w).min(size as f32 / h);
    let pad_x = ((size as f32 - (w * scale).round()) / 2.0).floor();
    let pad_y = ((size as f32 - (h * scale).round()) / 2.0).floor();
    let letterbox = Letterbox { scale, pad_x, pad_y };

    let canvas = warp_affine(image, &[scale, 0.0, pad_x, 0.0, scale, pad_y], size);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (i, px) in canvas.chunks_exact(3).enumerate() {
        let (y, x) = (i / size, i % size);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (px[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Discover output tensor ordering by name.
///
/// SCRFD exports either name their heads ("score_8", "bbox_16", ...) or use
/// generic numeric names. Unrecognized names fall back to the standard
/// positional ordering: [0-2] scores, [3-5] bboxes, [6-8] keypoints.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(v) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [v[0], v[1], v[2]]
        }
        None => {
            tracing::info!(
                ?names,
                "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
            );
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level into source-image pixels.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    canvas: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let grid = canvas / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let off = idx * 4;
        let Some(d) = bboxes.get(off..off + 4) else {
            continue;
        };

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid) as f32 * s;
        let anchor_cy = (anchor_idx / grid) as f32 * s;

        let unmap_x = |v: f32| (v - letterbox.pad_x) / letterbox.scale;
        let unmap_y = |v: f32| (v - letterbox.pad_y) / letterbox.scale;

        detections.push(Detection {
            x1: unmap_x(anchor_cx - d[0] * s),
            y1: unmap_y(anchor_cy - d[1] * s),
            x2: unmap_x(anchor_cx + d[2] * s),
            y2: unmap_y(anchor_cy + d[3] * s),
            confidence: score,
        });
    }

    detections
}

/// Non-Maximum Suppression. Output is in descending confidence order.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i]);

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let inter = Detection {
        x1: a.x1.max(b.x1),
        y1: a.y1.max(b.y1),
        x2: a.x2.min(b.x2),
        y2: a.y2.min(b.y2),
        confidence: 0.0,
    }
    .area();

    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
