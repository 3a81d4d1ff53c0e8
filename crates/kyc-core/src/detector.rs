//! SCRFD face detection (InsightFace `det_10g.onnx`).
//!
//! The image is letterboxed into a square input, the three feature strides
//! (8, 16, 32) are decoded from anchor-centre distances, and overlapping
//! boxes are suppressed. Boxes and landmarks come back in source-image pixels.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;

use crate::decode::PixelGrid;
use crate::face::{BoundingBox, Landmarks};
use crate::session::{load_session, output_names, ExecutionTarget};

const STRIDES: [u32; 3] = [8, 16, 32];
const NUM_ANCHORS: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("failed to load detector model {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },
    #[error("detector inference failed: {0}")]
    Inference(#[from] ort::Error),
    #[error("detector model has {0} outputs (expected 6 or 9)")]
    UnexpectedOutputs(usize),
    #[error("detector output {name} is malformed: {message}")]
    MalformedOutput { name: String, message: String },
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Square model input edge, in pixels.
    pub input_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            score_threshold: 0.5,
            nms_threshold: 0.4,
        }
    }
}

/// A raw detection before embedding extraction.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub score: f32,
    pub landmarks: Landmarks,
}

pub struct FaceDetector {
    session: Session,
    input_name: String,
    outputs: Vec<String>,
    config: DetectorConfig,
}

impl FaceDetector {
    pub fn load(
        path: &Path,
        target: ExecutionTarget,
        config: DetectorConfig,
    ) -> Result<Self, DetectorError> {
        let session = load_session(path, target).map_err(|source| DetectorError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let outputs = output_names(&session);
        if outputs.len() != 6 && outputs.len() != 9 {
            return Err(DetectorError::UnexpectedOutputs(outputs.len()));
        }
        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .unwrap_or_else(|| "input.1".to_string());

        Ok(Self {
            session,
            input_name,
            outputs,
            config,
        })
    }

    /// Detect faces, highest score first.
    pub fn detect(&mut self, grid: &PixelGrid) -> Result<Vec<Detection>, DetectorError> {
        let size = self.config.input_size;
        let (input, det_scale) = letterbox(grid, size);
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])?;

        let mut tensors: Vec<Vec<f32>> = Vec::with_capacity(self.outputs.len());
        for name in &self.outputs {
            let value = outputs
                .get(name.as_str())
                .ok_or_else(|| DetectorError::MalformedOutput {
                    name: name.clone(),
                    message: "missing".to_string(),
                })?;
            let (_, data) = value.try_extract_tensor::<f32>()?;
            tensors.push(data.to_vec());
        }
        drop(outputs);

        let with_kps = tensors.len() == 9;
        let mut proposals = Vec::new();
        for (i, &stride) in STRIDES.iter().enumerate() {
            let scores = &tensors[i];
            let bboxes = &tensors[i + 3];
            let kps = with_kps.then(|| tensors[i + 6].as_slice());

            if bboxes.len() != scores.len() * 4 {
                return Err(DetectorError::MalformedOutput {
                    name: self.outputs[i + 3].clone(),
                    message: format!("{} box values for {} scores", bboxes.len(), scores.len()),
                });
            }

            proposals.extend(decode_stride(
                scores,
                bboxes,
                kps,
                stride,
                size,
                self.config.score_threshold,
            ));
        }

        let kept = nms(proposals, self.config.nms_threshold);
        let detections = rescale(kept, det_scale, grid.width() as f32, grid.height() as f32);
        tracing::debug!(faces = detections.len(), "scrfd detection complete");
        Ok(detections)
    }
}

/// Resize into the top-left corner of a square canvas keeping aspect ratio,
/// then normalize to `(v - 127.5) / 128` in NCHW RGB order.
///
/// Returns the tensor and the scale factor from source to model pixels.
pub(crate) fn letterbox(grid: &PixelGrid, size: u32) -> (Array4<f32>, f32) {
    let (w, h) = (grid.width() as f32, grid.height() as f32);
    let (new_w, new_h) = if h / w > 1.0 {
        (((size as f32) * w / h).max(1.0) as u32, size)
    } else {
        (size, ((size as f32) * h / w).max(1.0) as u32)
    };
    let det_scale = new_h as f32 / h;

    let resized = image::imageops::resize(grid.rgb(), new_w, new_h, FilterType::Triangle);

    let pad = (0.0 - 127.5) / 128.0;
    let mut input = Array4::<f32>::from_elem((1, 3, size as usize, size as usize), pad);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - 127.5) / 128.0;
        }
    }

    (input, det_scale)
}

/// Decode one stride's predictions into model-space detections.
///
/// Anchors sit on a row-major grid of `input_size / stride` cells with two
/// anchors per cell; predictions are distances from the anchor centre in
/// units of the stride.
pub(crate) fn decode_stride(
    scores: &[f32],
    bbox_preds: &[f32],
    kps_preds: Option<&[f32]>,
    stride: u32,
    input_size: u32,
    threshold: f32,
) -> Vec<Detection> {
    let cells = (input_size / stride).max(1) as usize;
    let s = stride as f32;
    let mut out = Vec::new();

    for (idx, &score) in scores.iter().enumerate() {
        if score < threshold {
            continue;
        }
        let Some(d) = bbox_preds.get(idx * 4..idx * 4 + 4) else {
            break;
        };
        let cell = idx / NUM_ANCHORS;
        let cx = (cell % cells) as f32 * s;
        let cy = (cell / cells) as f32 * s;

        let bbox = BoundingBox::new(cx - d[0] * s, cy - d[1] * s, cx + d[2] * s, cy + d[3] * s);
        let landmarks = match kps_preds.and_then(|k| k.get(idx * 10..idx * 10 + 10)) {
            Some(k) => {
                let mut lm = [(0.0, 0.0); 5];
                for (i, p) in lm.iter_mut().enumerate() {
                    *p = (cx + k[2 * i] * s, cy + k[2 * i + 1] * s);
                }
                lm
            }
            None => landmarks_from_box(&bbox),
        };

        out.push(Detection {
            bbox,
            score,
            landmarks,
        });
    }
    out
}

/// Greedy non-maximum suppression, highest score first.
pub(crate) fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if keep.iter().all(|k| k.bbox.iou(&det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Map model-space detections back to the source image and clip to its bounds.
pub(crate) fn rescale(
    detections: Vec<Detection>,
    det_scale: f32,
    width: f32,
    height: f32,
) -> Vec<Detection> {
    detections
        .into_iter()
        .filter_map(|mut d| {
            d.bbox = BoundingBox::new(
                (d.bbox.x0 / det_scale).clamp(0.0, width),
                (d.bbox.y0 / det_scale).clamp(0.0, height),
                (d.bbox.x1 / det_scale).clamp(0.0, width),
                (d.bbox.y1 / det_scale).clamp(0.0, height),
            );
            for p in d.landmarks.iter_mut() {
                *p = (p.0 / det_scale, p.1 / det_scale);
            }
            (d.bbox.width() > 0.0 && d.bbox.height() > 0.0).then_some(d)
        })
        .collect()
}

/// Approximate landmarks for models exported without a keypoint head:
/// the canonical ArcFace layout stretched over the box.
fn landmarks_from_box(bbox: &BoundingBox) -> Landmarks {
    let mut lm = [(0.0, 0.0); 5];
    for (p, t) in lm.iter_mut().zip(crate::recognizer::ARCFACE_TEMPLATE.iter()) {
        *p = (
            bbox.x0 + t.0 / 112.0 * bbox.width(),
            bbox.y0 + t.1 / 112.0 * bbox.height(),
        );
    }
    lm
}
