//! ArcFace embedding extraction (InsightFace `w600k_r50.onnx`).

use std::path::{Path, PathBuf};

use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;

use crate::decode::PixelGrid;
use crate::face::{Embedding, Landmarks};
use crate::session::{load_session, ExecutionTarget};

const ALIGNED_SIZE: usize = 112;

/// Canonical landmark positions of an aligned 112×112 ArcFace crop.
pub const ARCFACE_TEMPLATE: Landmarks = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("failed to load recognizer model {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },
    #[error("recognizer inference failed: {0}")]
    Inference(#[from] ort::Error),
    #[error("recognizer produced no output")]
    EmptyOutput,
}

pub struct FaceRecognizer {
    session: Session,
    input_name: String,
    output_name: String,
    model_version: String,
}

impl FaceRecognizer {
    pub fn load(path: &Path, target: ExecutionTarget) -> Result<Self, RecognizerError> {
        let session = load_session(path, target).map_err(|source| RecognizerError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .unwrap_or_else(|| "input.1".to_string());
        let output_name = session
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or(RecognizerError::EmptyOutput)?;
        let model_version = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "arcface".to_string());

        Ok(Self {
            session,
            input_name,
            output_name,
            model_version,
        })
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Align the face via its landmarks and extract an L2-normalized embedding.
    pub fn extract(
        &mut self,
        grid: &PixelGrid,
        landmarks: &Landmarks,
    ) -> Result<Embedding, RecognizerError> {
        let transform = SimilarityTransform::estimate(landmarks, &ARCFACE_TEMPLATE);
        let input = aligned_input(grid, &transform);
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])?;
        let value = outputs
            .get(self.output_name.as_str())
            .ok_or(RecognizerError::EmptyOutput)?;
        let (_, data) = value.try_extract_tensor::<f32>()?;
        if data.is_empty() {
            return Err(RecognizerError::EmptyOutput);
        }

        Ok(Embedding {
            values: l2_normalize(data),
            model_version: Some(self.model_version.clone()),
        })
    }
}

/// 2-D similarity transform `p' = [a -b; b a]·p + t` (rotation, uniform scale, shift).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    /// Least-squares fit mapping `src` points onto `dst` points.
    pub fn estimate(src: &Landmarks, dst: &Landmarks) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &Landmarks| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        let mut denom = 0.0f32;
        for (s, d) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (s.0 - msx, s.1 - msy);
            let (dx, dy) = (d.0 - mdx, d.1 - mdy);
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
            denom += sx * sx + sy * sy;
        }

        let (a, b) = if denom > f32::EPSILON {
            (num_a / denom, num_b / denom)
        } else {
            (1.0, 0.0)
        };
        let tx = mdx - (a * msx - b * msy);
        let ty = mdy - (b * msx + a * msy);
        Self { a, b, tx, ty }
    }

    pub fn apply(&self, p: (f32, f32)) -> (f32, f32) {
        (
            self.a * p.0 - self.b * p.1 + self.tx,
            self.b * p.0 + self.a * p.1 + self.ty,
        )
    }

    /// Map a destination point back into source coordinates.
    pub fn invert(&self, p: (f32, f32)) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (x, y) = (p.0 - self.tx, p.1 - self.ty);
        ((self.a * x + self.b * y) / det, (-self.b * x + self.a * y) / det)
    }
}

/// Warp the face into the 112×112 crop, normalized to `(v - 127.5) / 127.5`, NCHW RGB.
pub(crate) fn aligned_input(grid: &PixelGrid, transform: &SimilarityTransform) -> Array4<f32> {
    let mut input = Array4::<f32>::zeros((1, 3, ALIGNED_SIZE, ALIGNED_SIZE));
    for v in 0..ALIGNED_SIZE {
        for u in 0..ALIGNED_SIZE {
            let (x, y) = transform.invert((u as f32, v as f32));
            for c in 0..3 {
                input[[0, c, v, u]] = (grid.sample(x, y, c) - 127.5) / 127.5;
            }
        }
    }
    input
}

pub(crate) fn l2_normalize(values: &[f32]) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter().map(|v| v / norm).collect()
    } else {
        values.to_vec()
    }
}
