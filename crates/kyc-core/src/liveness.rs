//! Passive single-frame liveness (anti-spoof) scoring.
//!
//! A MiniFASNet classifier looks at a context crop around the selfie face
//! (2.7× the detected box) and estimates the probability that it shows a
//! real person rather than a presentation attack.
//!
//! # Availability
//!
//! The anti-spoof model is optional. If it cannot be loaded at startup the
//! checker is built as *unavailable* for the whole process lifetime, and if
//! scoring fails at runtime the single request falls back as well. In both
//! cases the outcome is the optimistic default (`is_live = true`,
//! `score = 1.0`): verification degrades to similarity-only matching rather
//! than rejecting every selfie.
//!
//! # Threat Coverage
//!
//! - **Blocks:** printed photographs and screen replays with visible moiré or
//!   bezel context, when the model is present.
//! - **Does not block:** high-quality 3D masks, or anything when the model is
//!   unavailable.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;
use thiserror::Error;

use crate::decode::PixelGrid;
use crate::face::{BoundingBox, FaceCandidate};
use crate::matcher::round4;
use crate::session::{load_session, ExecutionTarget};

/// Minimum real-face probability for a selfie to count as live.
pub const LIVENESS_THRESHOLD: f32 = 0.75;

const CROP_SCALE: f32 = 2.7;
const INPUT_SIZE: u32 = 80;
/// Index of the "real face" class in the classifier output.
const REAL_CLASS: usize = 1;

#[derive(Error, Debug)]
pub enum LivenessError {
    #[error("failed to load liveness model {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ort::Error,
    },
    #[error("liveness model not found: {0}")]
    MissingModel(PathBuf),
    #[error("liveness inference failed: {0}")]
    Inference(#[from] ort::Error),
    #[error("liveness model returned {0} classes (expected at least 2)")]
    BadOutput(usize),
    #[error("liveness model produced a non-finite score")]
    NonFinite,
}

/// Result of a liveness check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessOutcome {
    /// Whether the selfie passed the check (true = likely live).
    pub is_live: bool,
    /// Real-face probability, rounded to 4 decimals.
    pub score: f32,
}

impl LivenessOutcome {
    /// Returned whenever the liveness capability cannot give an answer.
    pub const ASSUMED_LIVE: LivenessOutcome = LivenessOutcome {
        is_live: true,
        score: 1.0,
    };
}

/// A model producing a real-face probability in `[0, 1]` for one face.
pub trait SpoofScorer: Send {
    fn score(&mut self, grid: &PixelGrid, face: &FaceCandidate) -> Result<f32, LivenessError>;

    fn name(&self) -> String;
}

/// Applies the liveness policy on top of an optional scorer.
pub struct LivenessChecker {
    scorer: Option<Box<dyn SpoofScorer>>,
    threshold: f32,
}

impl LivenessChecker {
    pub fn new(scorer: Box<dyn SpoofScorer>, threshold: f32) -> Self {
        Self {
            scorer: Some(scorer),
            threshold,
        }
    }

    /// A checker that always answers [`LivenessOutcome::ASSUMED_LIVE`].
    pub fn unavailable() -> Self {
        Self {
            scorer: None,
            threshold: LIVENESS_THRESHOLD,
        }
    }

    /// Try to load the MiniFASNet model; on any failure the checker is
    /// unavailable for the rest of the process.
    pub fn load(path: &Path, target: ExecutionTarget) -> Self {
        match MiniFasScorer::load(path, target) {
            Ok(scorer) => {
                tracing::info!(path = %path.display(), "liveness model loaded");
                Self::new(Box::new(scorer), LIVENESS_THRESHOLD)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "liveness model unavailable; selfies will be assumed live"
                );
                Self::unavailable()
            }
        }
    }

    pub fn with_threshold(self, threshold: f32) -> Self {
        Self { threshold, ..self }
    }

    pub fn is_available(&self) -> bool {
        self.scorer.is_some()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn describe(&self) -> Option<String> {
        self.scorer.as_ref().map(|s| s.name())
    }

    pub fn check(&mut self, grid: &PixelGrid, face: &FaceCandidate) -> LivenessOutcome {
        let Some(scorer) = self.scorer.as_mut() else {
            return LivenessOutcome::ASSUMED_LIVE;
        };

        let scored = scorer.score(grid, face).and_then(|score| {
            if score.is_finite() {
                Ok(score)
            } else {
                Err(LivenessError::NonFinite)
            }
        });
        match scored {
            Ok(score) => LivenessOutcome {
                is_live: score >= self.threshold,
                score: round4(score),
            },
            Err(e) => {
                tracing::warn!(error = %e, "liveness check failed; assuming live");
                LivenessOutcome::ASSUMED_LIVE
            }
        }
    }
}

/// MiniFASNet anti-spoof classifier (80×80 input, 2.7× context crop).
pub struct MiniFasScorer {
    session: Session,
    input_name: String,
    output_name: String,
    name: String,
}

impl MiniFasScorer {
    pub fn load(path: &Path, target: ExecutionTarget) -> Result<Self, LivenessError> {
        if !path.exists() {
            return Err(LivenessError::MissingModel(path.to_path_buf()));
        }
        let session = load_session(path, target).map_err(|source| LivenessError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .unwrap_or_else(|| "input".to_string());
        let output_name = session
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or(LivenessError::BadOutput(0))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "minifasnet".to_string());
        Ok(Self {
            session,
            input_name,
            output_name,
            name,
        })
    }
}

impl SpoofScorer for MiniFasScorer {
    fn score(&mut self, grid: &PixelGrid, face: &FaceCandidate) -> Result<f32, LivenessError> {
        let input = crop_input(grid, &face.bbox);
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])?;
        let value = outputs
            .get(self.output_name.as_str())
            .ok_or(LivenessError::BadOutput(0))?;
        let (_, logits) = value.try_extract_tensor::<f32>()?;
        if logits.len() <= REAL_CLASS {
            return Err(LivenessError::BadOutput(logits.len()));
        }
        Ok(softmax(logits)[REAL_CLASS])
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Scale the face box about its centre, then shift it back inside the image.
///
/// Returns `(x0, y0, x1, y1)` inclusive pixel bounds.
pub(crate) fn context_box(
    bbox: &BoundingBox,
    src_w: u32,
    src_h: u32,
    scale: f32,
) -> (u32, u32, u32, u32) {
    let (w, h) = (bbox.width().max(1.0), bbox.height().max(1.0));
    let (src_w, src_h) = (src_w as f32, src_h as f32);
    let scale = scale.min((src_h - 1.0) / h).min((src_w - 1.0) / w).max(0.0);

    let (new_w, new_h) = (w * scale, h * scale);
    let (cx, cy) = (bbox.x0 + w / 2.0, bbox.y0 + h / 2.0);

    let mut x0 = cx - new_w / 2.0;
    let mut y0 = cy - new_h / 2.0;
    let mut x1 = cx + new_w / 2.0;
    let mut y1 = cy + new_h / 2.0;

    if x0 < 0.0 {
        x1 -= x0;
        x0 = 0.0;
    }
    if y0 < 0.0 {
        y1 -= y0;
        y0 = 0.0;
    }
    if x1 > src_w - 1.0 {
        x0 -= x1 - src_w + 1.0;
        x1 = src_w - 1.0;
    }
    if y1 > src_h - 1.0 {
        y0 -= y1 - src_h + 1.0;
        y1 = src_h - 1.0;
    }

    (
        x0.max(0.0) as u32,
        y0.max(0.0) as u32,
        x1.max(0.0) as u32,
        y1.max(0.0) as u32,
    )
}

/// Context crop resized to 80×80, raw 0–255 values in NCHW BGR order.
pub(crate) fn crop_input(grid: &PixelGrid, bbox: &BoundingBox) -> Array4<f32> {
    let (x0, y0, x1, y1) = context_box(bbox, grid.width(), grid.height(), CROP_SCALE);
    let crop = image::imageops::crop_imm(grid.rgb(), x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image();
    let resized = image::imageops::resize(&crop, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    let mut input = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = pixel[2 - c] as f32;
        }
    }
    input
}

pub(crate) fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::Embedding;
    use image::{Rgb, RgbImage};

    struct FixedScorer(Result<f32, ()>);

    impl SpoofScorer for FixedScorer {
        fn score(&mut self, _: &PixelGrid, _: &FaceCandidate) -> Result<f32, LivenessError> {
            self.0
                .map_err(|_| LivenessError::MissingModel(PathBuf::from("gone.onnx")))
        }

        fn name(&self) -> String {
            "fixed".to_string()
        }
    }

    fn grid() -> PixelGrid {
        PixelGrid::from_rgb(RgbImage::new(100, 100)).unwrap()
    }

    fn face() -> FaceCandidate {
        FaceCandidate {
            bbox: BoundingBox::new(30.0, 30.0, 70.0, 70.0),
            confidence: 0.9,
            landmarks: [(0.0, 0.0); 5],
            embedding: Embedding {
                values: vec![1.0],
                model_version: None,
            },
        }
    }

    #[test]
    fn unavailable_assumes_live() {
        let mut checker = LivenessChecker::unavailable();
        assert!(!checker.is_available());
        assert_eq!(checker.check(&grid(), &face()), LivenessOutcome::ASSUMED_LIVE);
    }

    #[test]
    fn scorer_failure_assumes_live() {
        let mut checker = LivenessChecker::new(Box::new(FixedScorer(Err(()))), LIVENESS_THRESHOLD);
        assert!(checker.is_available());
        assert_eq!(checker.check(&grid(), &face()), LivenessOutcome::ASSUMED_LIVE);
    }

    #[test]
    fn nan_score_assumes_live() {
        let mut checker =
            LivenessChecker::new(Box::new(FixedScorer(Ok(f32::NAN))), LIVENESS_THRESHOLD);
        assert_eq!(checker.check(&grid(), &face()), LivenessOutcome::ASSUMED_LIVE);
    }

    #[test]
    fn score_below_threshold_is_not_live() {
        let mut checker = LivenessChecker::new(Box::new(FixedScorer(Ok(0.5))), LIVENESS_THRESHOLD);
        let outcome = checker.check(&grid(), &face());
        assert!(!outcome.is_live);
        assert_eq!(outcome.score, 0.5);
    }

    #[test]
    fn score_at_threshold_is_live() {
        let mut checker = LivenessChecker::new(Box::new(FixedScorer(Ok(0.75))), LIVENESS_THRESHOLD);
        assert!(checker.check(&grid(), &face()).is_live);
    }

    #[test]
    fn with_threshold_overrides_default() {
        let mut checker = LivenessChecker::new(Box::new(FixedScorer(Ok(0.6))), LIVENESS_THRESHOLD)
            .with_threshold(0.5);
        assert_eq!(checker.threshold(), 0.5);
        assert!(checker.check(&grid(), &face()).is_live);
    }

    #[test]
    fn score_is_rounded() {
        let mut checker =
            LivenessChecker::new(Box::new(FixedScorer(Ok(0.912_345))), LIVENESS_THRESHOLD);
        assert_eq!(checker.check(&grid(), &face()).score, 0.9123);
    }

    #[test]
    fn missing_model_loads_unavailable() {
        let path = std::env::temp_dir().join("kyc-core-missing-anti-spoof.onnx");
        let checker = LivenessChecker::load(&path, ExecutionTarget::Cpu);
        assert!(!checker.is_available());
        assert!(checker.describe().is_none());
    }

    #[test]
    fn context_box_scales_about_centre() {
        let bbox = BoundingBox::new(40.0, 40.0, 60.0, 60.0);
        let (x0, y0, x1, y1) = context_box(&bbox, 200, 200, 2.0);
        assert_eq!((x0, y0, x1, y1), (30, 30, 70, 70));
    }

    #[test]
    fn context_box_shifts_inside_image() {
        let bbox = BoundingBox::new(0.0, 0.0, 20.0, 20.0);
        let (x0, y0, x1, y1) = context_box(&bbox, 200, 200, 2.7);
        assert_eq!((x0, y0), (0, 0));
        assert_eq!((x1, y1), (54, 54));
    }

    #[test]
    fn context_box_caps_scale_to_image() {
        let bbox = BoundingBox::new(10.0, 10.0, 90.0, 90.0);
        let (x0, y0, x1, y1) = context_box(&bbox, 100, 100, 2.7);
        assert_eq!((x0, y0, x1, y1), (0, 0, 99, 99));
    }

    #[test]
    fn crop_input_is_bgr_raw() {
        let grid =
            PixelGrid::from_rgb(RgbImage::from_pixel(100, 100, Rgb([200, 100, 50]))).unwrap();
        let input = crop_input(&grid, &BoundingBox::new(30.0, 30.0, 70.0, 70.0));
        assert_eq!(input.shape(), &[1, 3, 80, 80]);
        assert!((input[[0, 0, 40, 40]] - 50.0).abs() < 1e-3);
        assert!((input[[0, 2, 40, 40]] - 200.0).abs() < 1e-3);
    }

    #[test]
    fn softmax_sums_to_one() {
        let p = softmax(&[1.0, 3.0, 0.5]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[1] > p[0] && p[0] > p[2]);
    }
}
