//! Face location: detection followed by per-face embedding extraction.

use std::path::Path;

use thiserror::Error;

use crate::decode::PixelGrid;
use crate::detector::{DetectorConfig, DetectorError, FaceDetector};
use crate::face::FaceCandidate;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::session::ExecutionTarget;

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Capability that finds faces in a raster and embeds each of them.
///
/// An empty vector is the normal "no face" answer; `Err` is reserved for
/// failures of the capability itself. Candidates are returned unordered.
pub trait FaceLocator {
    fn locate(&mut self, grid: &PixelGrid) -> Result<Vec<FaceCandidate>, LocateError>;

    /// Identifier of the models behind this locator, for health reporting.
    fn describe(&self) -> String;
}

impl<L: FaceLocator + ?Sized> FaceLocator for Box<L> {
    fn locate(&mut self, grid: &PixelGrid) -> Result<Vec<FaceCandidate>, LocateError> {
        (**self).locate(grid)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocatorConfig {
    pub detector: DetectorConfig,
    /// Detections narrower or shorter than this are ignored. 0 disables the filter.
    pub min_detection_px: u32,
}

/// SCRFD + ArcFace locator. Owns both inference sessions.
pub struct OnnxFaceLocator {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    min_detection_px: f32,
    description: String,
}

impl OnnxFaceLocator {
    pub fn load(
        detector_path: &Path,
        recognizer_path: &Path,
        target: ExecutionTarget,
        config: LocatorConfig,
    ) -> Result<Self, LocateError> {
        let detector = FaceDetector::load(detector_path, target, config.detector)?;
        tracing::info!(path = %detector_path.display(), %target, "SCRFD detector loaded");

        let recognizer = FaceRecognizer::load(recognizer_path, target)?;
        tracing::info!(path = %recognizer_path.display(), %target, "ArcFace recognizer loaded");

        let detector_name = detector_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let description = format!("{detector_name} + {}", recognizer.model_version());

        Ok(Self {
            detector,
            recognizer,
            min_detection_px: config.min_detection_px as f32,
            description,
        })
    }
}

impl FaceLocator for OnnxFaceLocator {
    fn locate(&mut self, grid: &PixelGrid) -> Result<Vec<FaceCandidate>, LocateError> {
        let detections = self.detector.detect(grid)?;

        let mut candidates = Vec::with_capacity(detections.len());
        for det in detections {
            if det.bbox.width() < self.min_detection_px
                || det.bbox.height() < self.min_detection_px
            {
                tracing::debug!(
                    width = det.bbox.width(),
                    height = det.bbox.height(),
                    "detection below minimum size, skipped"
                );
                continue;
            }
            let embedding = self.recognizer.extract(grid, &det.landmarks)?;
            candidates.push(FaceCandidate {
                bbox: det.bbox,
                confidence: det.score,
                landmarks: det.landmarks,
                embedding,
            });
        }
        Ok(candidates)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}
