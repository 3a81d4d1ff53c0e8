//! The verification decision pipeline.
//!
//! Stages run in a fixed order and each one either hands the partially
//! built [`VerificationResult`] to the next stage or halts with a final
//! result:
//!
//! ```text
//! decode(document) → locate → size gate → decode(selfie) → locate
//!     → liveness gate → similarity gate
//! ```
//!
//! Every expected failure (bad image, no face, small face, spoof, mismatch)
//! ends as a result with `success = false` and a reason naming the furthest
//! stage reached; nothing is returned as an error.

use serde::Serialize;

use crate::decode::{decode, PixelGrid};
use crate::face::{largest_face, FaceCandidate};
use crate::liveness::{LivenessChecker, LIVENESS_THRESHOLD};
use crate::locator::FaceLocator;
use crate::matcher::{cosine_similarity, round4};

/// Minimum cosine similarity for the two faces to count as the same person.
pub const SIMILARITY_THRESHOLD: f32 = 0.35;
/// Minimum width and height, in pixels, of the face on the document.
pub const MIN_FACE_SIZE: u32 = 60;

/// Decision thresholds, fixed for the lifetime of a verifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    pub similarity_threshold: f32,
    pub liveness_threshold: f32,
    pub min_face_size: u32,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            similarity_threshold: SIMILARITY_THRESHOLD,
            liveness_threshold: LIVENESS_THRESHOLD,
            min_face_size: MIN_FACE_SIZE,
        }
    }
}

/// Outcome of one verification, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct VerificationResult {
    pub success: bool,
    pub similarity: Option<f32>,
    pub liveness_score: Option<f32>,
    pub face_found_on_document: bool,
    pub face_found_on_selfie: bool,
    pub reason: String,
}

impl VerificationResult {
    fn document_face_found(self) -> Self {
        Self {
            face_found_on_document: true,
            ..self
        }
    }

    fn selfie_face_found(self) -> Self {
        Self {
            face_found_on_selfie: true,
            ..self
        }
    }

    fn with_liveness_score(self, score: f32) -> Self {
        Self {
            liveness_score: Some(score),
            ..self
        }
    }

    fn with_similarity(self, similarity: f32) -> Self {
        Self {
            similarity: Some(similarity),
            ..self
        }
    }

    fn accept(self, reason: impl Into<String>) -> Halt {
        Halt(Self {
            success: true,
            reason: reason.into(),
            ..self
        })
    }

    fn reject(self, reason: impl Into<String>) -> Halt {
        Halt(Self {
            success: false,
            reason: reason.into(),
            ..self
        })
    }
}

/// A finished result that stops the pipeline.
#[derive(Debug)]
struct Halt(VerificationResult);

/// A stage either continues with `T` or halts with the final result.
type Stage<T> = Result<T, Halt>;

#[derive(Debug, Clone, Copy)]
enum Side {
    Document,
    Selfie,
}

impl Side {
    fn label(self) -> &'static str {
        match self {
            Side::Document => "Document",
            Side::Selfie => "Selfie",
        }
    }

    fn noun(self) -> &'static str {
        match self {
            Side::Document => "document",
            Side::Selfie => "selfie",
        }
    }
}

/// Runs the verification pipeline over a face locator and a liveness checker.
///
/// Inference capabilities are used through `&mut self`; one verifier serves
/// one verification at a time.
pub struct Verifier<L> {
    locator: L,
    liveness: LivenessChecker,
    policy: Policy,
}

impl<L: FaceLocator> Verifier<L> {
    /// The liveness checker adopts `policy.liveness_threshold`.
    pub fn new(locator: L, liveness: LivenessChecker, policy: Policy) -> Self {
        Self {
            locator,
            liveness: liveness.with_threshold(policy.liveness_threshold),
            policy,
        }
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    pub fn liveness_available(&self) -> bool {
        self.liveness.is_available()
    }

    /// Identifiers of the models in use, e.g. `det_10g + w600k_r50 + anti_spoof`.
    pub fn describe(&self) -> String {
        match self.liveness.describe() {
            Some(liveness) => format!("{} + {liveness}", self.locator.describe()),
            None => self.locator.describe(),
        }
    }

    /// Compare the face on `document` with the face on `selfie`.
    pub fn verify(&mut self, document: &[u8], selfie: &[u8]) -> VerificationResult {
        let result = match self.run(document, selfie) {
            Ok(result) | Err(Halt(result)) => result,
        };
        tracing::debug!(
            success = result.success,
            similarity = ?result.similarity,
            liveness_score = ?result.liveness_score,
            face_found_on_document = result.face_found_on_document,
            face_found_on_selfie = result.face_found_on_selfie,
            reason = %result.reason,
            "verification finished"
        );
        result
    }

    fn run(&mut self, document: &[u8], selfie: &[u8]) -> Stage<VerificationResult> {
        let result = VerificationResult::default();

        let document_face = {
            let grid = decode_stage(&result, Side::Document, document)?;
            self.locate_stage(&result, Side::Document, &grid)?
        };
        let result = size_gate(result, &document_face, self.policy.min_face_size)?;

        let selfie_grid = decode_stage(&result, Side::Selfie, selfie)?;
        let selfie_face = self.locate_stage(&result, Side::Selfie, &selfie_grid)?;
        let result = result.selfie_face_found();

        let result = self.liveness_gate(result, &selfie_grid, &selfie_face)?;
        drop(selfie_grid);

        Ok(similarity_gate(
            result,
            &document_face,
            &selfie_face,
            self.policy.similarity_threshold,
        ))
    }

    fn locate_stage(
        &mut self,
        result: &VerificationResult,
        side: Side,
        grid: &PixelGrid,
    ) -> Stage<FaceCandidate> {
        let candidates = self.locator.locate(grid).map_err(|e| {
            tracing::error!(error = %e, side = side.noun(), "face locator failed");
            result
                .clone()
                .reject(format!("{}: face analysis failed: {e}", side.label()))
        })?;

        tracing::debug!(side = side.noun(), faces = candidates.len(), "faces located");
        largest_face(&candidates)
            .cloned()
            .ok_or_else(|| result.clone().reject(format!("no face detected on {}", side.noun())))
    }

    fn liveness_gate(
        &mut self,
        result: VerificationResult,
        grid: &PixelGrid,
        face: &FaceCandidate,
    ) -> Stage<VerificationResult> {
        let outcome = self.liveness.check(grid, face);
        let result = result.with_liveness_score(outcome.score);
        if !outcome.is_live {
            return Err(result.reject(format!(
                "selfie flagged as non-live (score={}); use a live camera capture",
                outcome.score
            )));
        }
        Ok(result)
    }
}

fn decode_stage(result: &VerificationResult, side: Side, bytes: &[u8]) -> Stage<PixelGrid> {
    decode(bytes).map_err(|e| {
        tracing::debug!(error = %e, side = side.noun(), "image decode failed");
        result.clone().reject(format!("{}: {e}", side.label()))
    })
}

fn size_gate(
    result: VerificationResult,
    face: &FaceCandidate,
    min_face_size: u32,
) -> Stage<VerificationResult> {
    let (w, h) = (face.bbox.width(), face.bbox.height());
    let result = result.document_face_found();
    let min = min_face_size as f32;
    if w < min || h < min {
        return Err(result.reject(format!(
            "document face too small ({w:.0}x{h:.0} px); higher-quality photo required"
        )));
    }
    Ok(result)
}

fn similarity_gate(
    result: VerificationResult,
    document_face: &FaceCandidate,
    selfie_face: &FaceCandidate,
    threshold: f32,
) -> VerificationResult {
    let similarity = match cosine_similarity(
        &document_face.embedding.values,
        &selfie_face.embedding.values,
    ) {
        Ok(similarity) => similarity,
        Err(e) => return result.reject(format!("no usable face embedding ({e})")).0,
    };

    // Only the recorded value is rounded; the decision uses the raw score.
    let result = result.with_similarity(round4(similarity));
    let halt = if similarity >= threshold {
        result.accept("KYC verified")
    } else {
        result.reject(format!(
            "face does not match document (similarity={similarity:.4}, threshold={threshold})"
        ))
    };
    halt.0
}
