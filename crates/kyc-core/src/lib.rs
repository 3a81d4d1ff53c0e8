//! Core face verification for KYC: image decoding, face location,
//! liveness scoring and the accept/reject decision pipeline.
//!
//! Everything in this crate is synchronous. Inference sessions are driven
//! through `&mut self`; callers that serve concurrent requests are expected
//! to serialize access (see the `kycd` engine thread).

pub mod decode;
pub mod detector;
pub mod face;
pub mod liveness;
pub mod locator;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod session;

pub use decode::{decode, DecodeError, PixelGrid};
pub use face::{largest_face, BoundingBox, Embedding, FaceCandidate, Landmarks};
pub use liveness::{LivenessChecker, LivenessOutcome, SpoofScorer};
pub use locator::{FaceLocator, LocateError, LocatorConfig, OnnxFaceLocator};
pub use matcher::{cosine_similarity, SimilarityError};
pub use pipeline::{Policy, VerificationResult, Verifier};
pub use session::ExecutionTarget;
