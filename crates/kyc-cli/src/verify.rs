//! `kyc verify`: one-shot verification of two local image files.

use anyhow::{Context, Result};
use kyc_core::{
    ExecutionTarget, LivenessChecker, LocatorConfig, OnnxFaceLocator, Policy, VerificationResult,
    Verifier,
};
use kyc_models::{ModelRole, LIVENESS_MODEL};

use crate::setup::resolve_model_dir;
use crate::VerifyArgs;

pub fn run(args: &VerifyArgs) -> Result<VerificationResult> {
    let document = std::fs::read(&args.document)
        .with_context(|| format!("failed to read {}", args.document.display()))?;
    let selfie = std::fs::read(&args.selfie)
        .with_context(|| format!("failed to read {}", args.selfie.display()))?;

    let model_dir = resolve_model_dir(args.model_dir.clone());
    kyc_models::verify_models_dir(&model_dir)
        .context("model integrity check failed; run `kyc setup`")?;

    let target = if args.gpu {
        ExecutionTarget::Cuda {
            device_id: args.gpu_device,
        }
    } else {
        ExecutionTarget::Cpu
    };

    let locator = OnnxFaceLocator::load(
        &kyc_models::model_for(ModelRole::Detector).path_in(&model_dir),
        &kyc_models::model_for(ModelRole::Recognizer).path_in(&model_dir),
        target,
        LocatorConfig::default(),
    )
    .context("failed to load face models")?;

    let liveness = if args.no_liveness {
        LivenessChecker::unavailable()
    } else {
        LivenessChecker::load(&model_dir.join(LIVENESS_MODEL), target)
    };

    let mut verifier = Verifier::new(locator, liveness, policy(args));
    tracing::debug!(model = %verifier.describe(), "verifier ready");
    Ok(verifier.verify(&document, &selfie))
}

fn policy(args: &VerifyArgs) -> Policy {
    let defaults = Policy::default();
    Policy {
        similarity_threshold: args
            .similarity_threshold
            .unwrap_or(defaults.similarity_threshold),
        liveness_threshold: args
            .liveness_threshold
            .unwrap_or(defaults.liveness_threshold),
        min_face_size: args.min_face_size.unwrap_or(defaults.min_face_size),
    }
}
