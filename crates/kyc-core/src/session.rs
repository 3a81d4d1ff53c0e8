//! ONNX Runtime session construction shared by all models.

use std::path::Path;

use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

/// Where inference runs. Chosen once at process startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionTarget {
    #[default]
    Cpu,
    Cuda { device_id: i32 },
}

impl std::fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionTarget::Cpu => write!(f, "cpu"),
            ExecutionTarget::Cuda { device_id } => write!(f, "cuda:{device_id}"),
        }
    }
}

/// Load an ONNX model, registering CUDA first when requested.
///
/// ONNX Runtime falls back to the CPU provider when CUDA cannot be
/// registered, so a GPU request never fails the load by itself.
pub fn load_session(path: &Path, target: ExecutionTarget) -> ort::Result<Session> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    let builder = match target {
        ExecutionTarget::Cpu => {
            builder.with_execution_providers([CPUExecutionProvider::default().build()])?
        }
        ExecutionTarget::Cuda { device_id } => builder.with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])?,
    };

    let session = builder.commit_from_file(path)?;
    tracing::debug!(path = %path.display(), %target, "onnx session created");
    Ok(session)
}

/// Names of a session's outputs, in declaration order.
pub fn output_names(session: &Session) -> Vec<String> {
    session
        .outputs()
        .iter()
        .map(|o| o.name().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_execution_target() {
        assert_eq!(ExecutionTarget::Cpu.to_string(), "cpu");
        assert_eq!(ExecutionTarget::Cuda { device_id: 1 }.to_string(), "cuda:1");
    }

    #[test]
    fn missing_model_file_fails() {
        let path = std::env::temp_dir().join("kyc-core-no-such-model.onnx");
        assert!(load_session(&path, ExecutionTarget::Cpu).is_err());
    }
}
