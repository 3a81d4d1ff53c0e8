use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use kyc_core::detector::DetectorConfig;
use kyc_core::{ExecutionTarget, LocatorConfig, Policy};

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (default: 0.0.0.0:8000).
    pub bind_addr: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// CPU or CUDA execution for every inference session.
    pub target: ExecutionTarget,
    pub locator: LocatorConfig,
    pub policy: Policy,
    /// Whether to try loading the anti-spoof model at all.
    pub liveness_enabled: bool,
    /// Outer deadline in seconds for a verify request.
    pub verify_timeout_secs: u64,
    /// Maximum accepted request body size.
    pub max_upload_bytes: usize,
    pub cors_origins: Vec<String>,
    /// Skip SHA-256 verification of the model files at startup.
    pub skip_model_checksum: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            model_dir: kyc_models::default_model_dir(),
            target: ExecutionTarget::Cpu,
            locator: LocatorConfig::default(),
            policy: Policy::default(),
            liveness_enabled: true,
            verify_timeout_secs: 30,
            max_upload_bytes: 10 * 1024 * 1024,
            cors_origins: vec!["http://localhost:3000".to_string()],
            skip_model_checksum: false,
        }
    }
}

impl Config {
    /// Load configuration from `KYC_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    fn from_lookup(var: &dyn Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let env = Lookup(var);

        let target = if var("KYC_USE_GPU").is_some_and(|v| is_truthy(&v)) {
            ExecutionTarget::Cuda {
                device_id: env.get("KYC_GPU_DEVICE").unwrap_or(0),
            }
        } else {
            ExecutionTarget::Cpu
        };

        let detector = DetectorConfig {
            input_size: env.get("KYC_DET_SIZE").unwrap_or(defaults.locator.detector.input_size),
            score_threshold: env
                .get("KYC_DET_CONFIDENCE")
                .unwrap_or(defaults.locator.detector.score_threshold),
            ..defaults.locator.detector
        };

        let policy = Policy {
            similarity_threshold: env
                .get("KYC_SIMILARITY_THRESHOLD")
                .unwrap_or(defaults.policy.similarity_threshold),
            liveness_threshold: env
                .get("KYC_LIVENESS_THRESHOLD")
                .unwrap_or(defaults.policy.liveness_threshold),
            min_face_size: env.get("KYC_MIN_FACE_SIZE").unwrap_or(defaults.policy.min_face_size),
        };

        let cors_origins = var("KYC_CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        Self {
            bind_addr: env.get("KYC_BIND_ADDR").unwrap_or(defaults.bind_addr),
            model_dir: var("KYC_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            target,
            locator: LocatorConfig {
                detector,
                min_detection_px: env
                    .get("KYC_MIN_DETECTION_PX")
                    .unwrap_or(defaults.locator.min_detection_px),
            },
            policy,
            liveness_enabled: var("KYC_LIVENESS_ENABLED")
                .map(|v| v != "0")
                .unwrap_or(true),
            verify_timeout_secs: env
                .get("KYC_VERIFY_TIMEOUT_SECS")
                .unwrap_or(defaults.verify_timeout_secs),
            max_upload_bytes: env.get("KYC_MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_bytes),
            cors_origins,
            skip_model_checksum: var("KYC_SKIP_MODEL_CHECKSUM").is_some(),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        kyc_models::model_for(kyc_models::ModelRole::Detector).path_in(&self.model_dir)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        kyc_models::model_for(kyc_models::ModelRole::Recognizer).path_in(&self.model_dir)
    }

    pub fn liveness_model_path(&self) -> PathBuf {
        self.model_dir.join(kyc_models::LIVENESS_MODEL)
    }
}

struct Lookup<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Lookup<'_> {
    fn get<T: FromStr>(&self, key: &str) -> Option<T> {
        (self.0)(key).and_then(|v| v.trim().parse().ok())
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
