//! Model manifest for face verification and integrity checks over a model directory.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What a model file is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Detector,
    Recognizer,
}

/// A required model: file name, download source, pinned SHA-256 and display size.
pub struct ModelFile {
    pub name: &'static str,
    pub role: ModelRole,
    pub url: &'static str,
    pub sha256: &'static str,
    pub size_display: &'static str,
}

impl ModelFile {
    pub fn path_in(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(self.name)
    }
}

// Checksums are the `oid sha256:` fields of the Git LFS pointer files at
// https://huggingface.co/public-data/insightface/raw/main/models/buffalo_l/
pub const MODELS: &[ModelFile] = &[
    ModelFile {
        name: "det_10g.onnx",
        role: ModelRole::Detector,
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx",
        sha256: "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
        size_display: "16 MB",
    },
    ModelFile {
        name: "w600k_r50.onnx",
        role: ModelRole::Recognizer,
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/w600k_r50.onnx",
        sha256: "4c06341c33c2ca1f86781dab0e829f88ad5b64be9fba56e56bc9ebdefc619e43",
        size_display: "166 MB",
    },
];

/// Optional MiniFASNet anti-spoof model. Supplied by the operator; not
/// downloaded and not checksummed.
pub const LIVENESS_MODEL: &str = "anti_spoof.onnx";

/// Manifest entry for `role`.
pub fn model_for(role: ModelRole) -> &'static ModelFile {
    MODELS
        .iter()
        .find(|m| m.role == role)
        .unwrap_or(&MODELS[0])
}

/// Default model directory.
///
/// Root gets the system-wide `/var/lib/kyc/models`; everyone else
/// `$XDG_DATA_HOME/kyc/models` (`~/.local/share/kyc/models`).
pub fn default_model_dir() -> PathBuf {
    if is_root() {
        PathBuf::from("/var/lib/kyc/models")
    } else {
        let data_home = std::env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.local/share")
        });
        PathBuf::from(data_home).join("kyc/models")
    }
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {name} ({path})")]
    MissingModel { name: &'static str, path: PathBuf },

    #[error("failed to open model file: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "model checksum mismatch for {name} ({path})\n  expected: {expected}\n  got:      {got}"
    )]
    ChecksumMismatch {
        name: &'static str,
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// SHA-256 hex digest of a file, streamed in 8 KiB chunks.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| ModelIntegrityError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn verify_file_sha256(
    name: &'static str,
    path: &Path,
    expected_sha256: &str,
) -> Result<(), ModelIntegrityError> {
    if !path.exists() {
        return Err(ModelIntegrityError::MissingModel {
            name,
            path: path.to_path_buf(),
        });
    }

    let digest = sha256_file_hex(path)?;
    if digest != expected_sha256 {
        return Err(ModelIntegrityError::ChecksumMismatch {
            name,
            path: path.to_path_buf(),
            expected: expected_sha256.to_string(),
            got: digest,
        });
    }
    Ok(())
}

pub fn verify_model(model: &ModelFile, model_dir: &Path) -> Result<(), ModelIntegrityError> {
    verify_file_sha256(model.name, &model.path_in(model_dir), model.sha256)
}

/// Fails on the first required model that is missing or corrupt.
pub fn verify_models_dir(model_dir: &Path) -> Result<(), ModelIntegrityError> {
    MODELS.iter().try_for_each(|m| verify_model(m, model_dir))
}

/// Integrity of every required model, plus whether the liveness model is present.
pub struct DirReport {
    pub models: Vec<(&'static ModelFile, Result<(), ModelIntegrityError>)>,
    pub liveness_present: bool,
}

impl DirReport {
    pub fn is_ok(&self) -> bool {
        self.models.iter().all(|(_, r)| r.is_ok())
    }
}

pub fn check_models_dir(model_dir: &Path) -> DirReport {
    DirReport {
        models: MODELS
            .iter()
            .map(|m| (m, verify_model(m, model_dir)))
            .collect(),
        liveness_present: model_dir.join(LIVENESS_MODEL).is_file(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "kyc-models-test-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[test]
    fn verify_file_sha256_rejects_missing() {
        let path = scratch_dir("missing").join("nope.onnx");
        let err = verify_file_sha256("nope.onnx", &path, "00").unwrap_err();
        assert!(matches!(err, ModelIntegrityError::MissingModel { .. }));
    }

    #[test]
    fn verify_file_sha256_rejects_mismatch() {
        let dir = scratch_dir("mismatch");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.onnx");
        fs::write(&path, b"hello").unwrap();

        let err = verify_file_sha256("model.onnx", &path, "00").unwrap_err();
        assert!(matches!(err, ModelIntegrityError::ChecksumMismatch { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = scratch_dir("digest");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.onnx");
        fs::write(&path, b"hello").unwrap();

        let digest = sha256_file_hex(&path).unwrap();
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        verify_file_sha256("model.onnx", &path, &digest).unwrap();

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_models_dir_reports_missing() {
        let err = verify_models_dir(&scratch_dir("dir-missing")).unwrap_err();
        assert!(matches!(
            err,
            ModelIntegrityError::MissingModel {
                name: "det_10g.onnx",
                ..
            }
        ));
    }

    #[test]
    fn check_models_dir_reports_every_model() {
        let dir = scratch_dir("report");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("w600k_r50.onnx"), b"truncated").unwrap();
        fs::write(dir.join(LIVENESS_MODEL), b"user supplied").unwrap();

        let report = check_models_dir(&dir);
        assert!(!report.is_ok());
        assert!(report.liveness_present);
        assert_eq!(report.models.len(), MODELS.len());
        assert!(matches!(
            report.models[0].1,
            Err(ModelIntegrityError::MissingModel { .. })
        ));
        assert!(matches!(
            report.models[1].1,
            Err(ModelIntegrityError::ChecksumMismatch { .. })
        ));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn manifest_has_one_model_per_role() {
        assert_eq!(model_for(ModelRole::Detector).name, "det_10g.onnx");
        assert_eq!(model_for(ModelRole::Recognizer).name, "w600k_r50.onnx");
        for m in MODELS {
            assert_eq!(m.sha256.len(), 64);
            assert!(m.url.ends_with(m.name));
        }
    }

    #[test]
    fn default_model_dir_ends_with_kyc_models() {
        assert!(default_model_dir().ends_with("kyc/models"));
    }
}
