//! `kyc setup` and `kyc check-models`: fetch and audit the ONNX models.

use anyhow::{bail, Context, Result};
use kyc_models::{ModelFile, ModelIntegrityError, LIVENESS_MODEL, MODELS};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

pub fn resolve_model_dir(model_dir: Option<PathBuf>) -> PathBuf {
    model_dir.unwrap_or_else(kyc_models::default_model_dir)
}

/// Download one model to `dest` via a `.part` file, verifying before the rename.
fn download_model(model: &ModelFile, dest: &Path) -> Result<()> {
    let tmp_path = dest.with_extension("onnx.part");

    println!("  downloading {} ({})...", model.name, model.size_display);

    let resp = ureq::get(model.url)
        .call()
        .with_context(|| format!("failed to download {}", model.url))?;

    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut buf = [0u8; 65536];
    let mut total: u64 = 0;
    let mut last_decile: u64 = 0;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;

        if let Some(len) = content_length.filter(|&l| l > 0) {
            let pct = (total * 100) / len;
            if pct / 10 > last_decile {
                print!("  {pct}%\r");
                io::stdout().flush().ok();
                last_decile = pct / 10;
            }
        }
    }
    file.flush()?;
    drop(file);

    print!("  verifying checksum... ");
    io::stdout().flush().ok();
    if let Err(e) = kyc_models::verify_file_sha256(model.name, &tmp_path, model.sha256) {
        fs::remove_file(&tmp_path).ok();
        bail!(e);
    }
    println!("ok");

    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            dest.display()
        )
    })?;
    Ok(())
}

/// Download every missing or corrupt required model into the model directory.
pub fn run(model_dir: Option<PathBuf>) -> Result<()> {
    let dir = resolve_model_dir(model_dir);
    println!("Model directory: {}", dir.display());

    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let mut downloaded = 0;
    let mut skipped = 0;
    for model in MODELS {
        let dest = model.path_in(&dir);
        match kyc_models::verify_model(model, &dir) {
            Ok(()) => {
                println!("  {} already present (checksum ok)", model.name);
                skipped += 1;
                continue;
            }
            Err(ModelIntegrityError::MissingModel { .. }) => {}
            Err(ModelIntegrityError::ChecksumMismatch { .. }) => {
                println!("  {} exists but checksum differs, re-downloading", model.name);
            }
            Err(_) => {
                println!("  {} exists but is unreadable, re-downloading", model.name);
            }
        }

        download_model(model, &dest)?;
        downloaded += 1;
    }

    println!();
    if downloaded > 0 {
        println!("Setup complete: {downloaded} model(s) downloaded, {skipped} already present.");
    } else {
        println!("All models already present. Nothing to download.");
    }
    if !dir.join(LIVENESS_MODEL).is_file() {
        println!(
            "Note: no {LIVENESS_MODEL} in {}; liveness checks will be skipped until one is added.",
            dir.display()
        );
    }
    Ok(())
}

/// Report model integrity. Returns `false` if any required model is missing or corrupt.
pub fn check(model_dir: Option<PathBuf>) -> bool {
    let dir = resolve_model_dir(model_dir);
    println!("Model directory: {}", dir.display());

    let report = kyc_models::check_models_dir(&dir);
    for (model, status) in &report.models {
        match status {
            Ok(()) => println!("  {:<18} ok", model.name),
            Err(e) => println!("  {:<18} FAILED: {e}", model.name),
        }
    }
    let liveness = if report.liveness_present {
        "present"
    } else {
        "absent (optional)"
    };
    println!("  {LIVENESS_MODEL:<18} {liveness}");

    report.is_ok()
}
