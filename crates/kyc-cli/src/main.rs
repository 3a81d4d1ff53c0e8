mod setup;
mod verify;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kyc", about = "KYC face verification: model setup and offline checks", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download and verify the detection and recognition models
    Setup(ModelDirArgs),
    /// Report presence and checksums of the installed models
    CheckModels(ModelDirArgs),
    /// Compare the face on an identity document with a selfie
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
struct ModelDirArgs {
    /// Model directory (defaults to the platform data directory)
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Image of the identity document
    #[arg(long)]
    pub document: PathBuf,

    /// Selfie image
    #[arg(long)]
    pub selfie: PathBuf,

    /// Model directory (defaults to the platform data directory)
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Run inference on CUDA
    #[arg(long)]
    pub gpu: bool,

    /// CUDA device id, with --gpu
    #[arg(long, default_value_t = 0)]
    pub gpu_device: i32,

    /// Skip the anti-spoof model even if present
    #[arg(long)]
    pub no_liveness: bool,

    /// Override the face similarity threshold
    #[arg(long)]
    pub similarity_threshold: Option<f32>,

    /// Override the liveness threshold
    #[arg(long)]
    pub liveness_threshold: Option<f32>,

    /// Override the minimum document face size, in pixels
    #[arg(long)]
    pub min_face_size: Option<u32>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Setup(args) => {
            setup::run(args.model_dir)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::CheckModels(args) => Ok(if setup::check(args.model_dir) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }),
        Commands::Verify(args) => {
            let result = verify::run(&args)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
