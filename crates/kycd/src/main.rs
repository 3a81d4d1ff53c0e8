use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "kycd starting");

    let config = config::Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        target = %config.target,
        similarity_threshold = config.policy.similarity_threshold,
        liveness_threshold = config.policy.liveness_threshold,
        min_face_size = config.policy.min_face_size,
        "configuration loaded"
    );

    if config.skip_model_checksum {
        tracing::warn!("model checksum verification skipped (KYC_SKIP_MODEL_CHECKSUM)");
    } else {
        kyc_models::verify_models_dir(&config.model_dir)
            .context("model integrity check failed; run `kyc setup`")?;
        tracing::info!("model checksums verified");
    }

    let verifier = engine::load_verifier(&config).context("failed to initialise verifier")?;
    let handle = engine::spawn_engine(verifier, Duration::from_secs(config.verify_timeout_secs));
    tracing::info!(
        model = %handle.info().model,
        liveness_available = handle.info().liveness_available,
        "engine ready"
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "kycd listening");

    axum::serve(listener, api::router(handle, &config))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    tracing::info!("kycd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
