use std::sync::Arc;
use std::time::Duration;

use kyc_core::{
    FaceLocator, LivenessChecker, LocateError, OnnxFaceLocator, VerificationResult, Verifier,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to load face models: {0}")]
    Model(#[from] LocateError),
    #[error("verification engine is unavailable")]
    ChannelClosed,
    #[error("verification timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Verify {
        document: Vec<u8>,
        selfie: Vec<u8>,
        reply: oneshot::Sender<VerificationResult>,
    },
}

/// Static facts about the loaded verifier, for `/health`.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub model: String,
    pub liveness_available: bool,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
    info: Arc<EngineInfo>,
}

impl EngineHandle {
    /// Run one verification on the engine thread.
    ///
    /// The deadline covers both queueing and inference. On timeout the engine
    /// still finishes the request and the reply is dropped.
    pub async fn verify(
        &self,
        document: Vec<u8>,
        selfie: Vec<u8>,
    ) -> Result<VerificationResult, EngineError> {
        let request = async {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.tx
                .send(EngineRequest::Verify {
                    document,
                    selfie,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
    }

    pub fn info(&self) -> &EngineInfo {
        &self.info
    }
}

/// Load the ONNX locator and the optional liveness model described by `config`.
///
/// Fails fast if the detector or recognizer cannot be loaded; a missing or
/// broken liveness model only degrades the checker.
pub fn load_verifier(config: &Config) -> Result<Verifier<OnnxFaceLocator>, EngineError> {
    let locator = OnnxFaceLocator::load(
        &config.detector_model_path(),
        &config.recognizer_model_path(),
        config.target,
        config.locator,
    )?;

    let liveness = if config.liveness_enabled {
        LivenessChecker::load(&config.liveness_model_path(), config.target)
    } else {
        tracing::warn!("liveness disabled by configuration; selfies will be assumed live");
        LivenessChecker::unavailable()
    };

    Ok(Verifier::new(locator, liveness, config.policy))
}

/// Move `verifier` onto a dedicated OS thread and return a handle to it.
///
/// Requests are processed one at a time in arrival order.
pub fn spawn_engine<L>(mut verifier: Verifier<L>, timeout: Duration) -> EngineHandle
where
    L: FaceLocator + Send + 'static,
{
    let info = Arc::new(EngineInfo {
        model: verifier.describe(),
        liveness_available: verifier.liveness_available(),
    });

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("kyc-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Verify {
                        document,
                        selfie,
                        reply,
                    } => {
                        let result = verifier.verify(&document, &selfie);
                        if reply.send(result).is_err() {
                            tracing::debug!("verify caller went away; result discarded");
                        }
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx, timeout, info }
}
