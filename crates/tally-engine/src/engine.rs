//! Recognition engine — the attendance decision state machine.
//!
//! One recognition event walks, in order: probe extraction → gallery
//! nearest-neighbor → threshold → same-day dedup → accept (capture image,
//! ledger row, welcome audio). The engine owns its stores on a dedicated
//! OS thread; callers talk to it through a clone-safe async handle.
//!
//! Side-effect ordering on accept is load-bearing: the capture image is
//! persisted before the ledger row that references it, and the outcome is
//! returned only once the ledger decision is final. Audio is ensured in
//! the background and never blocks or fails the decision.

use std::sync::Arc;
use tally_core::{
    ExtractorError, FaceExtractor, Message, RecognitionOutcome,
};
use tally_store::{
    ArtifactCache, AttendanceLedger, CaptureError, CaptureStore, Gallery, GalleryError,
    LedgerError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::registration::{Registration, RegistrationError, RegistrationPipeline};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("capture storage error: {0}")]
    Capture(#[from] CaptureError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Recognize {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<RecognitionOutcome, EngineError>>,
    },
    Register {
        name: String,
        affiliation: Option<String>,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Registration, RegistrationError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run one recognition event and return its structured outcome once
    /// the ledger decision is final.
    pub async fn recognize(&self, image: Vec<u8>) -> Result<RecognitionOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Run the registration pipeline for one enrollment photo.
    pub async fn register(
        &self,
        name: &str,
        affiliation: Option<&str>,
        image: Vec<u8>,
    ) -> Result<Registration, RegistrationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Register {
                name: name.to_string(),
                affiliation: affiliation.map(str::to_string),
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RegistrationError::ChannelClosed)?;
        reply_rx.await.map_err(|_| RegistrationError::ChannelClosed)?
    }
}

/// The engine's working set: stores, collaborators and the one semantic
/// configuration value, the acceptance threshold.
pub struct Engine {
    pub gallery: Gallery,
    pub ledger: AttendanceLedger,
    pub captures: CaptureStore,
    pub artifacts: Arc<ArtifactCache>,
    pub extractor: Arc<dyn FaceExtractor>,
    pub registration: RegistrationPipeline,
    /// Inclusive: `distance <= threshold` is a match.
    pub threshold: f32,
}

/// Spawn the engine on a dedicated OS thread and return its handle.
pub fn spawn_engine(engine: Engine) -> std::io::Result<EngineHandle> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("tally-engine".into())
        .spawn(move || {
            tracing::info!(threshold = engine.threshold, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize { image, reply } => {
                        let _ = reply.send(engine.run_recognize(&image));
                    }
                    EngineRequest::Register {
                        name,
                        affiliation,
                        image,
                        reply,
                    } => {
                        let result =
                            engine
                                .registration
                                .register(&name, affiliation.as_deref(), &image);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

impl Engine {
    /// Queue the message's audio artifact and return its key.
    fn speak(&self, msg: &Message) -> String {
        let key = msg.artifact_key();
        Arc::clone(&self.artifacts).ensure_detached(key.clone(), msg.text());
        key
    }

    /// The decision state machine for one recognition event.
    fn run_recognize(&self, image: &[u8]) -> Result<RecognitionOutcome, EngineError> {
        let vectors = match self.extractor.extract(image) {
            Ok(v) => v,
            // A stuck extractor degrades to "no usable face" instead of
            // hanging the request; other extractor failures fail closed.
            Err(ExtractorError::Timeout(secs)) => {
                tracing::warn!(timeout_secs = secs, "extractor timed out; treating as no face");
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        };

        let Some(probe) = vectors.into_iter().next() else {
            tracing::debug!("no face vector in capture");
            return Ok(RecognitionOutcome::face_not_detected(
                self.speak(&Message::FaceNotDetected),
            ));
        };

        let Some(nearest) = self.gallery.nearest_neighbor(&probe)? else {
            tracing::warn!("gallery has zero entries; system not provisioned");
            return Ok(RecognitionOutcome::gallery_empty(
                self.speak(&Message::GalleryEmpty),
            ));
        };

        if nearest.distance > self.threshold {
            tracing::info!(
                distance = nearest.distance,
                threshold = self.threshold,
                "nearest entry beyond threshold"
            );
            return Ok(RecognitionOutcome::unrecognized(
                nearest.distance,
                self.speak(&Message::Unrecognized),
            ));
        }

        if self.ledger.has_accepted_today(&nearest.name)? {
            tracing::info!(name = %nearest.name, distance = nearest.distance, "already recorded today");
            let key = self.speak(&Message::Duplicate {
                name: nearest.name.clone(),
            });
            return Ok(RecognitionOutcome::duplicate(&nearest, key));
        }

        // Accepted. The capture goes to disk first; the event only counts
        // once the ledger row referencing it commits.
        let capture_path = self.captures.save(&nearest.name, image)?;
        let capture_str = capture_path.to_string_lossy().into_owned();

        match self
            .ledger
            .record(&nearest.name, nearest.affiliation.as_deref(), Some(&capture_str))
        {
            Ok(log_id) => {
                tracing::info!(
                    name = %nearest.name,
                    distance = nearest.distance,
                    log_id,
                    capture = %capture_str,
                    "attendance recorded"
                );
                let key = self.speak(&Message::Welcome {
                    name: nearest.name.clone(),
                });
                Ok(RecognitionOutcome::success(&nearest, key, capture_str, log_id))
            }
            Err(LedgerError::AlreadyRecorded { .. }) => {
                // Lost the check-then-act window to a concurrent writer.
                // Duplicates keep no new image, so drop the capture.
                if let Err(err) = self.captures.remove(&capture_path) {
                    tracing::warn!(path = %capture_str, error = %err, "capture cleanup after duplicate conflict failed");
                }
                tracing::info!(name = %nearest.name, "duplicate via ledger conflict");
                let key = self.speak(&Message::Duplicate {
                    name: nearest.name.clone(),
                });
                Ok(RecognitionOutcome::duplicate(&nearest, key))
            }
            Err(err) => {
                // Known gap: the image is already durable but the event is
                // not. Leave a reconciliation trail and fail closed.
                tracing::error!(
                    name = %nearest.name,
                    orphaned_capture = %capture_str,
                    error = %err,
                    "ledger write failed after capture persisted; capture orphaned pending reconciliation"
                );
                Err(err.into())
            }
        }
    }
}
