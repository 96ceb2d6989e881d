//! Face embedding extractor contract.
//!
//! The model that turns image bytes into embedding vectors is an external
//! collaborator. Its one semantic guarantee: an ordinary "no face found"
//! result is an empty list, never an error — only infrastructure-level
//! failures are errors.

use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractorError {
    /// The extractor did not answer within the configured bound. The
    /// decision engine degrades this to the face-not-detected outcome.
    #[error("extractor timed out after {0} seconds")]
    Timeout(u64),
    #[error("extractor backend failed: {0}")]
    Backend(String),
    #[error("extractor returned malformed output: {0}")]
    Malformed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns raw image bytes into zero or more face embeddings.
///
/// Implementations must return all detected faces, most prominent first;
/// callers decide how many faces are acceptable for their operation.
pub trait FaceExtractor: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Vec<Embedding>, ExtractorError>;
}
