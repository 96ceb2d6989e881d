//! Speech synthesis contract.
//!
//! Audio is a UX nicety layered over the ledger decision: synthesis may
//! fail on connectivity and callers must treat that as non-fatal.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("synthesizer timed out after {0} seconds")]
    Timeout(u64),
    #[error("synthesizer backend failed: {0}")]
    Backend(String),
    #[error("synthesizer produced no audio")]
    Empty,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders text to playable audio bytes in the given locale.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str, locale: &str) -> Result<Vec<u8>, SynthesisError>;
}
