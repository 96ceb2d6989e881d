//! tally-core — Domain types for the attendance checkpoint.
//!
//! Embedding vectors and cosine distance, the structured recognition
//! outcome, the user-facing message catalog, and the contracts of the
//! external collaborators (face extractor, speech synthesizer).

pub mod audio;
pub mod extractor;
pub mod messages;
pub mod types;

pub use audio::{SpeechSynthesizer, SynthesisError};
pub use extractor::{ExtractorError, FaceExtractor};
pub use messages::Message;
pub use types::{Embedding, NearestMatch, RecognitionOutcome, RecognitionStatus};
