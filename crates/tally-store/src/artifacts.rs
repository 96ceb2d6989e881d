//! Generate-once audio artifact cache.
//!
//! An artifact only ever appears under its final name via an atomic
//! same-directory rename, so a reader can never observe a truncated file.
//! A per-key in-process lock keeps N concurrent callers from synthesizing
//! the same message N times; cross-process duplicate generation is
//! tolerated because publish stays atomic either way.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tally_core::{SpeechSynthesizer, SynthesisError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ArtifactCache {
    dir: PathBuf,
    locale: String,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    /// One lock per artifact key. Entries are tiny and the key space is
    /// bounded by the message catalog, so they are never evicted.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactCache {
    pub fn new(
        dir: impl Into<PathBuf>,
        locale: impl Into<String>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            dir: dir.into(),
            locale: locale.into(),
            synthesizer,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Final path for a key, whether or not the artifact exists yet.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.mp3"))
    }

    /// Return the artifact for `key`, synthesizing it first if needed.
    ///
    /// An existing non-empty file is served without touching the
    /// synthesizer. Zero-byte files are treated as absent.
    pub fn ensure(&self, key: &str, text: &str) -> Result<PathBuf, ArtifactError> {
        let final_path = self.path_for(key);
        if is_complete(&final_path) {
            return Ok(final_path);
        }

        let key_lock = {
            let mut locks = self.locks.lock().expect("artifact lock map poisoned");
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let _guard = key_lock.lock().expect("artifact key lock poisoned");

        // Another caller may have published while we waited for the lock.
        if is_complete(&final_path) {
            return Ok(final_path);
        }

        std::fs::create_dir_all(&self.dir)?;
        let bytes = self.synthesizer.synthesize(text, &self.locale)?;
        if bytes.is_empty() {
            return Err(SynthesisError::Empty.into());
        }

        let tmp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &final_path)?;
        tracing::debug!(key, path = %final_path.display(), size = bytes.len(), "artifact generated");
        Ok(final_path)
    }

    /// Fire-and-forget `ensure`. Synthesis failure is logged and swallowed:
    /// audio is a UX nicety and never fails the parent operation.
    pub fn ensure_detached(self: Arc<Self>, key: String, text: String) {
        let spawned = std::thread::Builder::new()
            .name("tally-artifact".into())
            .spawn(move || {
                if let Err(err) = self.ensure(&key, &text) {
                    tracing::warn!(key = %key, error = %err, "artifact generation failed; continuing without audio");
                }
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "could not spawn artifact thread");
        }
    }
}

fn is_complete(path: &std::path::Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}
