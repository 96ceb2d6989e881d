//! Image persistence for captures and enrollment photos.
//!
//! Append-only by filename: every write gets a fresh
//! `<timestamp>_<slug>_<random>` name scoped to the identity, so concurrent
//! writers can never collide and nothing is ever overwritten.

use chrono::Local;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tally_core::messages::slug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct CaptureStore {
    root: PathBuf,
}

impl CaptureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist image bytes for an identity and return the stored path.
    pub fn save(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, CaptureError> {
        let slug = slug(name);
        let dir = self.root.join(&slug);
        std::fs::create_dir_all(&dir)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let suffix: u32 = rand::random();
        let path = dir.join(format!(
            "{stamp}_{slug}_{suffix:08x}.{}",
            extension_for(bytes)
        ));
        std::fs::write(&path, bytes)?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "image stored");
        Ok(path)
    }

    /// Remove one stored image (compensating action on rollback paths).
    /// Removing an already-absent file is not an error.
    pub fn remove(&self, path: &Path) -> Result<(), CaptureError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the identity's whole directory. Used by the administrative
    /// cascade delete after the relational rows are gone.
    pub fn remove_all_for(&self, name: &str) -> Result<(), CaptureError> {
        let dir = self.root.join(slug(name));
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// File extension from sniffed image format; unknown payloads fall back to
/// jpg, the format every upstream capture client produces.
fn extension_for(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "png",
        Ok(ImageFormat::Jpeg) => "jpg",
        Ok(format) => format.extensions_str().first().copied().unwrap_or("jpg"),
        Err(_) => "jpg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal valid PNG signature for format sniffing.
    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_save_scopes_by_identity_and_never_collides() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path());

        let a = store.save("Alice Johnson", b"one").unwrap();
        let b = store.save("Alice Johnson", b"two").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(dir.path().join("alice_johnson")));
        assert_eq!(std::fs::read(&a).unwrap(), b"one");
        assert_eq!(std::fs::read(&b).unwrap(), b"two");
    }

    #[test]
    fn test_extension_follows_sniffed_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path());

        let png = store.save("Alice", PNG_MAGIC).unwrap();
        assert_eq!(png.extension().and_then(|e| e.to_str()), Some("png"));

        let unknown = store.save("Alice", b"not an image").unwrap();
        assert_eq!(unknown.extension().and_then(|e| e.to_str()), Some("jpg"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path());
        let path = store.save("Alice", b"x").unwrap();

        store.remove(&path).unwrap();
        assert!(!path.exists());
        // Second removal of the same path is fine.
        store.remove(&path).unwrap();
    }

    #[test]
    fn test_remove_all_for_clears_identity_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = CaptureStore::new(dir.path());
        store.save("Bob", b"1").unwrap();
        store.save("Bob", b"2").unwrap();

        store.remove_all_for("Bob").unwrap();
        assert!(!dir.path().join("bob").exists());
        // Unknown identity is a no-op.
        store.remove_all_for("Nobody").unwrap();
    }
}
