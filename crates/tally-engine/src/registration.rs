//! Registration pipeline.
//!
//! Onboards one identity photo: resolve-or-create the identity, persist
//! the image, extract its embedding with detection enforced, insert the
//! gallery entry. Every downstream failure deletes the image written in
//! step 2 so a non-functional registration leaves no orphan file; a
//! freshly created identity row is kept either way, since a person with
//! zero enrolled photos is valid state.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tally_core::{ExtractorError, FaceExtractor};
use tally_store::{CaptureError, CaptureStore, Gallery, GalleryError, IdentityError, IdentityStore};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrationError {
    // User-correctable rejections.
    #[error("identity name is empty")]
    EmptyName,
    #[error("no face detected in the registration photo")]
    NoFaceDetected,
    #[error("registration photo contains {0} faces; exactly one is required")]
    AmbiguousFaces(usize),

    // Infrastructure failures.
    #[error("identity store error: {0}")]
    Identity(#[from] IdentityError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("image storage error: {0}")]
    Capture(#[from] CaptureError),
    #[error("extractor error: {0}")]
    Extractor(ExtractorError),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl RegistrationError {
    /// True for input problems the user can fix by retrying with a better
    /// name or photo, as opposed to infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RegistrationError::EmptyName
                | RegistrationError::NoFaceDetected
                | RegistrationError::AmbiguousFaces(_)
        )
    }
}

/// Successful registration result.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub identity_id: i64,
    pub name: String,
    pub image_path: String,
}

pub struct RegistrationPipeline {
    identities: IdentityStore,
    gallery: Gallery,
    enrollments: CaptureStore,
    extractor: Arc<dyn FaceExtractor>,
}

impl RegistrationPipeline {
    pub fn new(
        identities: IdentityStore,
        gallery: Gallery,
        enrollments: CaptureStore,
        extractor: Arc<dyn FaceExtractor>,
    ) -> Self {
        Self {
            identities,
            gallery,
            enrollments,
            extractor,
        }
    }

    /// Register one enrollment photo for `name`. Repeat calls add further
    /// gallery entries for the same identity, which improves match
    /// robustness.
    pub fn register(
        &self,
        name: &str,
        affiliation: Option<&str>,
        image: &[u8],
    ) -> Result<Registration, RegistrationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }

        let identity = self.identities.resolve_or_create(name, affiliation)?;

        // Image goes to durable storage before anything references it.
        let image_path = self.enrollments.save(&identity.name, image)?;

        let vectors = match self.extractor.extract(image) {
            Ok(v) => v,
            Err(err) => {
                self.discard(&image_path);
                return Err(RegistrationError::Extractor(err));
            }
        };
        if vectors.is_empty() {
            self.discard(&image_path);
            return Err(RegistrationError::NoFaceDetected);
        }
        if vectors.len() > 1 {
            self.discard(&image_path);
            return Err(RegistrationError::AmbiguousFaces(vectors.len()));
        }

        let path_str = image_path.to_string_lossy().into_owned();
        if let Err(err) = self.gallery.insert(identity.id, &vectors[0], &path_str) {
            // Compensate: no gallery row means the image has no reader.
            // The identity row stays even if step 1 just created it.
            self.discard(&image_path);
            return Err(err.into());
        }

        tracing::info!(
            identity_id = identity.id,
            name = %identity.name,
            image = %path_str,
            "identity enrolled"
        );
        Ok(Registration {
            identity_id: identity.id,
            name: identity.name,
            image_path: path_str,
        })
    }

    fn discard(&self, path: &Path) {
        if let Err(err) = self.enrollments.remove(path) {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to remove enrollment image during rollback"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::Embedding;
    use tally_store::Db;

    struct FixedExtractor(Vec<Embedding>);

    impl FaceExtractor for FixedExtractor {
        fn extract(&self, _image: &[u8]) -> Result<Vec<Embedding>, ExtractorError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenExtractor;

    impl FaceExtractor for BrokenExtractor {
        fn extract(&self, _image: &[u8]) -> Result<Vec<Embedding>, ExtractorError> {
            Err(ExtractorError::Backend("model crashed".into()))
        }
    }

    fn pipeline(extractor: Arc<dyn FaceExtractor>) -> (RegistrationPipeline, Db, tempfile::TempDir) {
        let db = Db::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let pipeline = RegistrationPipeline::new(
            IdentityStore::new(db.conn()),
            Gallery::new(db.conn()),
            CaptureStore::new(dir.path()),
            extractor,
        );
        (pipeline, db, dir)
    }

    #[test]
    fn test_register_creates_identity_and_gallery_entry() {
        let (pipeline, db, _dir) =
            pipeline(Arc::new(FixedExtractor(vec![Embedding::new(vec![1.0, 0.0])])));

        let reg = pipeline
            .register("Alice", Some("Engineering"), b"photo")
            .unwrap();
        assert!(reg.identity_id > 0);
        assert_eq!(reg.name, "Alice");
        assert!(Path::new(&reg.image_path).exists());
        assert_eq!(Gallery::new(db.conn()).len().unwrap(), 1);
    }

    #[test]
    fn test_register_twice_adds_second_entry_same_identity() {
        let (pipeline, db, _dir) =
            pipeline(Arc::new(FixedExtractor(vec![Embedding::new(vec![1.0, 0.0])])));

        let a = pipeline.register("Alice", None, b"photo1").unwrap();
        let b = pipeline.register("Alice", None, b"photo2").unwrap();
        assert_eq!(a.identity_id, b.identity_id);
        assert_eq!(Gallery::new(db.conn()).len().unwrap(), 2);
    }

    #[test]
    fn test_empty_name_is_rejected_before_any_write() {
        let (pipeline, db, dir) =
            pipeline(Arc::new(FixedExtractor(vec![Embedding::new(vec![1.0])])));

        let err = pipeline.register("   ", None, b"photo").unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(Gallery::new(db.conn()).len().unwrap(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_no_face_deletes_image_keeps_identity() {
        let (pipeline, db, dir) = pipeline(Arc::new(FixedExtractor(vec![])));

        let err = pipeline.register("Alice", None, b"photo").unwrap_err();
        assert!(matches!(err, RegistrationError::NoFaceDetected));
        assert!(err.is_rejection());

        // No orphan image, no gallery entry, but the identity row stays.
        let alice_dir = dir.path().join("alice");
        let leftover = alice_dir
            .exists()
            .then(|| std::fs::read_dir(&alice_dir).unwrap().count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
        assert_eq!(Gallery::new(db.conn()).len().unwrap(), 0);
        assert!(IdentityStore::new(db.conn()).get("Alice").unwrap().is_some());
    }

    #[test]
    fn test_multiple_faces_are_ambiguous() {
        let (pipeline, db, _dir) = pipeline(Arc::new(FixedExtractor(vec![
            Embedding::new(vec![1.0, 0.0]),
            Embedding::new(vec![0.0, 1.0]),
        ])));

        let err = pipeline.register("Alice", None, b"photo").unwrap_err();
        assert!(matches!(err, RegistrationError::AmbiguousFaces(2)));
        assert_eq!(Gallery::new(db.conn()).len().unwrap(), 0);
    }

    #[test]
    fn test_extractor_failure_is_infrastructure_and_rolls_back_image() {
        let (pipeline, db, dir) = pipeline(Arc::new(BrokenExtractor));

        let err = pipeline.register("Alice", None, b"photo").unwrap_err();
        assert!(matches!(err, RegistrationError::Extractor(_)));
        assert!(!err.is_rejection());

        let alice_dir = dir.path().join("alice");
        let leftover = alice_dir
            .exists()
            .then(|| std::fs::read_dir(&alice_dir).unwrap().count())
            .unwrap_or(0);
        assert_eq!(leftover, 0);
        assert_eq!(Gallery::new(db.conn()).len().unwrap(), 0);
    }
}
