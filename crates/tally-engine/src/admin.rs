//! Administrative operations.
//!
//! Cascade removal of an identity: gallery rows and the identity row go in
//! one SQLite transaction (so no reader ever sees an orphaned gallery
//! entry), then the enrollment images come off disk. A file that cannot be
//! removed is surfaced by path so the operation can be retried as a
//! file-only cleanup; attendance history is never touched.

use std::path::Path;
use tally_store::{CaptureStore, IdentityError, IdentityStore};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("identity store error: {0}")]
    Identity(#[from] IdentityError),
    #[error("identity rows removed, but these files could not be deleted: {0:?}")]
    LeftoverFiles(Vec<String>),
}

/// Summary of a completed cascade delete.
#[derive(Debug)]
pub struct IdentityRemoval {
    pub identity_id: i64,
    pub entries_removed: usize,
}

/// Remove an identity, its gallery vectors and its enrollment images.
pub fn delete_identity(
    identities: &IdentityStore,
    enrollments: &CaptureStore,
    name: &str,
) -> Result<IdentityRemoval, AdminError> {
    let Some((identity_id, paths)) = identities.delete_with_gallery(name)? else {
        return Err(AdminError::UnknownIdentity(name.to_string()));
    };

    let mut leftovers = Vec::new();
    for path in &paths {
        if let Err(err) = remove_file_idempotent(Path::new(path)) {
            tracing::warn!(path = %path, error = %err, "enrollment image not removed");
            leftovers.push(path.clone());
        }
    }
    // Sweep the identity directory for strays (images that never made it
    // into the gallery, e.g. from interrupted registrations).
    if leftovers.is_empty() {
        if let Err(err) = enrollments.remove_all_for(name) {
            tracing::warn!(name, error = %err, "enrollment directory not removed");
            leftovers.push(
                enrollments
                    .root()
                    .join(tally_core::messages::slug(name))
                    .to_string_lossy()
                    .into_owned(),
            );
        }
    }

    if !leftovers.is_empty() {
        return Err(AdminError::LeftoverFiles(leftovers));
    }

    tracing::info!(identity_id, name, entries = paths.len(), "identity removed with gallery and images");
    Ok(IdentityRemoval {
        identity_id,
        entries_removed: paths.len(),
    })
}

fn remove_file_idempotent(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
