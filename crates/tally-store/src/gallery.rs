//! Vector gallery — nearest-neighbor facade over the embedding store.
//!
//! Embeddings are stored as little-endian f32 blobs and scanned in full on
//! every query, the same brute-force compare the recognizer side has always
//! done. Row order is ascending id and only a strictly smaller distance
//! replaces the current best, so the tie-break is deterministic: lowest
//! row id wins.

use crate::db::SharedConn;
use chrono::Local;
use rusqlite::{params, OptionalExtension};
use tally_core::{Embedding, NearestMatch};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("embedding is empty")]
    EmptyEmbedding,
    #[error("vector has {probe} dimensions but the gallery stores {gallery}")]
    DimensionMismatch { probe: usize, gallery: usize },
    #[error("stored embedding blob has invalid length {0}")]
    CorruptEmbedding(usize),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub struct Gallery {
    conn: SharedConn,
}

impl Gallery {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Insert one embedding for an identity, recording the source image it
    /// was derived from. Callers must only do this after the image is
    /// durably stored.
    ///
    /// The gallery has one fixed dimensionality: an empty embedding, or one
    /// whose dimension differs from the entries already stored, is rejected
    /// here rather than poisoning every later scan.
    pub fn insert(
        &self,
        identity_id: i64,
        embedding: &Embedding,
        image_path: &str,
    ) -> Result<i64, GalleryError> {
        if embedding.dim() == 0 {
            return Err(GalleryError::EmptyEmbedding);
        }

        let conn = self.conn.lock().expect("db mutex poisoned");
        let stored_bytes: Option<i64> = conn
            .query_row(
                "SELECT length(embedding) FROM gallery_entries LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(bytes) = stored_bytes {
            let stored_dim = bytes as usize / 4;
            if stored_dim != embedding.dim() {
                return Err(GalleryError::DimensionMismatch {
                    probe: embedding.dim(),
                    gallery: stored_dim,
                });
            }
        }

        conn.execute(
            "INSERT INTO gallery_entries (identity_id, image_path, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                identity_id,
                image_path,
                encode(&embedding.values),
                Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Closest entry to the probe by cosine distance across the whole
    /// gallery, joined with its identity. `Ok(None)` means the gallery has
    /// zero entries — distinct from "no match within threshold", which is
    /// the caller's threshold comparison on the returned distance.
    pub fn nearest_neighbor(&self, probe: &Embedding) -> Result<Option<NearestMatch>, GalleryError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT g.id, g.identity_id, i.name, i.affiliation, g.embedding
             FROM gallery_entries g
             JOIN identities i ON i.id = g.identity_id
             ORDER BY g.id ASC",
        )?;

        let mut rows = stmt.query([])?;
        let mut best: Option<NearestMatch> = None;

        while let Some(row) = rows.next()? {
            let blob: Vec<u8> = row.get(4)?;
            let values = decode(&blob)?;
            if values.len() != probe.dim() {
                return Err(GalleryError::DimensionMismatch {
                    probe: probe.dim(),
                    gallery: values.len(),
                });
            }
            let distance = probe.cosine_distance(&Embedding::new(values));

            let better = match &best {
                None => true,
                Some(prev) => distance < prev.distance,
            };
            if better {
                best = Some(NearestMatch {
                    entry_id: row.get(0)?,
                    identity_id: row.get(1)?,
                    name: row.get(2)?,
                    affiliation: row.get(3)?,
                    distance,
                });
            }
        }

        Ok(best)
    }

    /// Number of gallery entries.
    pub fn len(&self) -> Result<u64, GalleryError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM gallery_entries", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn is_empty(&self) -> Result<bool, GalleryError> {
        Ok(self.len()? == 0)
    }
}

fn encode(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode(blob: &[u8]) -> Result<Vec<f32>, GalleryError> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return Err(GalleryError::CorruptEmbedding(blob.len()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::identity::IdentityStore;

    fn fixture() -> (Gallery, IdentityStore) {
        let db = Db::open_in_memory().unwrap();
        (Gallery::new(db.conn()), IdentityStore::new(db.conn()))
    }

    #[test]
    fn test_blob_round_trip() {
        let values = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode(&encode(&values)).unwrap(), values);
        assert!(matches!(decode(&[0u8; 5]), Err(GalleryError::CorruptEmbedding(5))));
        assert!(matches!(decode(&[]), Err(GalleryError::CorruptEmbedding(0))));
    }

    #[test]
    fn test_empty_gallery_is_none() {
        let (gallery, _ids) = fixture();
        let probe = Embedding::new(vec![1.0, 0.0]);
        assert!(gallery.nearest_neighbor(&probe).unwrap().is_none());
        assert!(gallery.is_empty().unwrap());
    }

    #[test]
    fn test_nearest_picks_smallest_distance() {
        let (gallery, ids) = fixture();
        let alice = ids.resolve_or_create("Alice", Some("Eng")).unwrap();
        let bob = ids.resolve_or_create("Bob", None).unwrap();

        gallery
            .insert(alice.id, &Embedding::new(vec![0.0, 1.0]), "alice.jpg")
            .unwrap();
        gallery
            .insert(bob.id, &Embedding::new(vec![1.0, 0.0]), "bob.jpg")
            .unwrap();

        let probe = Embedding::new(vec![1.0, 0.1]);
        let nearest = gallery.nearest_neighbor(&probe).unwrap().unwrap();
        assert_eq!(nearest.name, "Bob");
        assert!(nearest.distance < 0.1);
    }

    #[test]
    fn test_tie_break_is_lowest_row_id() {
        let (gallery, ids) = fixture();
        let a = ids.resolve_or_create("First", None).unwrap();
        let b = ids.resolve_or_create("Second", None).unwrap();

        // Identical vectors: both at distance 0 from the probe.
        gallery
            .insert(a.id, &Embedding::new(vec![1.0, 0.0]), "a.jpg")
            .unwrap();
        gallery
            .insert(b.id, &Embedding::new(vec![1.0, 0.0]), "b.jpg")
            .unwrap();

        let probe = Embedding::new(vec![1.0, 0.0]);
        let nearest = gallery.nearest_neighbor(&probe).unwrap().unwrap();
        assert_eq!(nearest.name, "First");
    }

    #[test]
    fn test_insert_rejects_empty_embedding() {
        let (gallery, ids) = fixture();
        let alice = ids.resolve_or_create("Alice", None).unwrap();
        gallery
            .insert(alice.id, &Embedding::new(vec![1.0, 0.0]), "a.jpg")
            .unwrap();

        assert!(matches!(
            gallery.insert(alice.id, &Embedding::new(vec![]), "b.jpg"),
            Err(GalleryError::EmptyEmbedding)
        ));
        // The rejected row left no trace; scans keep working.
        assert_eq!(gallery.len().unwrap(), 1);
        let nearest = gallery
            .nearest_neighbor(&Embedding::new(vec![1.0, 0.0]))
            .unwrap()
            .unwrap();
        assert_eq!(nearest.name, "Alice");
    }

    #[test]
    fn test_insert_rejects_inconsistent_dimension() {
        let (gallery, ids) = fixture();
        let alice = ids.resolve_or_create("Alice", None).unwrap();
        gallery
            .insert(alice.id, &Embedding::new(vec![1.0, 0.0]), "a.jpg")
            .unwrap();

        assert!(matches!(
            gallery.insert(alice.id, &Embedding::new(vec![1.0, 0.0, 0.0]), "b.jpg"),
            Err(GalleryError::DimensionMismatch { probe: 3, gallery: 2 })
        ));
        assert_eq!(gallery.len().unwrap(), 1);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let (gallery, ids) = fixture();
        let alice = ids.resolve_or_create("Alice", None).unwrap();
        gallery
            .insert(alice.id, &Embedding::new(vec![1.0, 0.0, 0.0]), "a.jpg")
            .unwrap();

        let probe = Embedding::new(vec![1.0, 0.0]);
        assert!(matches!(
            gallery.nearest_neighbor(&probe),
            Err(GalleryError::DimensionMismatch { probe: 2, gallery: 3 })
        ));
    }

    #[test]
    fn test_multiple_entries_per_identity() {
        let (gallery, ids) = fixture();
        let alice = ids.resolve_or_create("Alice", None).unwrap();
        gallery
            .insert(alice.id, &Embedding::new(vec![1.0, 0.0]), "a1.jpg")
            .unwrap();
        gallery
            .insert(alice.id, &Embedding::new(vec![0.9, 0.1]), "a2.jpg")
            .unwrap();
        assert_eq!(gallery.len().unwrap(), 2);

        let probe = Embedding::new(vec![0.9, 0.1]);
        let nearest = gallery.nearest_neighbor(&probe).unwrap().unwrap();
        assert_eq!(nearest.name, "Alice");
        assert!(nearest.distance.abs() < 1e-6);
    }
}
