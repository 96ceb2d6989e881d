//! Registered identities.
//!
//! Rows are immutable once written; correction means delete and
//! re-register. Deletion cascades gallery rows in the same transaction so
//! no reader ever observes a gallery entry without a live identity.

use crate::db::SharedConn;
use rusqlite::{params, OptionalExtension};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("identity name is empty after normalization")]
    EmptyName,
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A registered person.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: i64,
    pub name: String,
    pub affiliation: Option<String>,
}

pub struct IdentityStore {
    conn: SharedConn,
}

impl IdentityStore {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// Fetch an identity by display name.
    pub fn get(&self, name: &str) -> Result<Option<Identity>, IdentityError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let row = conn
            .query_row(
                "SELECT id, name, affiliation FROM identities WHERE name = ?1",
                params![name],
                |r| {
                    Ok(Identity {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        affiliation: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Resolve an identity by name, creating it if absent.
    ///
    /// A uniqueness conflict on concurrent create is treated as "already
    /// exists": the insert is a no-op and the existing row is returned.
    /// The affiliation of an existing row is never rewritten.
    pub fn resolve_or_create(
        &self,
        name: &str,
        affiliation: Option<&str>,
    ) -> Result<Identity, IdentityError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IdentityError::EmptyName);
        }

        let conn = self.conn.lock().expect("db mutex poisoned");
        conn.execute(
            "INSERT INTO identities (name, affiliation) VALUES (?1, ?2)
             ON CONFLICT(name) DO NOTHING",
            params![name, affiliation],
        )?;
        let identity = conn.query_row(
            "SELECT id, name, affiliation FROM identities WHERE name = ?1",
            params![name],
            |r| {
                Ok(Identity {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    affiliation: r.get(2)?,
                })
            },
        )?;
        Ok(identity)
    }

    /// Remove an identity together with all its gallery entries in one
    /// transaction. Returns the identity id and the image paths the removed
    /// gallery entries pointed at (for file cleanup by the caller), or
    /// `None` if the name is unknown.
    ///
    /// Attendance history is left untouched: event rows carry denormalized
    /// snapshots and must not be rewritten.
    pub fn delete_with_gallery(
        &self,
        name: &str,
    ) -> Result<Option<(i64, Vec<String>)>, IdentityError> {
        let mut conn = self.conn.lock().expect("db mutex poisoned");
        let tx = conn.transaction()?;

        let id: Option<i64> = tx
            .query_row(
                "SELECT id FROM identities WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        let Some(id) = id else {
            return Ok(None);
        };

        let mut paths = Vec::new();
        {
            let mut stmt =
                tx.prepare("SELECT image_path FROM gallery_entries WHERE identity_id = ?1")?;
            let rows = stmt.query_map(params![id], |r| r.get::<_, String>(0))?;
            for row in rows {
                paths.push(row?);
            }
        }

        tx.execute(
            "DELETE FROM gallery_entries WHERE identity_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM identities WHERE id = ?1", params![id])?;
        tx.commit()?;

        tracing::info!(identity_id = id, name, entries = paths.len(), "identity deleted");
        Ok(Some((id, paths)))
    }
}
