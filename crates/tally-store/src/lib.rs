//! tally-store — The checkpoint's three-way store.
//!
//! Relational side (SQLite): registered identities, the vector gallery,
//! and the append-only attendance ledger. Filesystem side: capture and
//! enrollment images, plus the generate-once audio artifact cache.

pub mod artifacts;
pub mod captures;
pub mod db;
pub mod gallery;
pub mod identity;
pub mod ledger;

pub use artifacts::{ArtifactCache, ArtifactError};
pub use captures::{CaptureError, CaptureStore};
pub use db::{Db, DbError};
pub use gallery::{Gallery, GalleryError};
pub use identity::{Identity, IdentityError, IdentityStore};
pub use ledger::{AttendanceEvent, AttendanceLedger, DayEntry, LedgerError, MonthlyTotal};
