//! Append-only attendance ledger.
//!
//! One counted event per identity per local calendar day. The dedup
//! decision lives in `has_accepted_today` plus the `(identity_id, day)`
//! unique index; the listing queries below are pure projections and must
//! never be used to infer "has this already happened".

use crate::db::SharedConn;
use chrono::Local;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// `record` never invents an identity; the name must already exist.
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
    /// The `(identity, day)` unique index fired: a concurrent writer won
    /// the check-then-act race. Callers map this to the duplicate outcome.
    #[error("attendance already recorded for identity {identity_id} on {day}")]
    AlreadyRecorded { identity_id: i64, day: String },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// One recorded attendance event. Name and affiliation are snapshots taken
/// at event time; later identity changes never rewrite history.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEvent {
    pub log_id: i64,
    pub identity_id: i64,
    pub name: String,
    pub affiliation: Option<String>,
    pub captured_image: Option<String>,
    pub recorded_at: String,
}

/// Display projection: latest event per identity for one day.
#[derive(Debug, Clone, Serialize)]
pub struct DayEntry {
    pub name: String,
    pub affiliation: Option<String>,
    /// Time of the latest event that day, `HH:MM:SS`.
    pub time: String,
}

/// Counted attendances per calendar month (`YYYY-MM`). Thanks to the
/// one-per-day index this equals person-days present.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyTotal {
    pub month: String,
    pub attendances: i64,
}

pub struct AttendanceLedger {
    conn: SharedConn,
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

impl AttendanceLedger {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    /// True iff an event for this identity exists on the current local
    /// calendar day. Reads go through the same connection as writes, so a
    /// write that just happened in this process is always visible.
    pub fn has_accepted_today(&self, name: &str) -> Result<bool, LedgerError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM attendance_events WHERE name = ?1 AND day = ?2",
            params![name, today()],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Append one event at `now()` and return the assigned log id.
    pub fn record(
        &self,
        name: &str,
        affiliation: Option<&str>,
        captured_image: Option<&str>,
    ) -> Result<i64, LedgerError> {
        self.record_at(name, affiliation, captured_image, &now_stamp())
    }

    /// Insert with an explicit timestamp (`YYYY-MM-DD HH:MM:SS`). Split out
    /// so tests can build histories on fixed dates.
    fn record_at(
        &self,
        name: &str,
        affiliation: Option<&str>,
        captured_image: Option<&str>,
        recorded_at: &str,
    ) -> Result<i64, LedgerError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let identity_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM identities WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        let Some(identity_id) = identity_id else {
            return Err(LedgerError::UnknownIdentity(name.to_string()));
        };

        let day = recorded_at
            .split_whitespace()
            .next()
            .unwrap_or(recorded_at)
            .to_string();

        let result = conn.execute(
            "INSERT INTO attendance_events
                 (identity_id, name, affiliation, captured_image, recorded_at, day)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![identity_id, name, affiliation, captured_image, recorded_at, day],
        );
        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(LedgerError::AlreadyRecorded { identity_id, day })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Latest event per identity for one day, newest first.
    pub fn latest_for_day(&self, day: &str) -> Result<Vec<DayEntry>, LedgerError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT name, affiliation, MAX(recorded_at)
             FROM attendance_events
             WHERE day = ?1
             GROUP BY name, affiliation
             ORDER BY MAX(recorded_at) DESC",
        )?;
        let rows = stmt.query_map(params![day], |r| {
            let stamp: String = r.get(2)?;
            Ok(DayEntry {
                name: r.get(0)?,
                affiliation: r.get(1)?,
                time: stamp
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or(&stamp)
                    .to_string(),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// All events with `from <= day <= to`, oldest first.
    pub fn events_between(&self, from: &str, to: &str) -> Result<Vec<AttendanceEvent>, LedgerError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT log_id, identity_id, name, affiliation, captured_image, recorded_at
             FROM attendance_events
             WHERE day >= ?1 AND day <= ?2
             ORDER BY recorded_at ASC, log_id ASC",
        )?;
        let rows = stmt.query_map(params![from, to], |r| {
            Ok(AttendanceEvent {
                log_id: r.get(0)?,
                identity_id: r.get(1)?,
                name: r.get(2)?,
                affiliation: r.get(3)?,
                captured_image: r.get(4)?,
                recorded_at: r.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Distinct days holding at least one event, newest first.
    pub fn available_dates(&self) -> Result<Vec<String>, LedgerError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT DISTINCT day FROM attendance_events ORDER BY day DESC")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Counted attendances per month, newest month first.
    pub fn monthly_totals(&self) -> Result<Vec<MonthlyTotal>, LedgerError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT substr(day, 1, 7) AS month, COUNT(*)
             FROM attendance_events
             GROUP BY month
             ORDER BY month DESC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(MonthlyTotal {
                month: r.get(0)?,
                attendances: r.get(1)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Day of the oldest event, if any (system start date for displays).
    pub fn first_event_date(&self) -> Result<Option<String>, LedgerError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let day: Option<String> = conn
            .query_row("SELECT MIN(day) FROM attendance_events", [], |r| r.get(0))
            .optional()?
            .flatten();
        Ok(day)
    }

    /// Number of events for one identity on one day.
    pub fn count_for_day(&self, name: &str, day: &str) -> Result<i64, LedgerError> {
        let conn = self.conn.lock().expect("db mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM attendance_events WHERE name = ?1 AND day = ?2",
            params![name, day],
            |r| r.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::identity::IdentityStore;

    fn fixture() -> (AttendanceLedger, IdentityStore) {
        let db = Db::open_in_memory().unwrap();
        (
            AttendanceLedger::new(db.conn()),
            IdentityStore::new(db.conn()),
        )
    }

    #[test]
    fn test_record_requires_known_identity() {
        let (ledger, _ids) = fixture();
        assert!(matches!(
            ledger.record("Ghost", None, None),
            Err(LedgerError::UnknownIdentity(n)) if n == "Ghost"
        ));
    }

    #[test]
    fn test_record_then_read_back_same_process() {
        let (ledger, ids) = fixture();
        ids.resolve_or_create("Alice", Some("Eng")).unwrap();

        assert!(!ledger.has_accepted_today("Alice").unwrap());
        let log_id = ledger
            .record("Alice", Some("Eng"), Some("cap.jpg"))
            .unwrap();
        assert!(log_id > 0);
        assert!(ledger.has_accepted_today("Alice").unwrap());
        assert_eq!(ledger.count_for_day("Alice", &today()).unwrap(), 1);
    }

    #[test]
    fn test_second_record_same_day_is_conflict() {
        let (ledger, ids) = fixture();
        let alice = ids.resolve_or_create("Alice", None).unwrap();

        ledger.record("Alice", None, None).unwrap();
        match ledger.record("Alice", None, None) {
            Err(LedgerError::AlreadyRecorded { identity_id, day }) => {
                assert_eq!(identity_id, alice.id);
                assert_eq!(day, today());
            }
            other => panic!("expected AlreadyRecorded, got {other:?}"),
        }
        // Still exactly one row.
        assert_eq!(ledger.count_for_day("Alice", &today()).unwrap(), 1);
    }

    #[test]
    fn test_same_identity_different_days_is_fine() {
        let (ledger, ids) = fixture();
        ids.resolve_or_create("Alice", None).unwrap();
        ledger
            .record_at("Alice", None, None, "2026-03-02 08:01:00")
            .unwrap();
        ledger
            .record_at("Alice", None, None, "2026-03-03 08:05:00")
            .unwrap();
        assert_eq!(ledger.count_for_day("Alice", "2026-03-02").unwrap(), 1);
        assert_eq!(ledger.count_for_day("Alice", "2026-03-03").unwrap(), 1);
    }

    #[test]
    fn test_latest_for_day_orders_newest_first() {
        let (ledger, ids) = fixture();
        ids.resolve_or_create("Alice", Some("Eng")).unwrap();
        ids.resolve_or_create("Bob", None).unwrap();
        ledger
            .record_at("Alice", Some("Eng"), None, "2026-03-02 08:01:00")
            .unwrap();
        ledger
            .record_at("Bob", None, None, "2026-03-02 09:30:00")
            .unwrap();

        let day = ledger.latest_for_day("2026-03-02").unwrap();
        assert_eq!(day.len(), 2);
        assert_eq!(day[0].name, "Bob");
        assert_eq!(day[0].time, "09:30:00");
        assert_eq!(day[1].name, "Alice");
        assert_eq!(day[1].affiliation.as_deref(), Some("Eng"));
    }

    #[test]
    fn test_range_dates_and_monthly_projections() {
        let (ledger, ids) = fixture();
        ids.resolve_or_create("Alice", None).unwrap();
        ids.resolve_or_create("Bob", None).unwrap();
        ledger
            .record_at("Alice", None, None, "2026-02-27 08:00:00")
            .unwrap();
        ledger
            .record_at("Alice", None, None, "2026-03-02 08:00:00")
            .unwrap();
        ledger
            .record_at("Bob", None, None, "2026-03-02 08:10:00")
            .unwrap();

        let range = ledger.events_between("2026-03-01", "2026-03-31").unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].name, "Alice");

        assert_eq!(
            ledger.available_dates().unwrap(),
            vec!["2026-03-02".to_string(), "2026-02-27".to_string()]
        );

        let months = ledger.monthly_totals().unwrap();
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].month, "2026-03");
        assert_eq!(months[0].attendances, 2);
        assert_eq!(months[1].month, "2026-02");
        assert_eq!(months[1].attendances, 1);

        assert_eq!(
            ledger.first_event_date().unwrap().as_deref(),
            Some("2026-02-27")
        );
    }

    #[test]
    fn test_first_event_date_empty_ledger() {
        let (ledger, _ids) = fixture();
        assert!(ledger.first_event_date().unwrap().is_none());
    }
}
