use crate::{unavailable, SqliteStore, DATE_FORMAT, TIME_FORMAT};
use gatehouse_core::{
    AttendanceRecord, EntryQuery, EntryRow, InvalidStatus, LedgerStore, RecordParts, Status,
    StoreError,
};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, OptionalExtension, Row};

const SELECT_ENTRY: &str = "SELECT date, person_id, name, entry_time, exit_time, re_entry, re_entry_time, status
     FROM entries";

/// Column values as stored, before parsing.
struct RawEntry {
    date: String,
    person_id: String,
    name: String,
    entry_time: Option<String>,
    exit_time: Option<String>,
    re_entry: bool,
    re_entry_time: Option<String>,
    status: String,
}

fn map_raw(row: &Row) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        date: row.get("date")?,
        person_id: row.get("person_id")?,
        name: row.get("name")?,
        entry_time: row.get("entry_time")?,
        exit_time: row.get("exit_time")?,
        re_entry: row.get::<_, i64>("re_entry")? != 0,
        re_entry_time: row.get("re_entry_time")?,
        status: row.get("status")?,
    })
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|_| StoreError::Corrupt(format!("invalid date: {s}")))
}

fn parse_time(s: Option<&str>) -> Result<Option<NaiveTime>, StoreError> {
    s.map(|s| {
        NaiveTime::parse_from_str(s, TIME_FORMAT)
            .map_err(|_| StoreError::Corrupt(format!("invalid time: {s}")))
    })
    .transpose()
}

fn fmt_time(t: Option<NaiveTime>) -> Option<String> {
    t.map(|t| t.format(TIME_FORMAT).to_string())
}

impl RawEntry {
    fn status(&self) -> Result<Status, StoreError> {
        self.status
            .parse()
            .map_err(|e: InvalidStatus| StoreError::Corrupt(e.to_string()))
    }

    fn into_row(self) -> Result<EntryRow, StoreError> {
        Ok(EntryRow {
            date: parse_date(&self.date)?,
            entry_time: parse_time(self.entry_time.as_deref())?,
            exit_time: parse_time(self.exit_time.as_deref())?,
            re_entry_time: parse_time(self.re_entry_time.as_deref())?,
            status: self.status()?,
            re_entry: self.re_entry,
            name: self.name,
            person_id: self.person_id,
        })
    }

    fn into_record(self) -> Result<AttendanceRecord, StoreError> {
        let row = self.into_row()?;
        let entry_time = row.entry_time.ok_or_else(|| {
            StoreError::Corrupt(format!("entry for {} on {} has no entry time", row.person_id, row.date))
        })?;
        Ok(AttendanceRecord::restore(RecordParts {
            person_id: row.person_id,
            name: row.name,
            date: row.date,
            entry_time,
            exit_time: row.exit_time,
            re_entry: row.re_entry,
            re_entry_time: row.re_entry_time,
            status: row.status,
        }))
    }
}

impl SqliteStore {
    fn query_rows(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<EntryRow>, StoreError> {
        let mut stmt = self.conn.prepare(sql).map_err(unavailable)?;
        let raws = stmt
            .query_map(params, map_raw)
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;
        raws.into_iter().map(RawEntry::into_row).collect()
    }
}

impl LedgerStore for SqliteStore {
    fn find(&self, person_id: &str, date: NaiveDate) -> Result<Option<AttendanceRecord>, StoreError> {
        let date = date.format(DATE_FORMAT).to_string();
        let raw = self
            .conn
            .query_row(
                &format!("{SELECT_ENTRY} WHERE person_id = ?1 AND date = ?2"),
                params![person_id, date],
                map_raw,
            )
            .optional()
            .map_err(unavailable)?;
        raw.map(RawEntry::into_record).transpose()
    }

    fn insert(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let result = self.conn.execute(
            "INSERT INTO entries (date, person_id, name, entry_time, exit_time, re_entry, re_entry_time, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.date().format(DATE_FORMAT).to_string(),
                record.person_id(),
                record.name(),
                record.entry_time().format(TIME_FORMAT).to_string(),
                fmt_time(record.exit_time()),
                record.re_entry(),
                fmt_time(record.re_entry_time()),
                record.status().as_str(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Corrupt(format!(
                    "entry for {} on {} already exists",
                    record.person_id(),
                    record.date()
                )))
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    fn update(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE entries
                 SET exit_time = ?1, re_entry = ?2, re_entry_time = ?3, status = ?4
                 WHERE person_id = ?5 AND date = ?6",
                params![
                    fmt_time(record.exit_time()),
                    record.re_entry(),
                    fmt_time(record.re_entry_time()),
                    record.status().as_str(),
                    record.person_id(),
                    record.date().format(DATE_FORMAT).to_string(),
                ],
            )
            .map_err(unavailable)?;
        if changed == 0 {
            return Err(StoreError::Corrupt(format!(
                "no entry for {} on {} to update",
                record.person_id(),
                record.date()
            )));
        }
        Ok(())
    }
}

impl EntryQuery for SqliteStore {
    fn list_entries(&self) -> Result<Vec<EntryRow>, StoreError> {
        self.query_rows(&format!("{SELECT_ENTRY} ORDER BY date DESC, entry_time DESC"), &[])
    }

    fn list_entries_on(&self, date: NaiveDate) -> Result<Vec<EntryRow>, StoreError> {
        let date = date.format(DATE_FORMAT).to_string();
        self.query_rows(
            &format!("{SELECT_ENTRY} WHERE date = ?1 ORDER BY entry_time DESC"),
            &[&date],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{Catalog, Embedding, Ledger, Person, RecordOutcome, Transition};
    use chrono::{Duration, NaiveDateTime};
    use std::sync::{Arc, Barrier};

    fn catalog() -> Catalog {
        let person = |id: &str, name: &str| Person {
            id: id.into(),
            name: name.into(),
            embedding: Embedding::new(vec![0.0]),
        };
        Catalog::new(vec![person("R1", "Asha"), person("R2", "Bilal")])
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn ledger() -> Ledger<SqliteStore> {
        Ledger::new(SqliteStore::open_in_memory().unwrap(), Duration::minutes(10))
    }

    #[test]
    fn test_ledger_scenario_persists() {
        let ledger = ledger();
        let catalog = catalog();
        for time in ["09:00:00", "09:05:00", "09:12:00", "09:15:00", "09:23:00"] {
            ledger.record(&catalog, "R1", at(&format!("2024-01-01 {time}"))).unwrap();
        }

        let record = ledger
            .with_store(|s| s.find("R1", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(record.entry_time().to_string(), "09:00:00");
        assert_eq!(record.exit_time().map(|t| t.to_string()).as_deref(), Some("09:12:00"));
        assert!(record.re_entry());
        assert_eq!(record.re_entry_time().map(|t| t.to_string()).as_deref(), Some("09:23:00"));
        assert_eq!(record.status(), Status::In);

        let rows = ledger.with_store(|s| s.list_entries()).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_is_refused() {
        let store = SqliteStore::open_in_memory().unwrap();
        let person = catalog().people()[0].clone();
        let person = &person;
        let record = AttendanceRecord::open(person, at("2024-01-01 09:00:00"));
        store.insert(&record).unwrap();
        assert!(matches!(store.insert(&record), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_update_missing_record_is_corrupt() {
        let store = SqliteStore::open_in_memory().unwrap();
        let person = catalog().people()[0].clone();
        let person = &person;
        let record = AttendanceRecord::open(person, at("2024-01-01 09:00:00"));
        assert!(matches!(store.update(&record), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_list_entries_ordering() {
        let ledger = ledger();
        let catalog = catalog();
        ledger.record(&catalog, "R1", at("2024-01-01 09:00:00")).unwrap();
        ledger.record(&catalog, "R2", at("2024-01-01 10:00:00")).unwrap();
        ledger.record(&catalog, "R1", at("2024-01-02 08:00:00")).unwrap();

        let rows = ledger.with_store(|s| s.list_entries()).unwrap();
        let keys: Vec<_> = rows
            .iter()
            .map(|r| (r.date.to_string(), r.person_id.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("2024-01-02".to_string(), "R1".to_string()),
                ("2024-01-01".to_string(), "R2".to_string()),
                ("2024-01-01".to_string(), "R1".to_string()),
            ]
        );

        let day = ledger
            .with_store(|s| s.list_entries_on(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
            .unwrap();
        assert_eq!(day.len(), 2);
        assert_eq!(day[0].person_id, "R2");
    }

    #[test]
    fn test_exit_round_trips() {
        let ledger = ledger();
        let catalog = catalog();
        ledger.record(&catalog, "R2", at("2024-03-05 07:00:00")).unwrap();
        let outcome = ledger.record(&catalog, "R2", at("2024-03-05 07:45:10")).unwrap();
        assert!(matches!(
            outcome,
            RecordOutcome::Applied { transition: Transition::Exited, .. }
        ));

        let rows = ledger.with_store(|s| s.list_entries()).unwrap();
        assert_eq!(rows[0].status, Status::Out);
        assert_eq!(rows[0].exit_time.map(|t| t.to_string()).as_deref(), Some("07:45:10"));
        assert!(!rows[0].re_entry);
        assert_eq!(rows[0].name, "Bilal");
    }

    #[test]
    fn test_corrupt_status_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        // Bypass the CHECK constraint the way a foreign writer with an old schema might.
        store.conn.execute_batch("PRAGMA ignore_check_constraints = ON;").unwrap();
        store
            .conn
            .execute(
                "INSERT INTO entries (date, person_id, name, entry_time, status)
                 VALUES ('2024-01-01', 'R1', 'Asha', '09:00:00', 'MAYBE')",
                [],
            )
            .unwrap();
        let err = store.find("R1", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn test_concurrent_record_is_serialized() {
        const THREADS: usize = 8;
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("gatehouse.db")).unwrap();
        let ledger = Arc::new(Ledger::new(store, Duration::minutes(10)));
        let catalog = Arc::new(catalog());
        let barrier = Arc::new(Barrier::new(THREADS));
        let now = at("2024-01-01 09:00:00");

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let (ledger, catalog, barrier) = (ledger.clone(), catalog.clone(), barrier.clone());
                std::thread::spawn(move || {
                    barrier.wait();
                    ledger.record(&catalog, "R1", now).unwrap()
                })
            })
            .collect();
        let outcomes: Vec<RecordOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let entered = outcomes
            .iter()
            .filter(|o| matches!(o, RecordOutcome::Applied { transition: Transition::Entered, .. }))
            .count();
        let rejected = outcomes
            .iter()
            .filter(|o| matches!(o, RecordOutcome::Rejected(_)))
            .count();
        assert_eq!(entered, 1);
        assert_eq!(rejected, THREADS - 1);
        assert_eq!(ledger.with_store(|s| s.list_entries()).unwrap().len(), 1);
    }
}
