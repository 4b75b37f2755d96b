//! Persistence seams consumed by the catalog, the ledger and the query surface.

use crate::ledger::AttendanceRecord;
use crate::query::EntryRow;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

/// A stored resident with the raw bytes of their reference image.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub id: String,
    pub name: String,
    pub image: Vec<u8>,
}

/// Source of residents for building the identity catalog.
pub trait CatalogSource {
    fn list_residents(&self) -> Result<Vec<ReferenceImage>, StoreError>;
}

/// Persistence for attendance records, keyed by (person, date).
pub trait LedgerStore {
    fn find(&self, person_id: &str, date: NaiveDate)
        -> Result<Option<AttendanceRecord>, StoreError>;
    fn insert(&self, record: &AttendanceRecord) -> Result<(), StoreError>;
    fn update(&self, record: &AttendanceRecord) -> Result<(), StoreError>;
}

/// Read-only projections of the ledger for display and export.
pub trait EntryQuery {
    /// All entries, newest date first, then latest entry time first.
    fn list_entries(&self) -> Result<Vec<EntryRow>, StoreError>;
    /// Entries for a single date, latest entry time first.
    fn list_entries_on(&self, date: NaiveDate) -> Result<Vec<EntryRow>, StoreError>;
}
