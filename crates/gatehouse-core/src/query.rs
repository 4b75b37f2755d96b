//! Read-only projection of attendance records for display and export.

use crate::ledger::{AttendanceRecord, Status};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// One row of the attendance listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRow {
    pub date: NaiveDate,
    pub name: String,
    pub entry_time: Option<NaiveTime>,
    pub exit_time: Option<NaiveTime>,
    pub re_entry: bool,
    pub re_entry_time: Option<NaiveTime>,
    pub status: Status,
    #[serde(rename = "visit_id")]
    pub person_id: String,
}

impl From<&AttendanceRecord> for EntryRow {
    fn from(record: &AttendanceRecord) -> Self {
        Self {
            date: record.date(),
            name: record.name().to_string(),
            entry_time: Some(record.entry_time()),
            exit_time: record.exit_time(),
            re_entry: record.re_entry(),
            re_entry_time: record.re_entry_time(),
            status: record.status(),
            person_id: record.person_id().to_string(),
        }
    }
}
