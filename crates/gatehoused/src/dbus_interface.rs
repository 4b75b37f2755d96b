use crate::engine::EngineHandle;
use crate::output::LatestFrame;
use chrono::NaiveDate;
use gatehouse_core::{EntryQuery, EntryRow, StoreError};
use gatehouse_store::{NewResident, ResidentError, SqliteStore, DATE_FORMAT};
use std::sync::{Arc, Mutex};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.gatehouse.Attendance1";
pub const OBJECT_PATH: &str = "/org/gatehouse/Attendance1";

/// D-Bus interface for the Gatehouse attendance daemon.
///
/// Bus name: org.gatehouse.Attendance1
/// Object path: /org/gatehouse/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
    store: Mutex<SqliteStore>,
    frames: Arc<LatestFrame>,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, store: SqliteStore, frames: Arc<LatestFrame>) -> Self {
        Self {
            engine,
            store: Mutex::new(store),
            frames,
        }
    }

    fn entries(&self, date: Option<NaiveDate>) -> Result<Vec<EntryRow>, StoreError> {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        match date {
            Some(date) => store.list_entries_on(date),
            None => store.list_entries(),
        }
    }
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

/// Empty string means "all dates".
fn parse_date_filter(date: &str) -> Result<Option<NaiveDate>, zbus::fdo::Error> {
    let date = date.trim();
    if date.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(date, DATE_FORMAT)
        .map(Some)
        .map_err(|_| zbus::fdo::Error::InvalidArgs(format!("expected YYYY-MM-DD, got {date:?}")))
}

#[interface(name = "org.gatehouse.Attendance1")]
impl AttendanceService {
    /// Attendance rows as a JSON array, newest first. `date` filters to one day.
    async fn list_entries(&self, date: &str) -> zbus::fdo::Result<String> {
        let filter = parse_date_filter(date)?;
        let rows = self.entries(filter).map_err(failed)?;
        tracing::debug!(date, rows = rows.len(), "list_entries requested");
        serde_json::to_string(&rows).map_err(failed)
    }

    /// Enroll a resident. Returns the stored id (generated when `id` is empty).
    async fn add_resident(
        &self,
        id: &str,
        name: &str,
        address: &str,
        block_no: &str,
        resident_type: &str,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(name, block_no, "add_resident requested");
        let resident = NewResident {
            id: (!id.trim().is_empty()).then(|| id.to_string()),
            name: name.to_string(),
            address: address.to_string(),
            block_no: block_no.to_string(),
            resident_type: resident_type.to_string(),
            image,
        };
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        store.add_resident(&resident).map_err(|e| match e {
            ResidentError::MissingField(_) | ResidentError::DuplicateId(_) => {
                zbus::fdo::Error::InvalidArgs(e.to_string())
            }
            ResidentError::Store(e) => failed(e),
        })
    }

    /// Rebuild the identity catalog from stored residents. Returns a JSON summary.
    async fn reload_catalog(&self) -> zbus::fdo::Result<String> {
        tracing::info!("reload_catalog requested");
        let summary = self.engine.reload_catalog().await.map_err(failed)?;
        serde_json::to_string(&summary).map_err(failed)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let residents = self
            .store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .count_residents()
            .map_err(failed)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "residents_stored": residents,
            "engine": self.engine.stats(),
        })
        .to_string())
    }

    /// JPEG of the latest annotated frame.
    async fn snapshot(&self) -> zbus::fdo::Result<Vec<u8>> {
        self.frames
            .snapshot_jpeg()
            .map_err(failed)?
            .ok_or_else(|| zbus::fdo::Error::Failed("no frame captured yet".into()))
    }

    /// Emitted for every face that matched no resident.
    #[zbus(signal)]
    pub async fn unrecognized_alert(
        emitter: &SignalEmitter<'_>,
        message: &str,
        at: &str,
    ) -> zbus::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_filter() {
        assert_eq!(parse_date_filter("").unwrap(), None);
        assert_eq!(parse_date_filter("  ").unwrap(), None);
        assert_eq!(
            parse_date_filter("2024-01-31").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31)
        );
        assert!(matches!(
            parse_date_filter("31/01/2024"),
            Err(zbus::fdo::Error::InvalidArgs(_))
        ));
    }
}
