use crate::{unavailable, SqliteStore};
use gatehouse_core::{CatalogSource, ReferenceImage, StoreError};
use rusqlite::params;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResidentError {
    #[error("all fields are required: missing {0}")]
    MissingField(&'static str),
    #[error("resident id already exists: {0}")]
    DuplicateId(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A resident to enroll. `id` is generated when absent.
#[derive(Debug, Clone, Default)]
pub struct NewResident {
    pub id: Option<String>,
    pub name: String,
    pub address: String,
    pub block_no: String,
    pub resident_type: String,
    pub image: Vec<u8>,
}

impl NewResident {
    fn validate(&self) -> Result<(), ResidentError> {
        let required = [
            ("name", self.name.trim().is_empty()),
            ("address", self.address.trim().is_empty()),
            ("block_no", self.block_no.trim().is_empty()),
            ("resident_type", self.resident_type.trim().is_empty()),
            ("image", self.image.is_empty()),
        ];
        match required.iter().find(|(_, missing)| *missing) {
            Some((field, _)) => Err(ResidentError::MissingField(*field)),
            None => Ok(()),
        }
    }
}

fn generate_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("R{}", &uuid[..12])
}

impl SqliteStore {
    /// Store a new resident and return their id.
    ///
    /// The running catalog is not touched: the resident becomes recognizable
    /// after the next catalog reload.
    pub fn add_resident(&self, resident: &NewResident) -> Result<String, ResidentError> {
        resident.validate()?;

        let id = match resident.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_id(),
        };

        let result = self.conn.execute(
            "INSERT INTO residents (resident_id, name, address, block_no, resident_type, image)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                resident.name.trim(),
                resident.address.trim(),
                resident.block_no.trim(),
                resident.resident_type.trim(),
                resident.image,
            ],
        );

        match result {
            Ok(_) => {
                tracing::info!(resident = %id, name = %resident.name, "resident added");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(ResidentError::DuplicateId(id))
            }
            Err(e) => Err(ResidentError::Store(unavailable(e))),
        }
    }

    pub fn count_residents(&self) -> Result<usize, StoreError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM residents", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(unavailable)
    }
}

impl CatalogSource for SqliteStore {
    fn list_residents(&self) -> Result<Vec<ReferenceImage>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT resident_id, name, image FROM residents ORDER BY rowid")
            .map_err(unavailable)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ReferenceImage {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    image: row.get(2)?,
                })
            })
            .map_err(unavailable)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(unavailable)
    }
}
