//! gatehouse-core — Identity catalog, face matching and the attendance ledger.
//!
//! Storage, camera and the recognition model are reached only through the
//! traits in [`store`], [`analyzer`] and [`notify`].

pub mod analyzer;
pub mod catalog;
pub mod clock;
pub mod ledger;
pub mod notify;
pub mod query;
pub mod store;
pub mod types;

pub use analyzer::{AnalyzerError, Detection, FaceAnalyzer};
pub use catalog::{Catalog, CatalogBuild, ExcludedPerson, ExclusionReason, Identification};
pub use clock::{Clock, SystemClock};
pub use ledger::{
    AttendanceRecord, CooldownRejected, InvalidStatus, Ledger, LedgerError, PendingTransition,
    RecordOutcome, RecordParts, Status, Transition,
};
pub use notify::{Alert, Notifier};
pub use query::EntryRow;
pub use store::{CatalogSource, EntryQuery, LedgerStore, ReferenceImage, StoreError};
pub use types::{BestMatch, Embedding, EuclideanMatcher, FaceRegion, Matcher, Person};
