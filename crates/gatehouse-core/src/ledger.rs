//! Attendance ledger: one record per (person, date) with IN / OUT / re-entry
//! transitions gated by a cooldown window.
//!
//! ```text
//! NO_RECORD --record--> IN --(>= cooldown since entry/re-entry)--> OUT
//!                        ^                                          |
//!                        +------(>= cooldown since exit, re-entry)--+
//! ```
//!
//! Attempts inside the cooldown window are not errors: they come back as
//! [`RecordOutcome::Rejected`] with the minutes still to wait.

use crate::catalog::Catalog;
use crate::store::{LedgerStore, StoreError};
use crate::types::Person;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;

pub const DEFAULT_COOLDOWN_MINUTES: i64 = 10;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("no resident found for id {0}")]
    UnknownPerson(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    In,
    Out,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::In => "IN",
            Status::Out => "OUT",
        }
    }

}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status: {0:?}")]
pub struct InvalidStatus(pub String);

impl std::str::FromStr for Status {
    type Err = InvalidStatus;

    /// Accepts exactly the stored spellings `IN` and `OUT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(Status::In),
            "OUT" => Ok(Status::Out),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

/// Stored fields of a record, used by stores to rebuild a record they persisted.
#[derive(Debug, Clone)]
pub struct RecordParts {
    pub person_id: String,
    pub name: String,
    pub date: NaiveDate,
    pub entry_time: NaiveTime,
    pub exit_time: Option<NaiveTime>,
    pub re_entry: bool,
    pub re_entry_time: Option<NaiveTime>,
    pub status: Status,
}

/// Attendance of one person on one date.
///
/// Fields only change through ledger transitions, so `status` always agrees
/// with the last accepted transition.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    person_id: String,
    name: String,
    date: NaiveDate,
    entry_time: NaiveTime,
    exit_time: Option<NaiveTime>,
    re_entry: bool,
    re_entry_time: Option<NaiveTime>,
    status: Status,
}

impl AttendanceRecord {
    /// First sighting of the day.
    pub fn open(person: &Person, now: NaiveDateTime) -> Self {
        Self {
            person_id: person.id.clone(),
            name: person.name.clone(),
            date: now.date(),
            entry_time: now.time(),
            exit_time: None,
            re_entry: false,
            re_entry_time: None,
            status: Status::In,
        }
    }

    pub fn restore(parts: RecordParts) -> Self {
        Self {
            person_id: parts.person_id,
            name: parts.name,
            date: parts.date,
            entry_time: parts.entry_time,
            exit_time: parts.exit_time,
            re_entry: parts.re_entry,
            re_entry_time: parts.re_entry_time,
            status: parts.status,
        }
    }

    pub fn person_id(&self) -> &str {
        &self.person_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn entry_time(&self) -> NaiveTime {
        self.entry_time
    }

    pub fn exit_time(&self) -> Option<NaiveTime> {
        self.exit_time
    }

    pub fn re_entry(&self) -> bool {
        self.re_entry
    }

    pub fn re_entry_time(&self) -> Option<NaiveTime> {
        self.re_entry_time
    }

    pub fn status(&self) -> Status {
        self.status
    }

    fn exit(&mut self, at: NaiveTime) {
        self.exit_time = Some(at);
        self.status = Status::Out;
    }

    fn re_enter(&mut self, at: NaiveTime) {
        self.re_entry = true;
        self.re_entry_time = Some(at);
        self.status = Status::In;
    }
}

/// An accepted state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Entered,
    Exited,
    ReEntered,
}

/// The transition that was attempted too early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingTransition {
    Exit,
    ReEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownRejected {
    pub pending: PendingTransition,
    pub remaining_minutes: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Applied {
        transition: Transition,
        record: AttendanceRecord,
    },
    Rejected(CooldownRejected),
}

/// What `record` will do for a given pre-state. Pure: no I/O, no clock.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Insert(AttendanceRecord),
    Update(AttendanceRecord, Transition),
    Reject(CooldownRejected),
}

/// Decide the transition for a sighting of `person` at `now`.
pub fn decide(
    existing: Option<&AttendanceRecord>,
    person: &Person,
    now: NaiveDateTime,
    cooldown: Duration,
) -> Decision {
    let Some(record) = existing else {
        return Decision::Insert(AttendanceRecord::open(person, now));
    };

    match record.status {
        Status::In => {
            let check_time = record.re_entry_time.unwrap_or(record.entry_time);
            let elapsed = now - record.date.and_time(check_time);
            if elapsed >= cooldown {
                let mut next = record.clone();
                next.exit(now.time());
                Decision::Update(next, Transition::Exited)
            } else {
                Decision::Reject(CooldownRejected {
                    pending: PendingTransition::Exit,
                    remaining_minutes: remaining_minutes(elapsed, cooldown),
                })
            }
        }
        Status::Out => match record.exit_time {
            Some(exit_time) => {
                let elapsed = now - record.date.and_time(exit_time);
                if elapsed >= cooldown {
                    let mut next = record.clone();
                    next.re_enter(now.time());
                    Decision::Update(next, Transition::ReEntered)
                } else {
                    Decision::Reject(CooldownRejected {
                        pending: PendingTransition::ReEntry,
                        remaining_minutes: remaining_minutes(elapsed, cooldown),
                    })
                }
            }
            // Never produced by our own transitions; only a foreign writer can get here.
            None => Decision::Reject(CooldownRejected {
                pending: PendingTransition::ReEntry,
                remaining_minutes: cooldown.num_minutes(),
            }),
        },
    }
}

/// Whole cooldown minutes minus whole elapsed minutes. A clock that went
/// backwards counts as zero elapsed.
fn remaining_minutes(elapsed: Duration, cooldown: Duration) -> i64 {
    let elapsed = elapsed.max(Duration::zero());
    cooldown.num_minutes() - elapsed.num_minutes()
}

/// Ledger over a store. `record` is a read-modify-write, serialized by the store lock.
pub struct Ledger<S> {
    store: Mutex<S>,
    cooldown: Duration,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S, cooldown: Duration) -> Self {
        Self {
            store: Mutex::new(store),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Run `f` with exclusive access to the underlying store.
    pub fn with_store<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        f(&store)
    }

    /// Apply a sighting of `person_id` at `now`.
    pub fn record(
        &self,
        catalog: &Catalog,
        person_id: &str,
        now: NaiveDateTime,
    ) -> Result<RecordOutcome, LedgerError> {
        let Some(person) = catalog.get(person_id) else {
            tracing::error!(person = person_id, "no resident found for id");
            return Err(LedgerError::UnknownPerson(person_id.to_string()));
        };

        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let existing = store.find(person_id, now.date())?;

        match decide(existing.as_ref(), person, now, self.cooldown) {
            Decision::Insert(record) => {
                store.insert(&record)?;
                tracing::info!(
                    person = person_id,
                    name = %person.name,
                    time = %record.entry_time,
                    "added new entry"
                );
                Ok(RecordOutcome::Applied {
                    transition: Transition::Entered,
                    record,
                })
            }
            Decision::Update(record, transition) => {
                store.update(&record)?;
                match transition {
                    Transition::Exited => tracing::info!(
                        person = person_id,
                        name = %person.name,
                        time = %now.time(),
                        "exit recorded, status OUT"
                    ),
                    _ => tracing::info!(
                        person = person_id,
                        name = %person.name,
                        time = %now.time(),
                        "re-entry recorded, status IN"
                    ),
                }
                Ok(RecordOutcome::Applied { transition, record })
            }
            Decision::Reject(rejected) => {
                tracing::info!(
                    person = person_id,
                    name = %person.name,
                    pending = ?rejected.pending,
                    remaining_minutes = rejected.remaining_minutes,
                    "transition rejected inside cooldown"
                );
                Ok(RecordOutcome::Rejected(rejected))
            }
        }
    }
}
