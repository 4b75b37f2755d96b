use rusqlite::Connection;

/// Create the `residents` and `entries` tables if they do not exist yet.
///
/// `UNIQUE(person_id, date)` backs the one-record-per-person-per-day rule.
pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS residents (
            resident_id   TEXT PRIMARY KEY,
            name          TEXT NOT NULL,
            address       TEXT NOT NULL,
            block_no      TEXT NOT NULL,
            resident_type TEXT NOT NULL,
            image         BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
            date          TEXT NOT NULL,
            person_id     TEXT NOT NULL,
            name          TEXT NOT NULL,
            entry_time    TEXT,
            exit_time     TEXT,
            re_entry      INTEGER NOT NULL DEFAULT 0,
            re_entry_time TEXT,
            status        TEXT NOT NULL CHECK (status IN ('IN', 'OUT')),
            UNIQUE (person_id, date)
        );

        CREATE INDEX IF NOT EXISTS idx_entries_date ON entries (date DESC, entry_time DESC);",
    )
}
