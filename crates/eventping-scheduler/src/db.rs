use rusqlite::Connection;

use crate::error::Result;

/// Initialise the delivery ledger schema in `conn`.
///
/// The primary key is the full reminder identity, which is what makes every
/// write an idempotent upsert.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS deliveries (
            event_id        TEXT    NOT NULL,
            participant_id  TEXT    NOT NULL,
            offset_minutes  INTEGER NOT NULL,
            channel         TEXT    NOT NULL,
            status          TEXT    NOT NULL DEFAULT 'pending',
            due_at          TEXT,               -- ISO-8601 or NULL
            attempts        INTEGER NOT NULL DEFAULT 0,
            last_error      TEXT,
            skip_reason     TEXT,
            sent_at         TEXT,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL,
            PRIMARY KEY (event_id, participant_id, offset_minutes, channel)
        ) STRICT;

        -- Purge scans closed rows by age.
        CREATE INDEX IF NOT EXISTS idx_deliveries_status_updated
            ON deliveries (status, updated_at);

        -- Events an operator stopped; replans plan nothing while held.
        CREATE TABLE IF NOT EXISTS event_holds (
            event_id   TEXT PRIMARY KEY,
            held_at    TEXT NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
