//! SQLite snapshot of the events and participants pushed by the EventPing
//! application. The reminder engine reads it through [`EventStore`]; only
//! the RPC handlers write to it.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use eventping_core::{Contacts, Event, EventState, Participant, StoreError};
use eventping_scheduler::EventStore;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

/// Create the snapshot tables. Idempotent.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id               TEXT PRIMARY KEY,
            title            TEXT NOT NULL,
            description      TEXT,
            starts_at        TEXT NOT NULL,
            reminder_offsets TEXT NOT NULL,
            channels         TEXT NOT NULL,
            state            TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_events_state ON events(state);

        CREATE TABLE IF NOT EXISTS participants (
            event_id      TEXT NOT NULL,
            id            TEXT NOT NULL,
            contacts      TEXT NOT NULL,
            unsubscribed  INTEGER NOT NULL DEFAULT 0,
            custom_fields TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            PRIMARY KEY (event_id, id)
        ) STRICT;",
    )
}

pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    pub fn new(conn: Connection) -> rusqlite::Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn db(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("event store lock poisoned")
    }

    /// Insert or replace an event. Returns `true` if it was not known before.
    #[instrument(skip(self, event), fields(event_id = %event.id, state = %event.state))]
    pub fn upsert_event(&self, event: &Event) -> Result<bool, StoreError> {
        let offsets = serde_json::to_string(&event.reminder_offsets).map_err(corrupt)?;
        let channels = serde_json::to_string(&event.channels).map_err(corrupt)?;
        let db = self.db();
        let existed = db
            .query_row("SELECT 1 FROM events WHERE id = ?1", [&event.id], |_| Ok(()))
            .optional()
            .map_err(unavailable)?
            .is_some();
        db.execute(
            "INSERT INTO events
             (id, title, description, starts_at, reminder_offsets, channels, state, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                title            = excluded.title,
                description      = excluded.description,
                starts_at        = excluded.starts_at,
                reminder_offsets = excluded.reminder_offsets,
                channels         = excluded.channels,
                state            = excluded.state,
                updated_at       = excluded.updated_at",
            rusqlite::params![
                event.id,
                event.title,
                event.description,
                ts(event.starts_at),
                offsets,
                channels,
                event.state.to_string(),
                ts(Utc::now()),
            ],
        )
        .map_err(unavailable)?;
        debug!(created = !existed, "event stored");
        Ok(!existed)
    }

    /// Delete an event and its participants. Returns `false` if it was unknown.
    pub fn delete_event(&self, event_id: &str) -> Result<bool, StoreError> {
        let mut db = self.db();
        let tx = db.transaction().map_err(unavailable)?;
        tx.execute("DELETE FROM participants WHERE event_id = ?1", [event_id])
            .map_err(unavailable)?;
        let n = tx
            .execute("DELETE FROM events WHERE id = ?1", [event_id])
            .map_err(unavailable)?;
        tx.commit().map_err(unavailable)?;
        Ok(n > 0)
    }

    #[instrument(skip(self, participant), fields(event_id = %participant.event_id, participant_id = %participant.id))]
    pub fn upsert_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        let contacts = serde_json::to_string(&participant.contacts).map_err(corrupt)?;
        let custom = serde_json::to_string(&participant.custom_field_responses).map_err(corrupt)?;
        self.db()
            .execute(
                "INSERT INTO participants
                 (event_id, id, contacts, unsubscribed, custom_fields, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(event_id, id) DO UPDATE SET
                    contacts      = excluded.contacts,
                    unsubscribed  = excluded.unsubscribed,
                    custom_fields = excluded.custom_fields,
                    updated_at    = excluded.updated_at",
                rusqlite::params![
                    participant.event_id,
                    participant.id,
                    contacts,
                    participant.unsubscribed,
                    custom,
                    ts(Utc::now()),
                ],
            )
            .map_err(unavailable)?;
        Ok(())
    }

    fn load_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        let raw = self
            .db()
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                [event_id],
                read_event_row,
            )
            .optional()
            .map_err(unavailable)?;
        raw.map(EventRow::decode).transpose()
    }

    fn load_participants(
        &self,
        event_id: &str,
        participant_id: Option<&str>,
    ) -> Result<Vec<Participant>, StoreError> {
        let db = self.db();
        let mut stmt = db
            .prepare(
                "SELECT event_id, id, contacts, unsubscribed, custom_fields FROM participants
                 WHERE event_id = ?1 AND (?2 IS NULL OR id = ?2)
                 ORDER BY id",
            )
            .map_err(unavailable)?;
        let rows = stmt
            .query_map(rusqlite::params![event_id, participant_id], |row| {
                Ok(ParticipantRow {
                    event_id: row.get(0)?,
                    id: row.get(1)?,
                    contacts: row.get(2)?,
                    unsubscribed: row.get(3)?,
                    custom_fields: row.get(4)?,
                })
            })
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable)?;
        rows.into_iter().map(ParticipantRow::decode).collect()
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        self.load_event(event_id)
    }

    async fn list_participants(&self, event_id: &str) -> Result<Vec<Participant>, StoreError> {
        self.load_participants(event_id, None)
    }

    async fn get_participant(
        &self,
        event_id: &str,
        participant_id: &str,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .load_participants(event_id, Some(participant_id))?
            .into_iter()
            .next())
    }

    async fn list_published_events(&self) -> Result<Vec<Event>, StoreError> {
        let db = self.db();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE state = 'published' ORDER BY id"
            ))
            .map_err(unavailable)?;
        let rows = stmt
            .query_map([], read_event_row)
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable)?;
        rows.into_iter().map(EventRow::decode).collect()
    }
}

const EVENT_COLUMNS: &str = "id, title, description, starts_at, reminder_offsets, channels, state";

/// Raw columns; decoded outside the rusqlite closure so a bad row surfaces
/// as [`StoreError::Corrupt`] instead of a driver error.
struct EventRow {
    id: String,
    title: String,
    description: Option<String>,
    starts_at: String,
    offsets: String,
    channels: String,
    state: String,
}

fn read_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        starts_at: row.get(3)?,
        offsets: row.get(4)?,
        channels: row.get(5)?,
        state: row.get(6)?,
    })
}

impl EventRow {
    fn decode(self) -> Result<Event, StoreError> {
        let starts_at = DateTime::parse_from_rfc3339(&self.starts_at)
            .map_err(|e| StoreError::Corrupt(format!("event {}: starts_at: {e}", self.id)))?
            .with_timezone(&Utc);
        let state: EventState = self
            .state
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("event {}: {e}", self.id)))?;
        Ok(Event {
            reminder_offsets: serde_json::from_str(&self.offsets).map_err(corrupt)?,
            channels: serde_json::from_str(&self.channels).map_err(corrupt)?,
            id: self.id,
            title: self.title,
            description: self.description,
            starts_at,
            state,
        })
    }
}

struct ParticipantRow {
    event_id: String,
    id: String,
    contacts: String,
    unsubscribed: bool,
    custom_fields: String,
}

impl ParticipantRow {
    fn decode(self) -> Result<Participant, StoreError> {
        let contacts: Contacts = serde_json::from_str(&self.contacts).map_err(corrupt)?;
        Ok(Participant {
            custom_field_responses: serde_json::from_str(&self.custom_fields).map_err(corrupt)?,
            id: self.id,
            event_id: self.event_id,
            contacts,
            unsubscribed: self.unsubscribed,
        })
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn unavailable(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn corrupt(e: serde_json::Error) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use eventping_core::{ChannelKind, CustomFieldResponse};

    fn store() -> SqliteEventStore {
        SqliteEventStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn event(id: &str, state: EventState) -> Event {
        Event {
            id: id.into(),
            title: "Quarterly review".into(),
            description: None,
            starts_at: Utc::now() + Duration::days(1),
            reminder_offsets: [15, 60].into_iter().collect(),
            channels: [ChannelKind::Email, ChannelKind::Slack].into_iter().collect(),
            state,
        }
    }

    fn participant(event_id: &str, id: &str) -> Participant {
        Participant {
            id: id.into(),
            event_id: event_id.into(),
            contacts: Contacts {
                email: Some(format!("{id}@example.com")),
                slack_user_id: Some("U024BE7LH".into()),
                ..Default::default()
            },
            unsubscribed: false,
            custom_field_responses: vec![CustomFieldResponse {
                field: "Dietary".into(),
                value: "vegan".into(),
            }],
        }
    }

    #[tokio::test]
    async fn event_round_trips_and_upsert_reports_creation() {
        let s = store();
        let ev = event("ev1", EventState::Published);
        assert!(s.upsert_event(&ev).unwrap());

        let mut moved = ev.clone();
        moved.starts_at += Duration::hours(2);
        moved.state = EventState::Cancelled;
        assert!(!s.upsert_event(&moved).unwrap());

        let loaded = s.get_event("ev1").await.unwrap().unwrap();
        assert_eq!(loaded.state, EventState::Cancelled);
        assert_eq!(loaded.reminder_offsets, moved.reminder_offsets);
        assert_eq!(loaded.channels, moved.channels);
        assert_eq!(
            loaded.starts_at.timestamp_micros(),
            moved.starts_at.timestamp_micros()
        );
        assert!(s.get_event("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_published_events_are_listed() {
        let s = store();
        s.upsert_event(&event("b", EventState::Published)).unwrap();
        s.upsert_event(&event("a", EventState::Published)).unwrap();
        s.upsert_event(&event("c", EventState::Draft)).unwrap();
        let ids: Vec<_> = s
            .list_published_events()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn participants_are_scoped_to_their_event() {
        let s = store();
        s.upsert_event(&event("ev1", EventState::Published)).unwrap();
        s.upsert_participant(&participant("ev1", "p2")).unwrap();
        s.upsert_participant(&participant("ev1", "p1")).unwrap();
        s.upsert_participant(&participant("ev2", "p1")).unwrap();

        let list = s.list_participants("ev1").await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "p1");
        assert_eq!(list[0].custom_field_responses[0].value, "vegan");

        let mut gone = participant("ev1", "p1");
        gone.unsubscribed = true;
        s.upsert_participant(&gone).unwrap();
        let p1 = s.get_participant("ev1", "p1").await.unwrap().unwrap();
        assert!(p1.unsubscribed);
        assert_eq!(p1.contacts.for_channel(ChannelKind::Slack), Some("U024BE7LH"));
        assert!(s.get_participant("ev1", "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_an_event_drops_its_participants() {
        let s = store();
        s.upsert_event(&event("ev1", EventState::Published)).unwrap();
        s.upsert_participant(&participant("ev1", "p1")).unwrap();

        assert!(s.delete_event("ev1").unwrap());
        assert!(!s.delete_event("ev1").unwrap());
        assert!(s.get_event("ev1").await.unwrap().is_none());
        assert!(s.list_participants("ev1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_row_is_reported_as_corrupt() {
        let s = store();
        s.upsert_event(&event("ev1", EventState::Published)).unwrap();
        s.db()
            .execute("UPDATE events SET state = 'archived' WHERE id = 'ev1'", [])
            .unwrap();
        assert!(matches!(
            s.get_event("ev1").await,
            Err(StoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eventping.db");
        let path = path.to_str().unwrap();
        {
            let s = SqliteEventStore::new(crate::open_db(path).unwrap()).unwrap();
            s.upsert_event(&event("ev1", EventState::Published)).unwrap();
            s.upsert_participant(&participant("ev1", "p1")).unwrap();
        }
        let s = SqliteEventStore::new(crate::open_db(path).unwrap()).unwrap();
        assert_eq!(s.list_published_events().await.unwrap().len(), 1);
        assert_eq!(s.list_participants("ev1").await.unwrap().len(), 1);
    }
}
