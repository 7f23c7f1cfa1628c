use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use eventping_core::{ChannelKind, ReminderIdentity};
use rusqlite::{types::Type, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument, warn};

use crate::{
    db::init_db,
    error::Result,
    types::{DeliveryRecord, DeliveryStatus, Resolution, SkipReason},
};

const RECORD_COLUMNS: &str = "event_id, participant_id, offset_minutes, channel, status, due_at,
     attempts, last_error, skip_reason, sent_at, updated_at";

const IDENTITY_CONFLICT: &str = "ON CONFLICT (event_id, participant_id, offset_minutes, channel)";

/// Durable ledger of reminder outcomes, keyed by [`ReminderIdentity`].
///
/// Every transition is a single conditional statement, so concurrent writers
/// for the same identity converge: once a row is `sent` nothing moves it.
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct DeliveryRecorder {
    conn: Arc<Mutex<Connection>>,
}

impl DeliveryRecorder {
    /// Wrap `conn`, creating the `deliveries` table if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn db(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("delivery recorder mutex poisoned")
    }

    #[instrument(skip(self), fields(identity = %identity))]
    pub fn get(&self, identity: &ReminderIdentity) -> Result<Option<DeliveryRecord>> {
        let db = self.db();
        let record = db
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM deliveries
                     WHERE event_id = ?1 AND participant_id = ?2
                       AND offset_minutes = ?3 AND channel = ?4"
                ),
                rusqlite::params![
                    identity.event_id,
                    identity.participant_id,
                    identity.offset_minutes,
                    identity.channel.as_str()
                ],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Open (or keep open) the record for a planned job.
    ///
    /// Creates the row, refreshes `due_at` of a pending row, and reopens a
    /// skipped one. Closed and in-flight rows are left alone. Returns `true`
    /// when the identity is pending afterwards and so belongs in the queue.
    #[instrument(skip(self), fields(identity = %identity))]
    pub fn mark_pending(&self, identity: &ReminderIdentity, due_at: DateTime<Utc>) -> Result<bool> {
        let now = ts(Utc::now());
        let db = self.db();
        db.execute(
            &format!(
                "INSERT INTO deliveries
                 (event_id, participant_id, offset_minutes, channel, status, due_at,
                  attempts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, 0, ?6, ?6)
                 {IDENTITY_CONFLICT} DO UPDATE SET
                    status      = 'pending',
                    due_at      = excluded.due_at,
                    attempts    = CASE WHEN deliveries.status = 'skipped' THEN 0
                                       ELSE deliveries.attempts END,
                    last_error  = CASE WHEN deliveries.status = 'skipped' THEN NULL
                                       ELSE deliveries.last_error END,
                    skip_reason = NULL,
                    updated_at  = excluded.updated_at
                 WHERE deliveries.status = 'skipped'
                    OR (deliveries.status = 'pending' AND deliveries.due_at IS NOT excluded.due_at)"
            ),
            rusqlite::params![
                identity.event_id,
                identity.participant_id,
                identity.offset_minutes,
                identity.channel.as_str(),
                ts(due_at),
                now
            ],
        )?;
        let status: String = db.query_row(
            "SELECT status FROM deliveries
             WHERE event_id = ?1 AND participant_id = ?2 AND offset_minutes = ?3 AND channel = ?4",
            rusqlite::params![
                identity.event_id,
                identity.participant_id,
                identity.offset_minutes,
                identity.channel.as_str()
            ],
            |row| row.get(0),
        )?;
        Ok(status == DeliveryStatus::Pending.as_str())
    }

    /// Claim a pending identity for one send attempt.
    ///
    /// Returns the attempt number (1-based) when the claim succeeded, or
    /// `None` when the row is not pending any more (sent, skipped, claimed
    /// by someone else).
    #[instrument(skip(self), fields(identity = %identity))]
    pub fn mark_in_flight(
        &self,
        identity: &ReminderIdentity,
        due_at: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let now = ts(Utc::now());
        let db = self.db();
        let attempts = db
            .query_row(
                &format!(
                    "INSERT INTO deliveries
                     (event_id, participant_id, offset_minutes, channel, status, due_at,
                      attempts, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'in_flight', ?5, 1, ?6, ?6)
                     {IDENTITY_CONFLICT} DO UPDATE SET
                        status     = 'in_flight',
                        attempts   = deliveries.attempts + 1,
                        updated_at = excluded.updated_at
                     WHERE deliveries.status = 'pending'
                     RETURNING attempts"
                ),
                rusqlite::params![
                    identity.event_id,
                    identity.participant_id,
                    identity.offset_minutes,
                    identity.channel.as_str(),
                    ts(due_at),
                    now
                ],
                |row| row.get::<_, u32>(0),
            )
            .optional()?;
        Ok(attempts)
    }

    /// Record a successful delivery. Idempotent: returns `false` and changes
    /// nothing when the identity is already sent.
    #[instrument(skip(self), fields(identity = %identity))]
    pub fn mark_sent(&self, identity: &ReminderIdentity) -> Result<bool> {
        let now = ts(Utc::now());
        let n = self.db().execute(
            &format!(
                "INSERT INTO deliveries
                 (event_id, participant_id, offset_minutes, channel, status,
                  attempts, sent_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'sent', 1, ?5, ?5, ?5)
                 {IDENTITY_CONFLICT} DO UPDATE SET
                    status      = 'sent',
                    sent_at     = excluded.sent_at,
                    last_error  = NULL,
                    skip_reason = NULL,
                    updated_at  = excluded.updated_at
                 WHERE deliveries.status != 'sent'"
            ),
            rusqlite::params![
                identity.event_id,
                identity.participant_id,
                identity.offset_minutes,
                identity.channel.as_str(),
                now
            ],
        )?;
        if n == 0 {
            debug!("already sent, mark_sent is a no-op");
        }
        Ok(n > 0)
    }

    /// Record a failed attempt.
    ///
    /// A non-terminal failure returns the row to `pending` (keeping its
    /// attempt count) so it can be retried; a terminal one closes it as
    /// `failed`. Closed rows are never touched.
    #[instrument(skip(self, reason), fields(identity = %identity))]
    pub fn mark_failed(
        &self,
        identity: &ReminderIdentity,
        terminal: bool,
        reason: &str,
    ) -> Result<bool> {
        let now = ts(Utc::now());
        let db = self.db();
        let n = if terminal {
            db.execute(
                &format!(
                    "INSERT INTO deliveries
                     (event_id, participant_id, offset_minutes, channel, status,
                      last_error, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'failed', ?5, ?6, ?6)
                     {IDENTITY_CONFLICT} DO UPDATE SET
                        status     = 'failed',
                        last_error = excluded.last_error,
                        updated_at = excluded.updated_at
                     WHERE deliveries.status NOT IN ('sent', 'failed', 'unknown')"
                ),
                rusqlite::params![
                    identity.event_id,
                    identity.participant_id,
                    identity.offset_minutes,
                    identity.channel.as_str(),
                    reason,
                    now
                ],
            )?
        } else {
            db.execute(
                "UPDATE deliveries SET status = 'pending', last_error = ?5, updated_at = ?6
                 WHERE event_id = ?1 AND participant_id = ?2
                   AND offset_minutes = ?3 AND channel = ?4
                   AND status IN ('in_flight', 'pending')",
                rusqlite::params![
                    identity.event_id,
                    identity.participant_id,
                    identity.offset_minutes,
                    identity.channel.as_str(),
                    reason,
                    now
                ],
            )?
        };
        Ok(n > 0)
    }

    /// Record that an identity is deliberately not sent.
    ///
    /// Only pending or already-skipped rows change; a skipped row is
    /// rewritten only when the reason differs, so replanning an unchanged
    /// event does not churn `updated_at`.
    #[instrument(skip(self), fields(identity = %identity, reason = %reason))]
    pub fn mark_skipped(
        &self,
        identity: &ReminderIdentity,
        due_at: Option<DateTime<Utc>>,
        reason: SkipReason,
    ) -> Result<bool> {
        let now = ts(Utc::now());
        let n = self.db().execute(
            &format!(
                "INSERT INTO deliveries
                 (event_id, participant_id, offset_minutes, channel, status, due_at,
                  skip_reason, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'skipped', ?5, ?6, ?7, ?7)
                 {IDENTITY_CONFLICT} DO UPDATE SET
                    status      = 'skipped',
                    due_at      = COALESCE(excluded.due_at, deliveries.due_at),
                    skip_reason = excluded.skip_reason,
                    updated_at  = excluded.updated_at
                 WHERE deliveries.status = 'pending'
                    OR (deliveries.status = 'skipped'
                        AND deliveries.skip_reason IS NOT excluded.skip_reason)"
            ),
            rusqlite::params![
                identity.event_id,
                identity.participant_id,
                identity.offset_minutes,
                identity.channel.as_str(),
                due_at.map(ts),
                reason.as_str(),
                now
            ],
        )?;
        Ok(n > 0)
    }

    /// Flag an in-flight identity whose outcome cannot be established.
    pub fn mark_unknown(&self, identity: &ReminderIdentity, detail: &str) -> Result<bool> {
        let n = self.db().execute(
            "UPDATE deliveries SET status = 'unknown', last_error = ?5, updated_at = ?6
             WHERE event_id = ?1 AND participant_id = ?2
               AND offset_minutes = ?3 AND channel = ?4 AND status = 'in_flight'",
            rusqlite::params![
                identity.event_id,
                identity.participant_id,
                identity.offset_minutes,
                identity.channel.as_str(),
                detail,
                ts(Utc::now())
            ],
        )?;
        Ok(n > 0)
    }

    /// Skip every pending row of an event. Returns the number of rows changed.
    pub fn skip_pending_for_event(&self, event_id: &str, reason: SkipReason) -> Result<usize> {
        let n = self.db().execute(
            "UPDATE deliveries SET status = 'skipped', skip_reason = ?2, updated_at = ?3
             WHERE event_id = ?1 AND status = 'pending'",
            rusqlite::params![event_id, reason.as_str(), ts(Utc::now())],
        )?;
        Ok(n)
    }

    /// Skip every pending row of one participant.
    pub fn skip_pending_for_participant(
        &self,
        event_id: &str,
        participant_id: &str,
        reason: SkipReason,
    ) -> Result<usize> {
        let n = self.db().execute(
            "UPDATE deliveries SET status = 'skipped', skip_reason = ?3, updated_at = ?4
             WHERE event_id = ?1 AND participant_id = ?2 AND status = 'pending'",
            rusqlite::params![event_id, participant_id, reason.as_str(), ts(Utc::now())],
        )?;
        Ok(n)
    }

    /// Stop all reminders of an event until [`release_event`] is called.
    /// Returns `false` when the event was already held.
    ///
    /// [`release_event`]: Self::release_event
    pub fn hold_event(&self, event_id: &str) -> Result<bool> {
        let n = self.db().execute(
            "INSERT INTO event_holds (event_id, held_at) VALUES (?1, ?2)
             ON CONFLICT (event_id) DO NOTHING",
            rusqlite::params![event_id, ts(Utc::now())],
        )?;
        Ok(n > 0)
    }

    /// Lift an operator hold. Returns `false` when the event was not held.
    pub fn release_event(&self, event_id: &str) -> Result<bool> {
        let n = self
            .db()
            .execute("DELETE FROM event_holds WHERE event_id = ?1", [event_id])?;
        Ok(n > 0)
    }

    pub fn is_held(&self, event_id: &str) -> Result<bool> {
        let held = self
            .db()
            .query_row(
                "SELECT 1 FROM event_holds WHERE event_id = ?1",
                [event_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(held)
    }

    /// All records of an event, for the delivery-status view.
    pub fn list_for_event(&self, event_id: &str) -> Result<Vec<DeliveryRecord>> {
        let db = self.db();
        let mut stmt = db.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM deliveries
             WHERE event_id = ?1
             ORDER BY participant_id, channel, offset_minutes DESC"
        ))?;
        let records = stmt
            .query_map([event_id], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Identities the planner must not queue: closed rows plus rows that
    /// are in flight right now.
    pub fn closed_identities(&self, event_id: &str) -> Result<HashSet<ReminderIdentity>> {
        let db = self.db();
        let mut stmt = db.prepare_cached(
            "SELECT event_id, participant_id, offset_minutes, channel FROM deliveries
             WHERE event_id = ?1 AND status IN ('sent', 'failed', 'unknown', 'in_flight')",
        )?;
        let ids = stmt
            .query_map([event_id], row_to_identity)?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    /// Events that still have pending rows.
    pub fn open_event_ids(&self) -> Result<Vec<String>> {
        let db = self.db();
        let mut stmt = db.prepare(
            "SELECT DISTINCT event_id FROM deliveries WHERE status = 'pending' ORDER BY event_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// On startup, any `in_flight` row belongs to a process that died mid-send.
    /// Its outcome is unknown and it must not be re-sent automatically.
    pub fn quarantine_in_flight(&self) -> Result<usize> {
        let n = self.db().execute(
            "UPDATE deliveries
             SET status = 'unknown', last_error = 'interrupted during delivery', updated_at = ?1
             WHERE status = 'in_flight'",
            [ts(Utc::now())],
        )?;
        if n > 0 {
            warn!(count = n, "in-flight deliveries quarantined as unknown");
        }
        Ok(n)
    }

    /// Apply an operator decision to an `unknown` record. Returns `false`
    /// when the record is not unknown.
    #[instrument(skip(self), fields(identity = %identity))]
    pub fn resolve_unknown(
        &self,
        identity: &ReminderIdentity,
        resolution: Resolution,
    ) -> Result<bool> {
        let sql = match resolution {
            Resolution::MarkSent => {
                "UPDATE deliveries SET status = 'sent', sent_at = ?5, updated_at = ?5
                 WHERE event_id = ?1 AND participant_id = ?2
                   AND offset_minutes = ?3 AND channel = ?4 AND status = 'unknown'"
            }
            Resolution::Retry => {
                "UPDATE deliveries SET status = 'pending', updated_at = ?5
                 WHERE event_id = ?1 AND participant_id = ?2
                   AND offset_minutes = ?3 AND channel = ?4 AND status = 'unknown'"
            }
        };
        let n = self.db().execute(
            sql,
            rusqlite::params![
                identity.event_id,
                identity.participant_id,
                identity.offset_minutes,
                identity.channel.as_str(),
                ts(Utc::now())
            ],
        )?;
        if n > 0 {
            info!(?resolution, "unknown delivery resolved");
        }
        Ok(n > 0)
    }

    /// Delete sent, failed and skipped rows not touched since `cutoff`.
    pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let n = self.db().execute(
            "DELETE FROM deliveries
             WHERE status IN ('sent', 'failed', 'skipped') AND updated_at < ?1",
            [ts(cutoff)],
        )?;
        Ok(n)
    }

    /// Row count per status, for health reporting.
    pub fn status_counts(&self) -> Result<Vec<(DeliveryStatus, u64)>> {
        let db = self.db();
        let mut stmt =
            db.prepare("SELECT status, COUNT(*) FROM deliveries GROUP BY status ORDER BY status")?;
        let counts = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let status = status
                    .parse::<DeliveryStatus>()
                    .map_err(|e| conversion_error(0, e))?;
                Ok((status, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }
}

/// Fixed-width UTC timestamps so string comparison orders chronologically.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn row_to_identity(row: &Row<'_>) -> rusqlite::Result<ReminderIdentity> {
    let channel: String = row.get(3)?;
    Ok(ReminderIdentity {
        event_id: row.get(0)?,
        participant_id: row.get(1)?,
        offset_minutes: row.get(2)?,
        channel: channel
            .parse::<ChannelKind>()
            .map_err(|e| conversion_error(3, e))?,
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DeliveryRecord> {
    let status: String = row.get(4)?;
    let due_at: Option<String> = row.get(5)?;
    let skip_reason: Option<String> = row.get(8)?;
    let sent_at: Option<String> = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok(DeliveryRecord {
        identity: row_to_identity(row)?,
        status: status.parse().map_err(|e| conversion_error(4, e))?,
        due_at: due_at.as_deref().map(|s| parse_ts(5, s)).transpose()?,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
        skip_reason: skip_reason
            .as_deref()
            .map(|s| s.parse::<SkipReason>().map_err(|e| conversion_error(8, e)))
            .transpose()?,
        sent_at: sent_at.as_deref().map(|s| parse_ts(9, s)).transpose()?,
        updated_at: parse_ts(10, &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn recorder() -> DeliveryRecorder {
        DeliveryRecorder::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn id(participant: &str) -> ReminderIdentity {
        ReminderIdentity::new("ev1", participant, 60, ChannelKind::Email)
    }

    fn status(rec: &DeliveryRecorder, identity: &ReminderIdentity) -> DeliveryStatus {
        rec.get(identity).unwrap().expect("record exists").status
    }

    #[test]
    fn missing_record_is_none() {
        assert!(recorder().get(&id("p1")).unwrap().is_none());
    }

    #[test]
    fn mark_sent_twice_changes_nothing_the_second_time() {
        let rec = recorder();
        let identity = id("p1");
        assert!(rec.mark_sent(&identity).unwrap());
        let first = rec.get(&identity).unwrap().unwrap();
        assert!(!rec.mark_sent(&identity).unwrap());
        let second = rec.get(&identity).unwrap().unwrap();
        assert_eq!(first.status, DeliveryStatus::Sent);
        assert_eq!(first.sent_at, second.sent_at);
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[test]
    fn sent_record_cannot_be_reopened_skipped_or_failed() {
        let rec = recorder();
        let identity = id("p1");
        rec.mark_sent(&identity).unwrap();
        assert!(!rec.mark_pending(&identity, Utc::now()).unwrap());
        assert!(!rec.mark_skipped(&identity, None, SkipReason::Unsubscribed).unwrap());
        assert!(!rec.mark_failed(&identity, true, "boom").unwrap());
        assert_eq!(rec.mark_in_flight(&identity, Utc::now()).unwrap(), None);
        assert_eq!(status(&rec, &identity), DeliveryStatus::Sent);
    }

    #[test]
    fn in_flight_claim_counts_attempts_and_is_exclusive() {
        let rec = recorder();
        let identity = id("p1");
        let due = Utc::now();
        assert!(rec.mark_pending(&identity, due).unwrap());
        assert_eq!(rec.mark_in_flight(&identity, due).unwrap(), Some(1));
        // second claim while in flight fails
        assert_eq!(rec.mark_in_flight(&identity, due).unwrap(), None);

        assert!(rec.mark_failed(&identity, false, "503").unwrap());
        let r = rec.get(&identity).unwrap().unwrap();
        assert_eq!(r.status, DeliveryStatus::Pending);
        assert_eq!(r.attempts, 1);
        assert_eq!(r.last_error.as_deref(), Some("503"));

        assert_eq!(rec.mark_in_flight(&identity, due).unwrap(), Some(2));
        assert!(rec.mark_failed(&identity, true, "invalid address").unwrap());
        assert_eq!(status(&rec, &identity), DeliveryStatus::Failed);
    }

    #[test]
    fn skipped_record_reopens_with_fresh_attempts() {
        let rec = recorder();
        let identity = id("p1");
        let due = Utc::now() + Duration::hours(1);
        rec.mark_pending(&identity, due).unwrap();
        rec.mark_in_flight(&identity, due).unwrap();
        rec.mark_failed(&identity, false, "timeout").unwrap();
        assert!(rec.mark_skipped(&identity, Some(due), SkipReason::Unsubscribed).unwrap());
        let skipped = rec.get(&identity).unwrap().unwrap();
        assert_eq!(skipped.skip_reason, Some(SkipReason::Unsubscribed));

        // same reason again is not a change
        assert!(!rec.mark_skipped(&identity, Some(due), SkipReason::Unsubscribed).unwrap());

        assert!(rec.mark_pending(&identity, due).unwrap());
        let reopened = rec.get(&identity).unwrap().unwrap();
        assert_eq!(reopened.status, DeliveryStatus::Pending);
        assert_eq!(reopened.attempts, 0);
        assert_eq!(reopened.skip_reason, None);
    }

    #[test]
    fn pending_due_at_follows_reschedule() {
        let rec = recorder();
        let identity = id("p1");
        let due = Utc::now() + Duration::hours(2);
        rec.mark_pending(&identity, due).unwrap();
        let later = due + Duration::hours(24);
        assert!(rec.mark_pending(&identity, later).unwrap());
        let r = rec.get(&identity).unwrap().unwrap();
        assert_eq!(r.due_at.map(ts), Some(ts(later)));
    }

    #[test]
    fn closed_identities_include_in_flight_but_not_skipped() {
        let rec = recorder();
        let due = Utc::now();
        rec.mark_sent(&id("sent")).unwrap();
        rec.mark_pending(&id("flying"), due).unwrap();
        rec.mark_in_flight(&id("flying"), due).unwrap();
        rec.mark_skipped(&id("skipped"), None, SkipReason::MissingContact).unwrap();
        rec.mark_pending(&id("pending"), due).unwrap();

        let closed = rec.closed_identities("ev1").unwrap();
        assert_eq!(closed.len(), 2);
        assert!(closed.contains(&id("sent")));
        assert!(closed.contains(&id("flying")));
    }

    #[test]
    fn quarantine_then_resolve() {
        let rec = recorder();
        let identity = id("p1");
        let due = Utc::now();
        rec.mark_pending(&identity, due).unwrap();
        rec.mark_in_flight(&identity, due).unwrap();

        assert_eq!(rec.quarantine_in_flight().unwrap(), 1);
        assert_eq!(status(&rec, &identity), DeliveryStatus::Unknown);
        assert!(!rec.mark_pending(&identity, due).unwrap());

        assert!(rec.resolve_unknown(&identity, Resolution::Retry).unwrap());
        assert_eq!(status(&rec, &identity), DeliveryStatus::Pending);
        assert!(!rec.resolve_unknown(&identity, Resolution::MarkSent).unwrap());
    }

    #[test]
    fn bulk_skip_leaves_closed_rows_alone() {
        let rec = recorder();
        let due = Utc::now();
        rec.mark_pending(&id("a"), due).unwrap();
        rec.mark_pending(&id("b"), due).unwrap();
        rec.mark_sent(&id("c")).unwrap();

        assert_eq!(rec.skip_pending_for_participant("ev1", "a", SkipReason::Unsubscribed).unwrap(), 1);
        assert_eq!(rec.skip_pending_for_event("ev1", SkipReason::EventDeleted).unwrap(), 1);
        assert_eq!(status(&rec, &id("c")), DeliveryStatus::Sent);
        let reasons: Vec<_> = rec
            .list_for_event("ev1")
            .unwrap()
            .into_iter()
            .map(|r| r.skip_reason)
            .collect();
        assert_eq!(
            reasons,
            vec![
                Some(SkipReason::Unsubscribed),
                Some(SkipReason::EventDeleted),
                None
            ]
        );
    }

    #[test]
    fn hold_survives_until_released() {
        let rec = recorder();
        assert!(!rec.is_held("ev1").unwrap());
        assert!(rec.hold_event("ev1").unwrap());
        assert!(!rec.hold_event("ev1").unwrap());
        assert!(rec.is_held("ev1").unwrap());
        assert!(!rec.is_held("ev2").unwrap());

        assert!(rec.release_event("ev1").unwrap());
        assert!(!rec.release_event("ev1").unwrap());
        assert!(!rec.is_held("ev1").unwrap());
    }

    #[test]
    fn purge_removes_only_old_closed_rows() {
        let rec = recorder();
        rec.mark_sent(&id("old")).unwrap();
        rec.mark_pending(&id("open"), Utc::now()).unwrap();

        assert_eq!(rec.purge_before(Utc::now() - Duration::days(30)).unwrap(), 0);
        assert_eq!(rec.purge_before(Utc::now() + Duration::seconds(1)).unwrap(), 1);
        assert!(rec.get(&id("old")).unwrap().is_none());
        assert!(rec.get(&id("open")).unwrap().is_some());
    }

    #[test]
    fn status_counts_groups_rows() {
        let rec = recorder();
        rec.mark_sent(&id("a")).unwrap();
        rec.mark_sent(&id("b")).unwrap();
        rec.mark_pending(&id("c"), Utc::now()).unwrap();
        let counts = rec.status_counts().unwrap();
        assert!(counts.contains(&(DeliveryStatus::Sent, 2)));
        assert!(counts.contains(&(DeliveryStatus::Pending, 1)));
    }
}
