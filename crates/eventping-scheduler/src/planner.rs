//! Reminder Planner: derives the authoritative job set for one event and
//! diffs it against what the queue currently holds.
//!
//! Everything here is pure. The service applies the output to the queue
//! and the recorder.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use eventping_core::{Event, EventState, Participant, ReminderIdentity};

use crate::types::{ReminderJob, SkipReason};

/// An identity that exists on paper but will not be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedJob {
    pub identity: ReminderIdentity,
    pub due_at: DateTime<Utc>,
    pub reason: SkipReason,
}

/// Output of [`plan`]: jobs to hold, and identities to record as skipped.
#[derive(Debug, Default)]
pub struct Plan {
    pub jobs: Vec<ReminderJob>,
    pub skipped: Vec<SkippedJob>,
}

impl Plan {
    pub fn skip_reason(&self, identity: &ReminderIdentity) -> Option<SkipReason> {
        self.skipped
            .iter()
            .find(|s| &s.identity == identity)
            .map(|s| s.reason)
    }

    /// Turn every job into a skip with `reason`.
    pub fn withhold(mut self, reason: SkipReason) -> Plan {
        self.skipped
            .extend(self.jobs.drain(..).map(|job| SkippedJob {
                identity: job.identity,
                due_at: job.due_at,
                reason,
            }));
        self
    }
}

/// Compute the reminder jobs `event` should have right now.
///
/// One job per (participant, channel, offset) for participants that are
/// subscribed and have a contact for the channel. A due time already in the
/// past still yields a job; it is simply due immediately. A draft event
/// yields nothing. A cancelled, completed or already-started event yields
/// only skips.
pub fn plan(event: &Event, participants: &[Participant], now: DateTime<Utc>) -> Plan {
    let mut out = Plan::default();
    if event.state == EventState::Draft {
        return out;
    }
    let event_skip = event_skip_reason(event, now);

    let mut seen = HashSet::new();
    for participant in participants.iter().filter(|p| p.event_id == event.id) {
        if !seen.insert(participant.id.as_str()) {
            continue;
        }
        for &channel in &event.channels {
            let contact = participant.contacts.for_channel(channel);
            for &offset in &event.reminder_offsets {
                let identity =
                    ReminderIdentity::new(&event.id, &participant.id, offset, channel);
                let due_at = event.due_at(offset);
                let reason = if let Some(reason) = event_skip {
                    Some(reason)
                } else if participant.unsubscribed {
                    Some(SkipReason::Unsubscribed)
                } else if contact.is_none() {
                    Some(SkipReason::MissingContact)
                } else {
                    None
                };
                match reason {
                    Some(reason) => out.skipped.push(SkippedJob {
                        identity,
                        due_at,
                        reason,
                    }),
                    None => out.jobs.push(ReminderJob::new(identity, due_at)),
                }
            }
        }
    }
    out
}

/// Why no reminder of `event` may be sent at `now`, if anything rules
/// them all out.
pub fn event_skip_reason(event: &Event, now: DateTime<Utc>) -> Option<SkipReason> {
    match event.state {
        EventState::Draft => Some(SkipReason::EventNotPublished),
        EventState::Cancelled => Some(SkipReason::EventCancelled),
        EventState::Completed => Some(SkipReason::EventCompleted),
        EventState::Published if event.has_started(now) => Some(SkipReason::EventStarted),
        EventState::Published => None,
    }
}

/// Difference between a fresh [`Plan`] and the jobs currently queued for
/// the same event.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// New identities, and identities whose due time moved. Inserting
    /// replaces the stale queued job.
    pub insert: Vec<ReminderJob>,
    /// Queued identities the plan no longer produces.
    pub cancel: Vec<ReminderIdentity>,
    /// How many of `insert` replace a queued job with a different due time.
    pub rescheduled: usize,
    /// Identities already queued with the same due time. Left untouched so
    /// their retry backoff survives.
    pub unchanged: usize,
}

/// Diff `plan` against `queued` (the event's jobs currently in the queue).
///
/// Identities in `closed` (sent, failed, unknown or in flight) are never
/// inserted, however often the event is replanned.
pub fn reconcile(
    plan: &Plan,
    queued: &[ReminderJob],
    closed: &HashSet<ReminderIdentity>,
) -> Reconciliation {
    let queued_by_id: HashMap<&ReminderIdentity, &ReminderJob> =
        queued.iter().map(|j| (&j.identity, j)).collect();
    let wanted: HashSet<&ReminderIdentity> = plan
        .jobs
        .iter()
        .map(|j| &j.identity)
        .filter(|id| !closed.contains(*id))
        .collect();

    let mut out = Reconciliation::default();
    for job in &plan.jobs {
        if closed.contains(&job.identity) {
            continue;
        }
        match queued_by_id.get(&job.identity) {
            Some(existing) if existing.due_at == job.due_at => out.unchanged += 1,
            Some(_) => {
                out.rescheduled += 1;
                out.insert.push(job.clone());
            }
            None => out.insert.push(job.clone()),
        }
    }
    out.cancel = queued
        .iter()
        .filter(|j| !wanted.contains(&j.identity))
        .map(|j| j.identity.clone())
        .collect();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use eventping_core::{ChannelKind, Contacts};

    fn event(starts_in: Duration, offsets: &[u32], channels: &[ChannelKind]) -> Event {
        Event {
            id: "ev1".into(),
            title: "Kickoff".into(),
            description: None,
            starts_at: Utc::now() + starts_in,
            reminder_offsets: offsets.iter().copied().collect(),
            channels: channels.iter().copied().collect(),
            state: EventState::Published,
        }
    }

    fn participant(id: &str, email: Option<&str>, phone: Option<&str>) -> Participant {
        Participant {
            id: id.into(),
            event_id: "ev1".into(),
            contacts: Contacts {
                email: email.map(String::from),
                phone: phone.map(String::from),
                ..Default::default()
            },
            unsubscribed: false,
            custom_field_responses: Vec::new(),
        }
    }

    #[test]
    fn email_only_participant_skips_sms() {
        let ev = event(Duration::days(3), &[60, 1440], &[ChannelKind::Email, ChannelKind::Sms]);
        let p = plan(&ev, &[participant("p1", Some("a@example.com"), None)], Utc::now());

        assert_eq!(p.jobs.len(), 2);
        assert!(p.jobs.iter().all(|j| j.identity.channel == ChannelKind::Email));
        let offsets: HashSet<u32> = p.jobs.iter().map(|j| j.identity.offset_minutes).collect();
        assert_eq!(offsets, HashSet::from([60, 1440]));

        assert_eq!(p.skipped.len(), 2);
        assert!(p
            .skipped
            .iter()
            .all(|s| s.identity.channel == ChannelKind::Sms && s.reason == SkipReason::MissingContact));
    }

    #[test]
    fn withheld_plan_skips_every_job_but_keeps_other_reasons() {
        let ev = event(Duration::days(3), &[60, 1440], &[ChannelKind::Email, ChannelKind::Sms]);
        let p = plan(&ev, &[participant("p1", Some("a@example.com"), None)], Utc::now())
            .withhold(SkipReason::CancelledByOperator);

        assert!(p.jobs.is_empty());
        assert_eq!(p.skipped.len(), 4);
        let email = ReminderIdentity::new("ev1", "p1", 60, ChannelKind::Email);
        let sms = ReminderIdentity::new("ev1", "p1", 60, ChannelKind::Sms);
        assert_eq!(p.skip_reason(&email), Some(SkipReason::CancelledByOperator));
        assert_eq!(p.skip_reason(&sms), Some(SkipReason::MissingContact));
    }

    #[test]
    fn past_due_time_is_still_planned_while_event_is_ahead() {
        let ev = event(Duration::minutes(30), &[60], &[ChannelKind::Email]);
        let now = Utc::now();
        let p = plan(&ev, &[participant("p1", Some("a@example.com"), None)], now);
        assert_eq!(p.jobs.len(), 1);
        assert!(p.jobs[0].due_at < now);
        assert_eq!(p.jobs[0].due_at, ev.starts_at - Duration::minutes(60));
    }

    #[test]
    fn started_or_cancelled_events_only_skip() {
        let people = [participant("p1", Some("a@example.com"), None)];

        let started = event(-Duration::minutes(1), &[60], &[ChannelKind::Email]);
        let p = plan(&started, &people, Utc::now());
        assert!(p.jobs.is_empty());
        assert_eq!(p.skipped[0].reason, SkipReason::EventStarted);

        let mut cancelled = event(Duration::days(1), &[60], &[ChannelKind::Email]);
        cancelled.state = EventState::Cancelled;
        let p = plan(&cancelled, &people, Utc::now());
        assert!(p.jobs.is_empty());
        assert_eq!(p.skipped[0].reason, SkipReason::EventCancelled);

        let mut draft = event(Duration::days(1), &[60], &[ChannelKind::Email]);
        draft.state = EventState::Draft;
        let p = plan(&draft, &people, Utc::now());
        assert!(p.jobs.is_empty() && p.skipped.is_empty());
    }

    #[test]
    fn unsubscribed_and_foreign_participants_get_no_jobs() {
        let ev = event(Duration::days(1), &[60], &[ChannelKind::Email]);
        let mut gone = participant("p1", Some("a@example.com"), None);
        gone.unsubscribed = true;
        let mut other_event = participant("p2", Some("b@example.com"), None);
        other_event.event_id = "ev2".into();

        let p = plan(&ev, &[gone, other_event], Utc::now());
        assert!(p.jobs.is_empty());
        assert_eq!(p.skipped.len(), 1);
        assert_eq!(p.skipped[0].reason, SkipReason::Unsubscribed);
    }

    #[test]
    fn job_count_is_bounded_by_offsets_channels_participants() {
        let channels = [ChannelKind::Email, ChannelKind::Sms, ChannelKind::WhatsApp];
        let ev = event(Duration::days(5), &[10, 60, 1440, 60], &channels);
        let people: Vec<_> = (0..7)
            .map(|i| {
                let phone = (i % 2 == 0).then_some("+15551234567");
                participant(&format!("p{i}"), Some("x@example.com"), phone)
            })
            .collect();
        let p = plan(&ev, &people, Utc::now());

        let k = ev.reminder_offsets.len();
        assert_eq!(k, 3);
        assert!(p.jobs.len() <= k * channels.len() * people.len());
        let unique: HashSet<_> = p.jobs.iter().map(|j| j.identity.clone()).collect();
        assert_eq!(unique.len(), p.jobs.len());
        // 7 email + 4 phone owners × (sms + whatsapp), per offset
        assert_eq!(p.jobs.len(), k * (7 + 4 * 2));
    }

    #[test]
    fn reconcile_inserts_cancels_and_keeps() {
        let ev = event(Duration::days(2), &[60, 1440], &[ChannelKind::Email]);
        let people = [participant("p1", Some("a@example.com"), None)];
        let fresh = plan(&ev, &people, Utc::now());

        let keep = fresh.jobs[0].clone();
        let mut stale = fresh.jobs[1].clone();
        stale.due_at -= Duration::hours(3);
        let orphan = ReminderJob::new(
            ReminderIdentity::new("ev1", "p1", 5, ChannelKind::Email),
            Utc::now(),
        );

        let rec = reconcile(&fresh, &[keep, stale.clone(), orphan.clone()], &HashSet::new());
        assert_eq!(rec.unchanged, 1);
        assert_eq!(rec.rescheduled, 1);
        assert_eq!(rec.insert.len(), 1);
        assert_eq!(rec.insert[0].identity, stale.identity);
        assert_eq!(rec.cancel, vec![orphan.identity]);
    }

    #[test]
    fn reconcile_never_reinserts_closed_identities() {
        let ev = event(Duration::days(2), &[60], &[ChannelKind::Email]);
        let fresh = plan(&ev, &[participant("p1", Some("a@example.com"), None)], Utc::now());
        let closed: HashSet<_> = fresh.jobs.iter().map(|j| j.identity.clone()).collect();

        let rec = reconcile(&fresh, &[], &closed);
        assert!(rec.insert.is_empty());

        // a closed identity still sitting in the queue is cancelled
        let rec = reconcile(&fresh, &fresh.jobs, &closed);
        assert_eq!(rec.cancel.len(), 1);
    }
}
