use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use eventping_core::{ChannelKind, ReminderIdentity};

use crate::types::ReminderJob;

/// Pending reminder jobs ordered by release time.
///
/// At most one job per identity: inserting an identity that is already
/// queued replaces it. Jobs are indexed twice, by identity (ordered, so all
/// jobs of an event are a contiguous range) and by `(release_at, identity)`.
#[derive(Debug, Default)]
pub struct PendingQueue {
    jobs: BTreeMap<ReminderIdentity, ReminderJob>,
    by_release: BTreeSet<(DateTime<Utc>, ReminderIdentity)>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Queue `job`, returning the job it replaced, if any.
    pub fn insert(&mut self, job: ReminderJob) -> Option<ReminderJob> {
        let replaced = self.cancel(&job.identity);
        self.by_release
            .insert((job.release_at(), job.identity.clone()));
        self.jobs.insert(job.identity.clone(), job);
        replaced
    }

    pub fn cancel(&mut self, identity: &ReminderIdentity) -> Option<ReminderJob> {
        let job = self.jobs.remove(identity)?;
        self.by_release.remove(&(job.release_at(), job.identity.clone()));
        Some(job)
    }

    pub fn get(&self, identity: &ReminderIdentity) -> Option<&ReminderJob> {
        self.jobs.get(identity)
    }

    /// Jobs currently queued for one event.
    pub fn jobs_for_event(&self, event_id: &str) -> Vec<ReminderJob> {
        self.event_range(event_id).cloned().collect()
    }

    /// Remove and return every job of an event.
    pub fn cancel_event(&mut self, event_id: &str) -> Vec<ReminderJob> {
        let ids: Vec<ReminderIdentity> =
            self.event_range(event_id).map(|j| j.identity.clone()).collect();
        ids.iter().filter_map(|id| self.cancel(id)).collect()
    }

    /// Remove and return every job of one participant of an event.
    pub fn cancel_participant(&mut self, event_id: &str, participant_id: &str) -> Vec<ReminderJob> {
        let ids: Vec<ReminderIdentity> = self
            .event_range(event_id)
            .filter(|j| j.identity.participant_id == participant_id)
            .map(|j| j.identity.clone())
            .collect();
        ids.iter().filter_map(|id| self.cancel(id)).collect()
    }

    /// Remove and return all jobs whose release time is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<ReminderJob> {
        let mut due = Vec::new();
        while let Some((release_at, _)) = self.by_release.first() {
            if *release_at > now {
                break;
            }
            let Some((_, identity)) = self.by_release.pop_first() else {
                break;
            };
            if let Some(job) = self.jobs.remove(&identity) {
                due.push(job);
            }
        }
        due
    }

    /// Release time of the earliest queued job.
    pub fn next_release(&self) -> Option<DateTime<Utc>> {
        self.by_release.first().map(|(at, _)| *at)
    }

    fn event_range<'a>(&'a self, event_id: &'a str) -> impl Iterator<Item = &'a ReminderJob> + 'a {
        // Identities order by event id first; the smallest possible identity
        // of this event starts the range.
        let start = ReminderIdentity::new(event_id, "", 0, ChannelKind::Email);
        self.jobs
            .range(start..)
            .take_while(move |(id, _)| id.event_id == event_id)
            .map(|(_, job)| job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(event: &str, participant: &str, offset: u32, due: DateTime<Utc>) -> ReminderJob {
        ReminderJob::new(
            ReminderIdentity::new(event, participant, offset, ChannelKind::Email),
            due,
        )
    }

    #[test]
    fn releases_in_due_order_and_only_when_due() {
        let now = Utc::now();
        let mut q = PendingQueue::new();
        q.insert(job("e", "late", 10, now + Duration::minutes(5)));
        q.insert(job("e", "second", 20, now - Duration::minutes(1)));
        q.insert(job("e", "first", 30, now - Duration::minutes(2)));

        assert_eq!(q.next_release(), Some(now - Duration::minutes(2)));
        let due = q.take_due(now);
        let order: Vec<_> = due.iter().map(|j| j.identity.participant_id.as_str()).collect();
        assert_eq!(order, vec!["first", "second"]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_release(), Some(now + Duration::minutes(5)));
    }

    #[test]
    fn insert_replaces_same_identity() {
        let now = Utc::now();
        let mut q = PendingQueue::new();
        q.insert(job("e", "p", 60, now));
        let replaced = q.insert(job("e", "p", 60, now + Duration::hours(1)));
        assert_eq!(replaced.map(|j| j.due_at), Some(now));
        assert_eq!(q.len(), 1);
        assert!(q.take_due(now).is_empty());
    }

    #[test]
    fn backoff_delays_release() {
        let now = Utc::now();
        let mut q = PendingQueue::new();
        let mut retry = job("e", "p", 60, now - Duration::minutes(10));
        retry.not_before = Some(now + Duration::seconds(30));
        q.insert(retry);
        assert!(q.take_due(now).is_empty());
        assert_eq!(q.take_due(now + Duration::seconds(30)).len(), 1);
    }

    #[test]
    fn cancel_by_event_and_participant_leaves_neighbours() {
        let now = Utc::now();
        let mut q = PendingQueue::new();
        q.insert(job("a", "p1", 60, now));
        q.insert(job("ab", "p1", 60, now));
        q.insert(job("b", "p1", 60, now));
        q.insert(job("b", "p1", 1440, now));
        q.insert(job("b", "p2", 60, now));

        assert_eq!(q.jobs_for_event("b").len(), 3);
        assert_eq!(q.cancel_participant("b", "p1").len(), 2);
        assert_eq!(q.cancel_event("a").len(), 1);
        assert_eq!(q.len(), 2);
        assert!(q.get(&ReminderIdentity::new("ab", "p1", 60, ChannelKind::Email)).is_some());
        assert_eq!(q.take_due(now).len(), 2);
        assert!(q.is_empty());
    }
}
