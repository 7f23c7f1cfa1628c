use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use eventping_channels::{ChannelError, ChannelManager};
use eventping_core::{config::SchedulerConfig, ReminderIdentity, ReminderMessage, StoreError};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::{
    engine::SchedulerHandle,
    planner::event_skip_reason,
    recorder::DeliveryRecorder,
    retry::RetryPolicy,
    store::EventStore,
    types::{DeliveryStatus, ReminderJob, SkipReason},
};

/// Delay before re-offering a job whose identity is already being sent.
const BUSY_DELAY: Duration = Duration::from_secs(1);

/// What one dispatch of one job ended in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// The record is not pending (already sent, failed, skipped, unknown or
    /// claimed elsewhere); nothing was done.
    NotClaimed,
    /// Another worker holds this identity; re-queued shortly.
    Busy,
    Skipped(SkipReason),
    /// The event moved; re-queued at the new due time without sending.
    Rescheduled,
    /// Retryable failure; re-queued after `delay`.
    Retrying { attempts: u32, delay: Duration },
    /// Terminal failure or retry budget exhausted.
    Failed { attempts: u32 },
    /// The adapter was called but the outcome could not be recorded.
    Unknown,
    /// Store or recorder unavailable before sending; re-queued without
    /// consuming an attempt.
    Deferred,
}

enum Resolved {
    Deliver {
        recipient: String,
        message: ReminderMessage,
    },
    Skip(SkipReason),
    Moved(DateTime<Utc>),
}

/// Hands due jobs to channel adapters on a bounded worker pool.
///
/// Jobs for different identities run in parallel; jobs for the same
/// identity never do. Every send is preceded by an `in_flight` claim in the
/// recorder and followed by the outcome write.
pub struct Dispatcher {
    recorder: DeliveryRecorder,
    store: Arc<dyn EventStore>,
    channels: Arc<ChannelManager>,
    handle: Arc<SchedulerHandle>,
    policy: RetryPolicy,
    send_timeout: Duration,
    permits: Arc<Semaphore>,
    workers: usize,
    in_flight: DashSet<ReminderIdentity>,
}

impl Dispatcher {
    pub fn new(
        recorder: DeliveryRecorder,
        store: Arc<dyn EventStore>,
        channels: Arc<ChannelManager>,
        handle: Arc<SchedulerHandle>,
        cfg: &SchedulerConfig,
    ) -> Self {
        Self {
            recorder,
            store,
            channels,
            handle,
            policy: RetryPolicy::from_config(cfg),
            send_timeout: Duration::from_secs(cfg.send_timeout_secs.max(1)),
            permits: Arc::new(Semaphore::new(cfg.workers.max(1))),
            workers: cfg.workers.max(1),
            in_flight: DashSet::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Spawn one task per job. Tasks wait for a worker permit, so at most
    /// `workers` adapter calls run at once. Returns immediately.
    pub fn dispatch(self: &Arc<Self>, batch: Vec<ReminderJob>) {
        for job in batch {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let Ok(_permit) = Arc::clone(&this.permits).acquire_owned().await else {
                    return;
                };
                this.run_job(job).await;
            });
        }
    }

    /// Wait up to `grace` for every dispatched job to finish, then stop
    /// accepting work. Jobs still waiting afterwards are dropped; their
    /// records stay pending and are replanned on the next start.
    ///
    /// Returns `false` if the grace period ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        let all = u32::try_from(self.workers).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout(grace, self.permits.acquire_many(all)).await;
        self.permits.close();
        matches!(drained, Ok(Ok(_)))
    }

    /// Run one delivery attempt for `job` to completion.
    pub async fn run_job(&self, job: ReminderJob) -> DispatchOutcome {
        let identity = job.identity.clone();
        let Some(_slot) = InFlightSlot::claim(&self.in_flight, &identity) else {
            debug!(%identity, "identity already dispatching, deferring");
            self.requeue(job, BUSY_DELAY);
            return DispatchOutcome::Busy;
        };

        match self.recorder.get(&identity) {
            Ok(Some(record)) if record.status != DeliveryStatus::Pending => {
                debug!(%identity, status = %record.status, "record not pending, dropping job");
                return DispatchOutcome::NotClaimed;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%identity, error = %e, "delivery ledger unavailable, deferring");
                self.requeue(job, self.policy.base);
                return DispatchOutcome::Deferred;
            }
        }

        match self.recorder.is_held(&identity.event_id) {
            Ok(false) => {}
            Ok(true) => {
                let reason = SkipReason::CancelledByOperator;
                if let Err(e) = self.recorder.mark_skipped(&identity, Some(job.due_at), reason) {
                    warn!(%identity, error = %e, "could not record skip");
                }
                info!(%identity, "event held by operator, reminder skipped");
                return DispatchOutcome::Skipped(reason);
            }
            Err(e) => {
                warn!(%identity, error = %e, "delivery ledger unavailable, deferring");
                self.requeue(job, self.policy.base);
                return DispatchOutcome::Deferred;
            }
        }

        let now = Utc::now();
        let (recipient, message) = match self.resolve(&job, now).await {
            Ok(Resolved::Deliver { recipient, message }) => (recipient, message),
            Ok(Resolved::Skip(reason)) => {
                if let Err(e) = self.recorder.mark_skipped(&identity, Some(job.due_at), reason) {
                    warn!(%identity, error = %e, "could not record skip");
                }
                info!(%identity, %reason, "reminder skipped at dispatch");
                return DispatchOutcome::Skipped(reason);
            }
            Ok(Resolved::Moved(due_at)) => {
                if let Err(e) = self.recorder.mark_pending(&identity, due_at) {
                    warn!(%identity, error = %e, "could not record new due time");
                }
                debug!(%identity, %due_at, "event moved, re-queued at new due time");
                self.handle.insert(ReminderJob::new(identity, due_at));
                return DispatchOutcome::Rescheduled;
            }
            Err(e) => {
                warn!(%identity, error = %e, "event store unavailable, deferring");
                self.requeue(job, self.policy.base);
                return DispatchOutcome::Deferred;
            }
        };

        let attempts = match self.recorder.mark_in_flight(&identity, job.due_at) {
            Ok(Some(n)) => n,
            Ok(None) => {
                debug!(%identity, "claim lost, record no longer pending");
                return DispatchOutcome::NotClaimed;
            }
            Err(e) => {
                warn!(%identity, error = %e, "cannot claim delivery, not sending");
                self.requeue(job, self.policy.base);
                return DispatchOutcome::Deferred;
            }
        };

        let result = match self.channels.get(identity.channel) {
            None => Err(ChannelError::NotConfigured(identity.channel)),
            Some(channel) => {
                match tokio::time::timeout(self.send_timeout, channel.send(&recipient, &message))
                    .await
                {
                    Ok(r) => r,
                    Err(_) => Err(ChannelError::Timeout {
                        ms: self.send_timeout.as_millis() as u64,
                    }),
                }
            }
        };

        match result {
            Ok(()) => match self.recorder.mark_sent(&identity) {
                Ok(_) => {
                    info!(%identity, attempts, "reminder sent");
                    DispatchOutcome::Sent
                }
                Err(e) => {
                    error!(%identity, error = %e, "reminder sent but outcome not recorded");
                    self.flag_unknown(&identity, "sent, but recording the outcome failed");
                    DispatchOutcome::Unknown
                }
            },
            Err(e) if e.is_retryable() && !self.policy.is_exhausted(attempts) => {
                let delay = self.policy.delay(attempts, e.retry_after());
                if let Err(we) = self.recorder.mark_failed(&identity, false, &e.to_string()) {
                    error!(%identity, error = %we, "retryable failure not recorded");
                    self.flag_unknown(&identity, &e.to_string());
                    return DispatchOutcome::Unknown;
                }
                warn!(
                    %identity,
                    attempts,
                    max = self.policy.max_attempts,
                    error = %e,
                    retry_in_secs = delay.as_secs(),
                    "delivery failed, retrying with backoff"
                );
                self.requeue(job, delay);
                DispatchOutcome::Retrying { attempts, delay }
            }
            Err(e) => {
                let reason = if e.is_retryable() {
                    format!("gave up after {attempts} attempts: {e}")
                } else {
                    e.to_string()
                };
                if let Err(we) = self.recorder.mark_failed(&identity, true, &reason) {
                    error!(%identity, error = %we, "terminal failure not recorded");
                }
                error!(%identity, attempts, %reason, "reminder delivery failed");
                DispatchOutcome::Failed { attempts }
            }
        }
    }

    /// Re-read the event and participant and decide whether this job still
    /// stands.
    async fn resolve(&self, job: &ReminderJob, now: DateTime<Utc>) -> Result<Resolved, StoreError> {
        let id = &job.identity;
        let Some(event) = self.store.get_event(&id.event_id).await? else {
            return Ok(Resolved::Skip(SkipReason::EventDeleted));
        };
        if let Some(reason) = event_skip_reason(&event, now) {
            return Ok(Resolved::Skip(reason));
        }
        if !event.channels.contains(&id.channel)
            || !event.reminder_offsets.contains(&id.offset_minutes)
        {
            return Ok(Resolved::Skip(SkipReason::Superseded));
        }
        let due_at = event.due_at(id.offset_minutes);
        if due_at != job.due_at && due_at > now {
            return Ok(Resolved::Moved(due_at));
        }

        let Some(participant) = self
            .store
            .get_participant(&id.event_id, &id.participant_id)
            .await?
        else {
            return Ok(Resolved::Skip(SkipReason::ParticipantRemoved));
        };
        if participant.unsubscribed {
            return Ok(Resolved::Skip(SkipReason::Unsubscribed));
        }
        let Some(recipient) = participant.contacts.for_channel(id.channel) else {
            return Ok(Resolved::Skip(SkipReason::MissingContact));
        };
        Ok(Resolved::Deliver {
            recipient: recipient.to_string(),
            message: ReminderMessage::new(&event, &participant, id.offset_minutes),
        })
    }

    fn requeue(&self, mut job: ReminderJob, delay: Duration) {
        let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));
        job.not_before = Some(Utc::now() + delay);
        self.handle.insert(job);
    }

    fn flag_unknown(&self, identity: &ReminderIdentity, detail: &str) {
        if let Err(e) = self.recorder.mark_unknown(identity, detail) {
            error!(%identity, error = %e, "record left in flight; it becomes unknown on restart");
        }
    }
}

/// Marks an identity as being dispatched for as long as it lives.
struct InFlightSlot<'a> {
    set: &'a DashSet<ReminderIdentity>,
    identity: ReminderIdentity,
}

impl<'a> InFlightSlot<'a> {
    fn claim(set: &'a DashSet<ReminderIdentity>, identity: &ReminderIdentity) -> Option<Self> {
        set.insert(identity.clone()).then(|| Self {
            set,
            identity: identity.clone(),
        })
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use eventping_channels::{Channel, ChannelStatus};
    use eventping_core::{ChannelKind, Contacts, Event, EventState, Participant};
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::store::MemoryStore;

    struct SlowChannel {
        sends: AtomicU32,
    }

    #[async_trait]
    impl Channel for SlowChannel {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Email
        }
        async fn connect(&self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send(&self, _: &str, _: &ReminderMessage) -> Result<(), ChannelError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
        fn status(&self) -> ChannelStatus {
            ChannelStatus::Connected
        }
    }

    struct Fixture {
        event: Event,
        dispatcher: Dispatcher,
        recorder: DeliveryRecorder,
        handle: Arc<SchedulerHandle>,
        channel: Arc<SlowChannel>,
    }

    fn fixture(channels: &[ChannelKind]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let event = Event {
            id: "ev".into(),
            title: "Demo day".into(),
            description: None,
            starts_at: Utc::now() + ChronoDuration::days(1),
            reminder_offsets: [60].into(),
            channels: channels.iter().copied().collect(),
            state: EventState::Published,
        };
        store.upsert_event(event.clone());
        store.upsert_participant(Participant {
            id: "p".into(),
            event_id: "ev".into(),
            contacts: Contacts {
                email: Some("p@example.com".into()),
                phone: Some("+15551234567".into()),
                ..Default::default()
            },
            unsubscribed: false,
            custom_field_responses: Vec::new(),
        });

        let channel = Arc::new(SlowChannel {
            sends: AtomicU32::new(0),
        });
        let mut manager = ChannelManager::new();
        manager.register(channel.clone());

        let recorder = DeliveryRecorder::new(Connection::open_in_memory().unwrap()).unwrap();
        let handle = Arc::new(SchedulerHandle::new());
        let cfg = SchedulerConfig {
            send_timeout_secs: 1,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(
            recorder.clone(),
            store,
            Arc::new(manager),
            handle.clone(),
            &cfg,
        );
        Fixture {
            event,
            dispatcher,
            recorder,
            handle,
            channel,
        }
    }

    fn job(f: &Fixture, channel: ChannelKind) -> ReminderJob {
        ReminderJob::new(
            ReminderIdentity::new("ev", "p", 60, channel),
            f.event.due_at(60),
        )
    }

    #[tokio::test]
    async fn slow_adapter_times_out_and_is_retried() {
        let f = fixture(&[ChannelKind::Email]);
        let j = job(&f, ChannelKind::Email);
        f.recorder.mark_pending(&j.identity, j.due_at).unwrap();

        let outcome = f.dispatcher.run_job(j.clone()).await;
        assert!(matches!(outcome, DispatchOutcome::Retrying { attempts: 1, .. }));
        assert_eq!(f.channel.sends.load(Ordering::SeqCst), 1);

        let record = f.recorder.get(&j.identity).unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Pending);
        assert!(record.last_error.unwrap().contains("timed out"));

        let queued = f.handle.jobs_for_event("ev");
        assert_eq!(queued.len(), 1);
        assert!(queued[0].not_before.is_some());
        assert_eq!(queued[0].due_at, j.due_at);
    }

    #[tokio::test]
    async fn channel_without_adapter_fails_terminally() {
        let f = fixture(&[ChannelKind::Sms]);
        let j = job(&f, ChannelKind::Sms);
        f.recorder.mark_pending(&j.identity, j.due_at).unwrap();

        assert_eq!(
            f.dispatcher.run_job(j.clone()).await,
            DispatchOutcome::Failed { attempts: 1 }
        );
        let record = f.recorder.get(&j.identity).unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert!(f.handle.is_empty());
    }

    #[tokio::test]
    async fn busy_identity_is_deferred_not_sent() {
        let f = fixture(&[ChannelKind::Email]);
        let j = job(&f, ChannelKind::Email);
        f.dispatcher.in_flight.insert(j.identity.clone());

        assert_eq!(f.dispatcher.run_job(j).await, DispatchOutcome::Busy);
        assert_eq!(f.channel.sends.load(Ordering::SeqCst), 0);
        assert_eq!(f.handle.len(), 1);
    }

    #[tokio::test]
    async fn moved_event_requeues_at_new_due_time() {
        let f = fixture(&[ChannelKind::Email]);
        let mut j = job(&f, ChannelKind::Email);
        let fresh_due = j.due_at;
        j.due_at -= ChronoDuration::hours(5);
        f.recorder.mark_pending(&j.identity, j.due_at).unwrap();

        assert_eq!(f.dispatcher.run_job(j).await, DispatchOutcome::Rescheduled);
        assert_eq!(f.channel.sends.load(Ordering::SeqCst), 0);
        assert_eq!(f.handle.next_release(), Some(fresh_due));
    }

    #[tokio::test]
    async fn sent_record_is_never_resent() {
        let f = fixture(&[ChannelKind::Email]);
        let j = job(&f, ChannelKind::Email);
        f.recorder.mark_sent(&j.identity).unwrap();

        assert_eq!(f.dispatcher.run_job(j).await, DispatchOutcome::NotClaimed);
        assert_eq!(f.channel.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn held_event_is_skipped_at_dispatch() {
        let f = fixture(&[ChannelKind::Email]);
        let j = job(&f, ChannelKind::Email);
        f.recorder.mark_pending(&j.identity, j.due_at).unwrap();
        f.recorder.hold_event("ev").unwrap();

        assert_eq!(
            f.dispatcher.run_job(j.clone()).await,
            DispatchOutcome::Skipped(SkipReason::CancelledByOperator)
        );
        assert_eq!(f.channel.sends.load(Ordering::SeqCst), 0);
        let record = f.recorder.get(&j.identity).unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Skipped);
        assert_eq!(record.skip_reason, Some(SkipReason::CancelledByOperator));
    }

    #[tokio::test]
    async fn drain_waits_for_running_sends() {
        let f = fixture(&[ChannelKind::Email]);
        let j = job(&f, ChannelKind::Email);
        f.recorder.mark_pending(&j.identity, j.due_at).unwrap();
        let dispatcher = Arc::new(f.dispatcher);

        dispatcher.dispatch(vec![j.clone()]);
        while f.channel.sends.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(dispatcher.drain(Duration::from_secs(5)).await);

        // the send timed out inside the grace period and was recorded
        let record = f.recorder.get(&j.identity).unwrap().unwrap();
        assert_eq!(record.status, DeliveryStatus::Pending);
        assert_eq!(record.attempts, 1);
    }
}
