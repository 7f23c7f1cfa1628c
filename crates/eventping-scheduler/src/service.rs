use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eventping_channels::ChannelManager;
use eventping_core::{
    config::SchedulerConfig, Event, EventState, Participant, ReminderIdentity,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::{
    dispatcher::Dispatcher,
    engine::{SchedulerEngine, SchedulerHandle},
    error::{Result, SchedulerError},
    planner::{event_skip_reason, plan, reconcile},
    recorder::DeliveryRecorder,
    store::EventStore,
    types::{DeliveryRecord, DeliveryStatus, Resolution, SkipReason},
};

/// Effect of one replan on the queue and the ledger.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplanSummary {
    /// Jobs newly queued, including rescheduled ones.
    pub scheduled: usize,
    pub rescheduled: usize,
    pub unchanged: usize,
    /// Jobs removed from the queue.
    pub cancelled: usize,
    /// Ledger rows newly marked skipped.
    pub skipped: usize,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// In-flight records found at startup and moved to `unknown`.
    pub quarantined: usize,
    pub events: usize,
    pub failed_events: usize,
    pub scheduled: usize,
}

/// Entry point for everything outside the engine: store notifications,
/// operator actions and startup recovery.
pub struct ReminderService {
    store: Arc<dyn EventStore>,
    recorder: DeliveryRecorder,
    handle: Arc<SchedulerHandle>,
    dispatcher: Arc<Dispatcher>,
    max_idle: Duration,
    /// Serialises replans so two notifications for one event cannot
    /// interleave their diff and apply steps.
    replan_lock: Mutex<()>,
}

impl ReminderService {
    pub fn new(
        recorder: DeliveryRecorder,
        store: Arc<dyn EventStore>,
        channels: Arc<ChannelManager>,
        cfg: &SchedulerConfig,
    ) -> Self {
        let handle = Arc::new(SchedulerHandle::new());
        let dispatcher = Arc::new(Dispatcher::new(
            recorder.clone(),
            Arc::clone(&store),
            channels,
            Arc::clone(&handle),
            cfg,
        ));
        Self {
            store,
            recorder,
            handle,
            dispatcher,
            max_idle: Duration::from_secs(cfg.max_idle_secs),
            replan_lock: Mutex::new(()),
        }
    }

    /// Build the timer loop that drains this service's queue.
    pub fn engine(&self) -> SchedulerEngine {
        SchedulerEngine::new(
            Arc::clone(&self.handle),
            Arc::clone(&self.dispatcher),
            self.max_idle,
        )
    }

    pub fn handle(&self) -> &Arc<SchedulerHandle> {
        &self.handle
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn recorder(&self) -> &DeliveryRecorder {
        &self.recorder
    }

    pub fn queue_depth(&self) -> usize {
        self.handle.len()
    }

    pub async fn on_event_published(&self, event: &Event) -> Result<ReplanSummary> {
        self.replan(event).await
    }

    /// Offsets, channels, start time or state changed.
    pub async fn on_event_updated(&self, event: &Event) -> Result<ReplanSummary> {
        self.replan(event).await
    }

    pub async fn on_event_cancelled(&self, event: &Event) -> Result<ReplanSummary> {
        let mut cancelled = event.clone();
        cancelled.state = EventState::Cancelled;
        self.replan(&cancelled).await
    }

    /// The event is gone from the store: drop its jobs, skip its open rows.
    /// An operator hold goes with it.
    pub async fn on_event_deleted(&self, event_id: &str) -> Result<usize> {
        let _guard = self.replan_lock.lock().await;
        self.recorder.release_event(event_id)?;
        self.cancel_all(event_id, SkipReason::EventDeleted)
    }

    /// A participant registered or changed their contacts.
    pub async fn on_participant_joined(&self, participant: &Participant) -> Result<ReplanSummary> {
        let event = self
            .store
            .get_event(&participant.event_id)
            .await?
            .ok_or_else(|| SchedulerError::EventNotFound {
                id: participant.event_id.clone(),
            })?;
        let _guard = self.replan_lock.lock().await;
        let mut participants = self.store.list_participants(&event.id).await?;
        match participants.iter_mut().find(|p| p.id == participant.id) {
            Some(existing) => *existing = participant.clone(),
            None => participants.push(participant.clone()),
        }
        self.apply(&event, &participants)
    }

    /// Cancel every queued job of the participant and skip their open rows.
    /// History (sent, failed) is kept.
    pub async fn on_participant_unsubscribed(&self, participant: &Participant) -> Result<usize> {
        let _guard = self.replan_lock.lock().await;
        let cancelled = self
            .handle
            .cancel_participant(&participant.event_id, &participant.id);
        let skipped = self.recorder.skip_pending_for_participant(
            &participant.event_id,
            &participant.id,
            SkipReason::Unsubscribed,
        )?;
        info!(
            event_id = %participant.event_id,
            participant_id = %participant.id,
            cancelled = cancelled.len(),
            skipped,
            "participant unsubscribed"
        );
        Ok(skipped)
    }

    pub fn get_delivery_status(&self, event_id: &str) -> Result<Vec<DeliveryRecord>> {
        self.recorder.list_for_event(event_id)
    }

    /// Operator cancel. The event is held in the ledger, so later updates,
    /// joins and restarts plan nothing for it until
    /// [`resume_reminders_for`](Self::resume_reminders_for).
    pub async fn cancel_reminders_for(&self, event_id: &str) -> Result<usize> {
        let _guard = self.replan_lock.lock().await;
        self.recorder.hold_event(event_id)?;
        self.cancel_all(event_id, SkipReason::CancelledByOperator)
    }

    /// Lift an operator cancel and replan the event from the store.
    pub async fn resume_reminders_for(&self, event_id: &str) -> Result<ReplanSummary> {
        if self.recorder.release_event(event_id)? {
            info!(%event_id, "operator hold released");
        }
        self.replan_event(event_id).await
    }

    /// Replan one event from the store.
    pub async fn replan_event(&self, event_id: &str) -> Result<ReplanSummary> {
        match self.store.get_event(event_id).await? {
            Some(event) => self.replan(&event).await,
            None => {
                let skipped = self.on_event_deleted(event_id).await?;
                Ok(ReplanSummary {
                    skipped,
                    ..Default::default()
                })
            }
        }
    }

    /// Rebuild the queue after a start.
    ///
    /// In-flight rows left by the previous process become `unknown` first,
    /// so nothing they cover is sent again. Then every published event, and
    /// every event that still has pending rows, is replanned from the store.
    /// Only failing to reach the ledger or list the store is fatal.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport {
            quarantined: self.recorder.quarantine_in_flight()?,
            ..Default::default()
        };

        let mut event_ids: BTreeSet<String> = self
            .store
            .list_published_events()
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        event_ids.extend(self.recorder.open_event_ids()?);

        for event_id in &event_ids {
            report.events += 1;
            match self.replan_event(event_id).await {
                Ok(summary) => report.scheduled += summary.scheduled,
                Err(e) => {
                    report.failed_events += 1;
                    warn!(%event_id, error = %e, "could not replan event during recovery");
                }
            }
        }
        info!(
            quarantined = report.quarantined,
            events = report.events,
            failed = report.failed_events,
            scheduled = report.scheduled,
            "reminder queue recovered"
        );
        Ok(report)
    }

    /// Apply an operator decision to an `unknown` delivery.
    pub async fn resolve_unknown(
        &self,
        identity: &ReminderIdentity,
        resolution: Resolution,
    ) -> Result<()> {
        if !self.recorder.resolve_unknown(identity, resolution)? {
            return Err(SchedulerError::NotUnknown {
                identity: identity.to_string(),
            });
        }
        if resolution == Resolution::Retry {
            self.replan_event(&identity.event_id).await?;
        }
        Ok(())
    }

    /// Delete closed history older than `retention`.
    pub fn purge_history(&self, retention: chrono::Duration) -> Result<usize> {
        let n = self.recorder.purge_before(Utc::now() - retention)?;
        if n > 0 {
            info!(purged = n, "old delivery records purged");
        }
        Ok(n)
    }

    async fn replan(&self, event: &Event) -> Result<ReplanSummary> {
        let _guard = self.replan_lock.lock().await;
        let participants = self.store.list_participants(&event.id).await?;
        self.apply(event, &participants)
    }

    #[instrument(skip_all, fields(event_id = %event.id, state = %event.state))]
    fn apply(&self, event: &Event, participants: &[Participant]) -> Result<ReplanSummary> {
        let now = Utc::now();
        let held = self.recorder.is_held(&event.id)?;
        let mut plan = plan(event, participants, now);
        if held {
            plan = plan.withhold(SkipReason::CancelledByOperator);
        }
        let queued = self.handle.jobs_for_event(&event.id);
        let closed = self.recorder.closed_identities(&event.id)?;
        let rec = reconcile(&plan, &queued, &closed);

        let mut summary = ReplanSummary {
            rescheduled: rec.rescheduled,
            unchanged: rec.unchanged,
            ..Default::default()
        };

        // Out of the queue first, so nothing being retired can be released
        // while the ledger catches up.
        for identity in &rec.cancel {
            if self.handle.cancel(identity).is_some() {
                summary.cancelled += 1;
            }
        }

        let fallback = match event_skip_reason(event, now) {
            Some(reason) => reason,
            None if held => SkipReason::CancelledByOperator,
            None => SkipReason::Superseded,
        };
        let wanted: HashSet<&ReminderIdentity> = plan.jobs.iter().map(|j| &j.identity).collect();
        for record in self.recorder.list_for_event(&event.id)? {
            if record.status != DeliveryStatus::Pending || wanted.contains(&record.identity) {
                continue;
            }
            let reason = plan.skip_reason(&record.identity).unwrap_or(fallback);
            if self.recorder.mark_skipped(&record.identity, None, reason)? {
                summary.skipped += 1;
            }
        }
        for skipped in &plan.skipped {
            if self
                .recorder
                .mark_skipped(&skipped.identity, Some(skipped.due_at), skipped.reason)?
            {
                summary.skipped += 1;
            }
        }

        for job in rec.insert {
            if self.recorder.mark_pending(&job.identity, job.due_at)? {
                self.handle.insert(job);
                summary.scheduled += 1;
            }
        }

        info!(
            held,
            scheduled = summary.scheduled,
            rescheduled = summary.rescheduled,
            unchanged = summary.unchanged,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            "event replanned"
        );
        Ok(summary)
    }

    /// Callers hold `replan_lock`, so no replan can requeue what this skips.
    fn cancel_all(&self, event_id: &str, reason: SkipReason) -> Result<usize> {
        let cancelled = self.handle.cancel_event(event_id);
        let skipped = self.recorder.skip_pending_for_event(event_id, reason)?;
        info!(%event_id, %reason, cancelled = cancelled.len(), skipped, "reminders cancelled");
        Ok(skipped)
    }
}
