use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use eventping_core::ReminderIdentity;
use tokio::sync::{watch, Notify};
use tracing::{debug, info};

use crate::{dispatcher::Dispatcher, queue::PendingQueue, types::ReminderJob};

/// Shared handle to the pending queue.
///
/// The planner side inserts and cancels through it while the engine loop
/// drains it; every mutation wakes the loop so a new earliest job is
/// honoured without waiting for the current sleep to end.
#[derive(Default)]
pub struct SchedulerHandle {
    queue: Mutex<PendingQueue>,
    wake: Notify,
}

impl SchedulerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, PendingQueue> {
        self.queue.lock().expect("pending queue mutex poisoned")
    }

    pub fn insert(&self, job: ReminderJob) {
        self.queue().insert(job);
        self.wake.notify_one();
    }

    pub fn cancel(&self, identity: &ReminderIdentity) -> Option<ReminderJob> {
        let job = self.queue().cancel(identity);
        self.wake.notify_one();
        job
    }

    pub fn cancel_event(&self, event_id: &str) -> Vec<ReminderJob> {
        let jobs = self.queue().cancel_event(event_id);
        self.wake.notify_one();
        jobs
    }

    pub fn cancel_participant(&self, event_id: &str, participant_id: &str) -> Vec<ReminderJob> {
        let jobs = self.queue().cancel_participant(event_id, participant_id);
        self.wake.notify_one();
        jobs
    }

    pub fn jobs_for_event(&self, event_id: &str) -> Vec<ReminderJob> {
        self.queue().jobs_for_event(event_id)
    }

    /// Remove every job released at or before `now`.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<ReminderJob> {
        self.queue().take_due(now)
    }

    pub fn next_release(&self) -> Option<DateTime<Utc>> {
        self.queue().next_release()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }
}

/// Timer-driven core: sleeps until the nearest release time (or a queue
/// change) and hands every due job to the dispatcher.
pub struct SchedulerEngine {
    handle: Arc<SchedulerHandle>,
    dispatcher: Arc<Dispatcher>,
    /// Upper bound on one sleep, so wall-clock jumps are noticed.
    max_idle: Duration,
}

impl SchedulerEngine {
    pub fn new(handle: Arc<SchedulerHandle>, dispatcher: Arc<Dispatcher>, max_idle: Duration) -> Self {
        Self {
            handle,
            dispatcher,
            max_idle: max_idle.max(Duration::from_secs(1)),
        }
    }

    /// Main event loop. Runs until `shutdown` broadcasts `true`.
    ///
    /// Dispatch is spawned, never awaited here, so a slow adapter cannot
    /// delay the release of other jobs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(queued = self.handle.len(), "scheduler engine started");
        loop {
            let now = Utc::now();
            let due = self.handle.take_due(now);
            if !due.is_empty() {
                debug!(count = due.len(), "releasing due reminders");
                self.dispatcher.dispatch(due);
            }

            let sleep_for = self
                .handle
                .next_release()
                .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(self.max_idle)
                .min(self.max_idle);

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.handle.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use eventping_core::ChannelKind;

    #[test]
    fn handle_round_trip() {
        let handle = SchedulerHandle::new();
        let now = Utc::now();
        handle.insert(ReminderJob::new(
            ReminderIdentity::new("e", "p", 60, ChannelKind::Sms),
            now + ChronoDuration::minutes(1),
        ));
        assert_eq!(handle.len(), 1);
        assert!(handle.take_due(now).is_empty());
        assert_eq!(handle.next_release(), Some(now + ChronoDuration::minutes(1)));
        assert_eq!(handle.cancel_event("e").len(), 1);
        assert!(handle.is_empty());
    }
}
