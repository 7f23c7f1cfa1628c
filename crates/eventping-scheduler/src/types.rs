use chrono::{DateTime, Utc};
use eventping_core::ReminderIdentity;
use serde::{Deserialize, Serialize};

/// Persisted outcome of one reminder identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Planned; waiting for its due time or for a retry.
    Pending,
    /// Written just before the adapter is invoked.
    InFlight,
    /// Delivered. Never changes again.
    Sent,
    /// Terminal failure, or the retry budget ran out.
    Failed,
    /// Not sent on purpose; may be reopened by a later plan.
    Skipped,
    /// The adapter may or may not have delivered. Needs an operator.
    Unknown,
}

impl DeliveryStatus {
    /// Closed records are never planned or dispatched again.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Sent | DeliveryStatus::Failed | DeliveryStatus::Unknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::InFlight => "in_flight",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
            DeliveryStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "in_flight" => Ok(DeliveryStatus::InFlight),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            "skipped" => Ok(DeliveryStatus::Skipped),
            "unknown" => Ok(DeliveryStatus::Unknown),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// Why a reminder was deliberately not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unsubscribed,
    /// The participant has no contact identity for the channel.
    MissingContact,
    EventCancelled,
    EventCompleted,
    EventStarted,
    EventDeleted,
    /// The event went back to draft.
    EventNotPublished,
    ParticipantRemoved,
    /// The offset or channel was removed from the event.
    Superseded,
    CancelledByOperator,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Unsubscribed => "unsubscribed",
            SkipReason::MissingContact => "missing_contact",
            SkipReason::EventCancelled => "event_cancelled",
            SkipReason::EventCompleted => "event_completed",
            SkipReason::EventStarted => "event_started",
            SkipReason::EventDeleted => "event_deleted",
            SkipReason::EventNotPublished => "event_not_published",
            SkipReason::ParticipantRemoved => "participant_removed",
            SkipReason::Superseded => "superseded",
            SkipReason::CancelledByOperator => "cancelled_by_operator",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SkipReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "unsubscribed" => Ok(SkipReason::Unsubscribed),
            "missing_contact" => Ok(SkipReason::MissingContact),
            "event_cancelled" => Ok(SkipReason::EventCancelled),
            "event_completed" => Ok(SkipReason::EventCompleted),
            "event_started" => Ok(SkipReason::EventStarted),
            "event_deleted" => Ok(SkipReason::EventDeleted),
            "event_not_published" => Ok(SkipReason::EventNotPublished),
            "participant_removed" => Ok(SkipReason::ParticipantRemoved),
            "superseded" => Ok(SkipReason::Superseded),
            "cancelled_by_operator" => Ok(SkipReason::CancelledByOperator),
            other => Err(format!("unknown skip reason: {other}")),
        }
    }
}

/// A reminder waiting in the pending queue.
///
/// `due_at` is always derived from the event start and the offset; retries
/// never move it; they set `not_before` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderJob {
    pub identity: ReminderIdentity,
    pub due_at: DateTime<Utc>,
    /// Earliest release after a retryable failure.
    pub not_before: Option<DateTime<Utc>>,
}

impl ReminderJob {
    pub fn new(identity: ReminderIdentity, due_at: DateTime<Utc>) -> Self {
        Self {
            identity,
            due_at,
            not_before: None,
        }
    }

    /// Instant at which the queue hands this job to the dispatcher.
    pub fn release_at(&self) -> DateTime<Utc> {
        match self.not_before {
            Some(nb) if nb > self.due_at => nb,
            _ => self.due_at,
        }
    }
}

/// One row of the delivery ledger, as shown to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    #[serde(flatten)]
    pub identity: ReminderIdentity,
    pub status: DeliveryStatus,
    pub due_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub skip_reason: Option<SkipReason>,
    pub sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Operator decision for a delivery whose outcome is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The provider confirms delivery: close the record as sent.
    MarkSent,
    /// The message never arrived: reopen and deliver again.
    Retry,
}
