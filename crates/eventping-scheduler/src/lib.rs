//! `eventping-scheduler`: reminder planning, timing and delivery.
//!
//! # Overview
//!
//! The [`planner`] turns an event and its participants into the set of
//! reminder jobs that should exist. The [`service::ReminderService`] diffs
//! that set against the pending queue held by the [`engine`], which sleeps
//! until the nearest due time and hands due jobs to the
//! [`dispatcher::Dispatcher`]. Every outcome lands in the SQLite-backed
//! [`recorder::DeliveryRecorder`], keyed by [`ReminderIdentity`] so that no
//! identity is ever sent twice.
//!
//! # Delivery record lifecycle
//!
//! | Status      | Meaning                                              | Closed |
//! |-------------|------------------------------------------------------|--------|
//! | `pending`   | Planned, waiting for its due time or a retry         | no     |
//! | `in_flight` | An adapter call is in progress                       | no     |
//! | `sent`      | Delivered; immutable from here on                    | yes    |
//! | `failed`    | Terminal failure or retry budget exhausted           | yes    |
//! | `skipped`   | Not sent (unsubscribed, no contact, event cancelled) | no     |
//! | `unknown`   | Crash or write failure after an adapter call         | yes    |
//!
//! [`ReminderIdentity`]: eventping_core::ReminderIdentity

pub mod db;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod planner;
pub mod queue;
pub mod recorder;
pub mod retry;
pub mod service;
pub mod store;
pub mod types;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use planner::{plan, reconcile, Plan, Reconciliation, SkippedJob};
pub use queue::PendingQueue;
pub use recorder::DeliveryRecorder;
pub use retry::RetryPolicy;
pub use service::{RecoveryReport, ReminderService, ReplanSummary};
pub use store::{EventStore, MemoryStore};
pub use types::{DeliveryRecord, DeliveryStatus, ReminderJob, Resolution, SkipReason};
