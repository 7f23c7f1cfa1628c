use eventping_core::StoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error. Surfacing this after an adapter
    /// call means the delivery outcome is unknown.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The Event/Participant store could not answer.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The store has no event with this ID.
    #[error("Event not found: {id}")]
    EventNotFound { id: String },

    /// A resolution was requested for a record that is not `unknown`.
    #[error("Delivery {identity} is not in the unknown state")]
    NotUnknown { identity: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
