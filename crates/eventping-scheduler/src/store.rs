//! The Event/Participant store the engine reads from.
//!
//! The store is owned by the EventPing application; the engine never writes
//! to it. The daemon implements [`EventStore`] over its SQLite snapshot and
//! tests use [`MemoryStore`].

use async_trait::async_trait;
use dashmap::DashMap;
use eventping_core::{Event, EventState, Participant, StoreError};

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError>;

    /// Participants of an event, including unsubscribed ones.
    async fn list_participants(&self, event_id: &str) -> Result<Vec<Participant>, StoreError>;

    async fn get_participant(
        &self,
        event_id: &str,
        participant_id: &str,
    ) -> Result<Option<Participant>, StoreError>;

    /// Every event in the `Published` state. Used to rebuild the queue on
    /// startup.
    async fn list_published_events(&self) -> Result<Vec<Event>, StoreError>;
}

/// In-process store backed by concurrent maps.
#[derive(Default)]
pub struct MemoryStore {
    events: DashMap<String, Event>,
    participants: DashMap<(String, String), Participant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_event(&self, event: Event) {
        self.events.insert(event.id.clone(), event);
    }

    /// Remove an event and its participants.
    pub fn remove_event(&self, event_id: &str) -> Option<Event> {
        self.participants.retain(|(ev, _), _| ev != event_id);
        self.events.remove(event_id).map(|(_, e)| e)
    }

    pub fn upsert_participant(&self, participant: Participant) {
        self.participants.insert(
            (participant.event_id.clone(), participant.id.clone()),
            participant,
        );
    }

    pub fn remove_participant(&self, event_id: &str, participant_id: &str) -> Option<Participant> {
        self.participants
            .remove(&(event_id.to_string(), participant_id.to_string()))
            .map(|(_, p)| p)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        Ok(self.events.get(event_id).map(|e| e.value().clone()))
    }

    async fn list_participants(&self, event_id: &str) -> Result<Vec<Participant>, StoreError> {
        let mut out: Vec<Participant> = self
            .participants
            .iter()
            .filter(|entry| entry.key().0 == event_id)
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn get_participant(
        &self,
        event_id: &str,
        participant_id: &str,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .participants
            .get(&(event_id.to_string(), participant_id.to_string()))
            .map(|p| p.value().clone()))
    }

    async fn list_published_events(&self) -> Result<Vec<Event>, StoreError> {
        let mut out: Vec<Event> = self
            .events
            .iter()
            .filter(|e| e.state == EventState::Published)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}
