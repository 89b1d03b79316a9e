//! In-process store used in dev mode and tests.
//!
//! Each event lives behind its own mutex so registrations against different
//! events never contend. The map lock is only held long enough to clone the
//! event's `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use campus_id::{EventId, UserId};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use super::store::{AppendOutcome, EventFilter, EventStore, UserStore};
use super::StoreError;
use crate::model::{EventRecord, Registration, SessionRecord, UserRecord};

#[derive(Default)]
struct Identities {
    users: HashMap<UserId, UserRecord>,
    by_email: HashMap<String, UserId>,
    sessions: HashMap<String, SessionRecord>,
}

/// Store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<EventId, Arc<Mutex<EventRecord>>>>,
    identities: RwLock<Identities>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, event_id: &EventId) -> Option<Arc<Mutex<EventRecord>>> {
        self.events.read().await.get(event_id).cloned()
    }

    async fn snapshot(&self) -> Vec<EventRecord> {
        let slots: Vec<_> = self.events.read().await.values().cloned().collect();
        let mut records = Vec::with_capacity(slots.len());
        for slot in slots {
            records.push(slot.lock().await.clone());
        }
        records
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.event_id) {
            return Err(StoreError::Duplicate {
                entity: "event",
                key: event.event_id.to_string(),
            });
        }
        events.insert(event.event_id, Arc::new(Mutex::new(event.clone())));
        Ok(())
    }

    async fn fetch_event(&self, event_id: &EventId) -> Result<Option<EventRecord>, StoreError> {
        match self.slot(event_id).await {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, StoreError> {
        let mut matching: Vec<EventRecord> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        matching.sort_by(|a, b| {
            a.starts_at
                .cmp(&b.starts_at)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        matching.truncate(filter.effective_limit());
        Ok(matching)
    }

    async fn delete_event(&self, event_id: &EventId) -> Result<Option<EventRecord>, StoreError> {
        let removed = self.events.write().await.remove(event_id);
        match removed {
            // Waits out any append in flight on this event.
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn append_registration(
        &self,
        event_id: &EventId,
        registration: &Registration,
    ) -> Result<AppendOutcome, StoreError> {
        let Some(slot) = self.slot(event_id).await else {
            return Ok(AppendOutcome::Missing);
        };

        let mut event = slot.lock().await;
        if !event.admits(&registration.student_id) {
            return Ok(AppendOutcome::Rejected);
        }

        // The slot may have been unlinked by a delete between `slot()` and `lock()`.
        if !self.events.read().await.contains_key(event_id) {
            return Ok(AppendOutcome::Missing);
        }

        event.registrations.push(registration.clone());
        event.version += 1;
        Ok(AppendOutcome::Appended(event.clone()))
    }

    async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let mut due: Vec<EventRecord> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|e| !e.reminder_sent && e.starts_at > now && e.starts_at <= until)
            .collect();
        due.sort_by_key(|e| e.starts_at);
        Ok(due)
    }

    async fn claim_reminder(
        &self,
        event_id: &EventId,
    ) -> Result<Option<EventRecord>, StoreError> {
        let Some(slot) = self.slot(event_id).await else {
            return Ok(None);
        };
        let mut event = slot.lock().await;
        if event.reminder_sent {
            return Ok(None);
        }
        event.reminder_sent = true;
        Ok(Some(event.clone()))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let mut ids = self.identities.write().await;
        if ids.by_email.contains_key(&user.email) {
            return Err(StoreError::Duplicate {
                entity: "user",
                key: user.email.clone(),
            });
        }
        ids.by_email.insert(user.email.clone(), user.user_id);
        ids.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn find_user(&self, user_id: &UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.identities.read().await.users.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let ids = self.identities.read().await;
        Ok(ids
            .by_email
            .get(email)
            .and_then(|id| ids.users.get(id))
            .cloned())
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        let mut ids = self.identities.write().await;
        if ids.sessions.contains_key(&session.token_hash) {
            return Err(StoreError::Duplicate {
                entity: "session",
                key: "<token>".to_string(),
            });
        }
        ids.sessions
            .insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.identities.read().await.sessions.get(token_hash).cloned())
    }

    async fn delete_session(&self, token_hash: &str) -> Result<bool, StoreError> {
        Ok(self
            .identities
            .write()
            .await
            .sessions
            .remove(token_hash)
            .is_some())
    }
}
