//! Store collaborator traits.
//!
//! The registration manager only talks to persistence through these traits.
//! The one write that must be race-free, [`EventStore::append_registration`],
//! is a conditional write evaluated by the store itself.

use async_trait::async_trait;
use campus_id::{EventId, UserId};
use chrono::{DateTime, Utc};

use super::StoreError;
use crate::model::{EventRecord, Registration, SessionRecord, UserRecord};

/// Default page size for event listings.
pub const DEFAULT_LIST_LIMIT: u32 = 100;

/// Upper bound on a single event listing.
pub const MAX_LIST_LIMIT: u32 = 500;

/// Result of a conditional registration append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The precondition held and the registration was committed.
    /// Carries the event as it stands after the append.
    Appended(EventRecord),

    /// The event exists but was full or already held this student at commit time.
    Rejected,

    /// No event with this ID exists.
    Missing,
}

/// Selection criteria for event listings. All criteria are conjunctive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Exact match on the (lower-cased) category.
    pub category: Option<String>,

    /// Only events owned by this coordinator.
    pub owner_id: Option<UserId>,

    /// Only events this student holds a registration for.
    pub registered: Option<UserId>,

    /// Only events that have not finished at this instant.
    pub active_at: Option<DateTime<Utc>>,

    pub limit: u32,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            category: None,
            owner_id: None,
            registered: None,
            active_at: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl EventFilter {
    pub fn matches(&self, event: &EventRecord) -> bool {
        if let Some(category) = &self.category {
            if event.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(owner_id) = &self.owner_id {
            if &event.owner_id != owner_id {
                return false;
            }
        }
        if let Some(student_id) = &self.registered {
            if !event.is_registered(student_id) {
                return false;
            }
        }
        if let Some(now) = self.active_at {
            if event.effective_end() <= now {
                return false;
            }
        }
        true
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIST_LIMIT) as usize
    }
}

/// Event document persistence.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a new event. Fails with [`StoreError::Duplicate`] if the ID exists.
    async fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError>;

    /// Fetch an event by ID.
    async fn fetch_event(&self, event_id: &EventId) -> Result<Option<EventRecord>, StoreError>;

    /// List events matching `filter`, ordered by start time ascending.
    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, StoreError>;

    /// Remove an event and all of its registrations, returning what was removed.
    async fn delete_event(&self, event_id: &EventId) -> Result<Option<EventRecord>, StoreError>;

    /// Append `registration` only if, at commit time, the event has fewer
    /// registrations than its capacity and none for the same student.
    async fn append_registration(
        &self,
        event_id: &EventId,
        registration: &Registration,
    ) -> Result<AppendOutcome, StoreError>;

    /// Events starting in `(now, until]` whose reminder has not been sent.
    async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, StoreError>;

    /// Flip `reminder_sent` from false to true, returning the event as it
    /// stands at the flip. `None` if another caller already flipped it or the
    /// event is gone.
    async fn claim_reminder(
        &self,
        event_id: &EventId,
    ) -> Result<Option<EventRecord>, StoreError>;

    /// Check the store is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Account and session persistence used by the identity collaborator.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. Fails with [`StoreError::Duplicate`] if the email is taken.
    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError>;

    async fn find_user(&self, user_id: &UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Look up by lower-cased email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StoreError>;

    async fn find_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Returns true if a session was removed.
    async fn delete_session(&self, token_hash: &str) -> Result<bool, StoreError>;
}
