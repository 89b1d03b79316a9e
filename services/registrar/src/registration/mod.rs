//! Registration manager.
//!
//! Owns the two event invariants: an event never holds more registrations
//! than its capacity, and a student appears at most once per event. Both are
//! enforced by the store's conditional append, so concurrent `register` calls
//! on one event serialize at the store while different events proceed in
//! parallel.

mod error;

pub use error::RegistrationError;

use std::sync::Arc;

use campus_id::{EventId, UserId};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::db::{AppendOutcome, EventFilter, EventStore};
use crate::model::{Actor, EventRecord, Registration, Role};
use crate::notify::{Notification, NotificationSender};

/// Largest capacity accepted on create.
pub const MAX_CAPACITY: i64 = 100_000;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 5000;

/// How many times a rejected conditional append is retried after re-checking.
const MAX_CONFLICT_RETRIES: usize = 1;

/// Input for [`RegistrationManager::create_event`].
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub description: String,
    pub venue: Option<String>,
    pub category: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Signed so that non-positive input can be reported rather than wrapped.
    pub capacity: i64,
}

/// Criteria for [`RegistrationManager::list_upcoming`].
#[derive(Debug, Clone, Default)]
pub struct UpcomingFilter {
    pub category: Option<String>,
    pub owner_id: Option<UserId>,
    pub registered: Option<UserId>,
    pub limit: Option<u32>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_category(category: Option<String>) -> Option<String> {
    non_blank(category).map(|c| c.to_lowercase())
}

fn require_role(actor: &Actor, role: Role, reason: &'static str) -> Result<(), RegistrationError> {
    if actor.has_role(role) {
        Ok(())
    } else {
        Err(RegistrationError::Forbidden(reason))
    }
}

/// In-memory precondition check, duplicate first so that a student retrying
/// on a full event learns they already hold a place.
fn check_admission(event: &EventRecord, student_id: &UserId) -> Result<(), RegistrationError> {
    if event.is_registered(student_id) {
        return Err(RegistrationError::AlreadyRegistered(event.event_id));
    }
    if event.is_full() {
        return Err(RegistrationError::Full(event.event_id));
    }
    Ok(())
}

impl NewEvent {
    fn validate(&self) -> Result<(), RegistrationError> {
        let invalid = |msg: String| Err(RegistrationError::InvalidArgument(msg));

        if self.capacity <= 0 {
            return invalid(format!(
                "capacity must be a positive integer, got {}",
                self.capacity
            ));
        }
        if self.capacity > MAX_CAPACITY {
            return invalid(format!("capacity cannot exceed {MAX_CAPACITY}"));
        }

        let title = self.title.trim();
        if title.is_empty() {
            return invalid("title is required".to_string());
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return invalid(format!("title cannot exceed {MAX_TITLE_LEN} characters"));
        }

        let description = self.description.trim();
        if description.is_empty() {
            return invalid("description is required".to_string());
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return invalid(format!(
                "description cannot exceed {MAX_DESCRIPTION_LEN} characters"
            ));
        }

        if let Some(ends_at) = self.ends_at {
            if ends_at <= self.starts_at {
                return invalid("ends_at must be after starts_at".to_string());
            }
        }

        Ok(())
    }
}

/// Check-and-append registration over an [`EventStore`].
#[derive(Clone)]
pub struct RegistrationManager {
    events: Arc<dyn EventStore>,
    notifications: NotificationSender,
}

impl RegistrationManager {
    pub fn new(events: Arc<dyn EventStore>, notifications: NotificationSender) -> Self {
        Self {
            events,
            notifications,
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// Create an event owned by `owner`, with no registrations.
    pub async fn create_event(
        &self,
        owner: &Actor,
        new: NewEvent,
    ) -> Result<EventRecord, RegistrationError> {
        require_role(owner, Role::Coordinator, "only coordinators can create events")?;
        new.validate()?;

        let capacity = u32::try_from(new.capacity)
            .map_err(|_| RegistrationError::InvalidArgument("capacity out of range".to_string()))?;

        let event = EventRecord {
            event_id: EventId::new(),
            owner_id: owner.user_id,
            title: new.title.trim().to_string(),
            description: new.description.trim().to_string(),
            venue: non_blank(new.venue),
            category: normalize_category(new.category),
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            capacity,
            registrations: Vec::new(),
            reminder_sent: false,
            version: 1,
            created_at: Utc::now(),
        };

        self.events.insert_event(&event).await?;

        info!(
            event_id = %event.event_id,
            owner_id = %event.owner_id,
            capacity = event.capacity,
            "Event created"
        );
        Ok(event)
    }

    /// Register `student` for an event.
    ///
    /// # Errors
    ///
    /// `Forbidden` without the student role, `NotFound`, `AlreadyRegistered`,
    /// `Full`, `Conflict` if the conditional append was rejected on every
    /// attempt while the event still had room, `Unavailable` on store failure.
    pub async fn register(
        &self,
        event_id: &EventId,
        student: &Actor,
    ) -> Result<Registration, RegistrationError> {
        require_role(student, Role::Student, "only students can register for events")?;

        let registration = Registration::new(student.user_id, Utc::now());

        for attempt in 0..=MAX_CONFLICT_RETRIES {
            let event = self.get_by_id(event_id).await?;
            check_admission(&event, &student.user_id)?;

            match self
                .events
                .append_registration(event_id, &registration)
                .await?
            {
                AppendOutcome::Appended(updated) => {
                    info!(
                        event_id = %event_id,
                        student_id = %student.user_id,
                        registered = updated.registered_count(),
                        capacity = updated.capacity,
                        "Registration accepted"
                    );
                    self.notify_registered(&updated, &student.user_id);
                    return Ok(registration);
                }
                AppendOutcome::Missing => {
                    return Err(RegistrationError::NotFound(*event_id));
                }
                AppendOutcome::Rejected => {
                    debug!(
                        event_id = %event_id,
                        student_id = %student.user_id,
                        attempt,
                        "Conditional append rejected; re-checking"
                    );
                }
            }
        }

        let event = self.get_by_id(event_id).await?;
        check_admission(&event, &student.user_id)?;

        warn!(
            event_id = %event_id,
            student_id = %student.user_id,
            "Registration lost every conditional append race"
        );
        Err(RegistrationError::Conflict(*event_id))
    }

    /// Delete an event and all of its registrations. Only the owner may do this.
    pub async fn delete_event(
        &self,
        event_id: &EventId,
        requester: &Actor,
    ) -> Result<(), RegistrationError> {
        let event = self.get_by_id(event_id).await?;
        if event.owner_id != requester.user_id {
            return Err(RegistrationError::Forbidden(
                "only the event's coordinator can delete it",
            ));
        }

        let Some(removed) = self.events.delete_event(event_id).await? else {
            return Err(RegistrationError::NotFound(*event_id));
        };

        info!(
            event_id = %event_id,
            owner_id = %requester.user_id,
            registrations = removed.registered_count(),
            "Event deleted"
        );

        for registration in &removed.registrations {
            self.notifications.send(Notification::new(
                registration.student_id,
                "Event cancelled",
                format!(
                    "{} scheduled for {} has been cancelled.",
                    removed.title,
                    removed.starts_at.format("%Y-%m-%d %H:%M UTC")
                ),
            ));
        }

        Ok(())
    }

    pub async fn get_by_id(&self, event_id: &EventId) -> Result<EventRecord, RegistrationError> {
        self.events
            .fetch_event(event_id)
            .await?
            .ok_or(RegistrationError::NotFound(*event_id))
    }

    /// Events that have not yet finished, soonest first.
    pub async fn list_upcoming(
        &self,
        filter: UpcomingFilter,
    ) -> Result<Vec<EventRecord>, RegistrationError> {
        let mut store_filter = EventFilter {
            category: normalize_category(filter.category),
            owner_id: filter.owner_id,
            registered: filter.registered,
            active_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Some(limit) = filter.limit {
            store_filter.limit = limit;
        }

        Ok(self.events.list_events(&store_filter).await?)
    }

    fn notify_registered(&self, event: &EventRecord, student_id: &UserId) {
        let mut body = format!(
            "You are registered for {} on {}",
            event.title,
            event.starts_at.format("%Y-%m-%d %H:%M UTC")
        );
        if let Some(venue) = &event.venue {
            body.push_str(&format!(" at {venue}"));
        }
        body.push('.');

        self.notifications
            .send(Notification::new(*student_id, "Registration confirmed", body));
    }
}
