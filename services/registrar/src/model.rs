//! Domain records shared by the store, the registration manager and the API.

use std::collections::BTreeSet;

use campus_id::{EventId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How long an event lasts when the coordinator gives no end time.
pub const DEFAULT_EVENT_DURATION_MINUTES: i64 = 120;

// =============================================================================
// Roles
// =============================================================================

/// A capability an identity can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Coordinator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Coordinator => "coordinator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Role::Student),
            "coordinator" => Some(Role::Coordinator),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of roles attached to one identity.
///
/// A user may be a student and a coordinator at the same time; every operation
/// checks membership of the single role it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self(roles.into_iter().collect())
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    pub fn labels(&self) -> Vec<String> {
        self.iter().map(|r| r.as_str().to_string()).collect()
    }

    /// Parses stored labels, skipping any this build does not know.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        Self(labels.iter().filter_map(|l| Role::parse(l.as_ref())).collect())
    }
}

// =============================================================================
// Events
// =============================================================================

/// One student's place in an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub student_id: UserId,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub attended: bool,
}

impl Registration {
    pub fn new(student_id: UserId, registered_at: DateTime<Utc>) -> Self {
        Self {
            student_id,
            registered_at,
            attended: false,
        }
    }
}

/// Lifecycle position of an event, derived from its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Completed,
}

/// An event document as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: EventId,
    pub owner_id: UserId,
    pub title: String,
    pub description: String,
    pub venue: Option<String>,
    pub category: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub capacity: u32,
    pub registrations: Vec<Registration>,
    pub reminder_sent: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn registered_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_full(&self) -> bool {
        self.registrations.len() >= self.capacity as usize
    }

    pub fn spots_remaining(&self) -> u32 {
        let taken = u32::try_from(self.registrations.len()).unwrap_or(u32::MAX);
        self.capacity.saturating_sub(taken)
    }

    pub fn is_registered(&self, student_id: &UserId) -> bool {
        self.registrations
            .iter()
            .any(|r| &r.student_id == student_id)
    }

    pub fn effective_end(&self) -> DateTime<Utc> {
        self.ends_at
            .unwrap_or(self.starts_at + Duration::minutes(DEFAULT_EVENT_DURATION_MINUTES))
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> EventStatus {
        if now < self.starts_at {
            EventStatus::Upcoming
        } else if now < self.effective_end() {
            EventStatus::Ongoing
        } else {
            EventStatus::Completed
        }
    }

    /// Whether the conditional append precondition holds for `student_id`.
    pub fn admits(&self, student_id: &UserId) -> bool {
        !self.is_full() && !self.is_registered(student_id)
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Optional profile details collected at signup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub student_number: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub phone: Option<String>,
}

/// A user account as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: UserId,
    /// Lower-cased.
    pub email: String,
    pub full_name: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    pub roles: RoleSet,
    pub profile: UserProfile,
    pub created_at: DateTime<Utc>,
}

/// A bearer session. Only the token digest is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub token_hash: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A verified caller, as resolved by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub email: String,
    pub roles: RoleSet,
}

impl Actor {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(role)
    }
}
