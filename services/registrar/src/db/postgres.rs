//! Postgres-backed store.
//!
//! Events are stored as one row per event with registrations held in a JSONB
//! array, so an event and its registrations are created and deleted as a unit.
//! The registration append is one `UPDATE` whose `WHERE` clause carries the
//! capacity and duplicate checks; Postgres re-evaluates that predicate against
//! the latest row version after waiting on a concurrent writer's row lock.

use async_trait::async_trait;
use campus_id::{EventId, UserId};
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPool, PgRow},
    types::Json,
    Row,
};

use super::store::{AppendOutcome, EventFilter, EventStore, UserStore};
use super::StoreError;
use crate::model::{
    EventRecord, Registration, RoleSet, SessionRecord, UserProfile, UserRecord,
    DEFAULT_EVENT_DURATION_MINUTES,
};

const EVENT_COLUMNS: &str = "event_id, owner_id, title, description, venue, category, \
     starts_at, ends_at, capacity, registrations, reminder_sent, version, created_at";

const USER_COLUMNS: &str =
    "user_id, email, full_name, password_hash, roles, profile, created_at";

/// Store over a Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// Row decoding
// =============================================================================

fn parse_id<T>(raw: &str, entity: &'static str) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = campus_id::IdError>,
{
    raw.parse().map_err(|e: campus_id::IdError| StoreError::Corrupt {
        entity,
        message: format!("{raw}: {e}"),
    })
}

fn event_from_row(row: &PgRow) -> Result<EventRecord, StoreError> {
    let event_id: String = row.try_get("event_id").map_err(StoreError::Query)?;
    let owner_id: String = row.try_get("owner_id").map_err(StoreError::Query)?;
    let capacity: i32 = row.try_get("capacity").map_err(StoreError::Query)?;
    let Json(registrations): Json<Vec<Registration>> =
        row.try_get("registrations").map_err(StoreError::Query)?;

    Ok(EventRecord {
        event_id: parse_id(&event_id, "event")?,
        owner_id: parse_id(&owner_id, "event")?,
        title: row.try_get("title").map_err(StoreError::Query)?,
        description: row.try_get("description").map_err(StoreError::Query)?,
        venue: row.try_get("venue").map_err(StoreError::Query)?,
        category: row.try_get("category").map_err(StoreError::Query)?,
        starts_at: row.try_get("starts_at").map_err(StoreError::Query)?,
        ends_at: row.try_get("ends_at").map_err(StoreError::Query)?,
        capacity: u32::try_from(capacity).map_err(|_| StoreError::Corrupt {
            entity: "event",
            message: format!("{event_id}: negative capacity {capacity}"),
        })?,
        registrations,
        reminder_sent: row.try_get("reminder_sent").map_err(StoreError::Query)?,
        version: row.try_get("version").map_err(StoreError::Query)?,
        created_at: row.try_get("created_at").map_err(StoreError::Query)?,
    })
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, StoreError> {
    let user_id: String = row.try_get("user_id").map_err(StoreError::Query)?;
    let roles: Vec<String> = row.try_get("roles").map_err(StoreError::Query)?;
    let Json(profile): Json<UserProfile> = row.try_get("profile").map_err(StoreError::Query)?;

    Ok(UserRecord {
        user_id: parse_id(&user_id, "user")?,
        email: row.try_get("email").map_err(StoreError::Query)?,
        full_name: row.try_get("full_name").map_err(StoreError::Query)?,
        password_hash: row.try_get("password_hash").map_err(StoreError::Query)?,
        roles: RoleSet::from_labels(&roles),
        profile,
        created_at: row.try_get("created_at").map_err(StoreError::Query)?,
    })
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord, StoreError> {
    let user_id: String = row.try_get("user_id").map_err(StoreError::Query)?;
    Ok(SessionRecord {
        token_hash: row.try_get("token_hash").map_err(StoreError::Query)?,
        user_id: parse_id(&user_id, "session")?,
        created_at: row.try_get("created_at").map_err(StoreError::Query)?,
        expires_at: row.try_get("expires_at").map_err(StoreError::Query)?,
    })
}

/// JSONB containment probe matching any registration for `student_id`.
fn student_probe(student_id: &UserId) -> serde_json::Value {
    serde_json::json!([{ "student_id": student_id.to_string() }])
}

// =============================================================================
// EventStore
// =============================================================================

#[async_trait]
impl EventStore for PgStore {
    async fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        let capacity = i32::try_from(event.capacity).map_err(|_| StoreError::Corrupt {
            entity: "event",
            message: format!("capacity {} exceeds column range", event.capacity),
        })?;

        sqlx::query(
            r#"
            INSERT INTO events (
                event_id, owner_id, title, description, venue, category,
                starts_at, ends_at, capacity, registrations, reminder_sent,
                version, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(event.event_id.to_string())
        .bind(event.owner_id.to_string())
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.venue)
        .bind(&event.category)
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(capacity)
        .bind(Json(&event.registrations))
        .bind(event.reminder_sent)
        .bind(event.version)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_write(e, "event", &event.event_id.to_string()))?;

        Ok(())
    }

    async fn fetch_event(&self, event_id: &EventId) -> Result<Option<EventRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1"
        ))
        .bind(event_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE ($1::TEXT IS NULL OR category = $1)
              AND ($2::TEXT IS NULL OR owner_id = $2)
              AND ($3::JSONB IS NULL OR registrations @> $3)
              AND ($4::TIMESTAMPTZ IS NULL
                   OR COALESCE(ends_at, starts_at + make_interval(mins => $5)) > $4)
            ORDER BY starts_at ASC, event_id ASC
            LIMIT $6
            "#
        ))
        .bind(&filter.category)
        .bind(filter.owner_id.map(|id| id.to_string()))
        .bind(filter.registered.as_ref().map(student_probe))
        .bind(filter.active_at)
        .bind(DEFAULT_EVENT_DURATION_MINUTES as i32)
        .bind(filter.effective_limit() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn delete_event(&self, event_id: &EventId) -> Result<Option<EventRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM events WHERE event_id = $1 RETURNING {EVENT_COLUMNS}"
        ))
        .bind(event_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn append_registration(
        &self,
        event_id: &EventId,
        registration: &Registration,
    ) -> Result<AppendOutcome, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE events
            SET registrations = registrations || jsonb_build_array($2::JSONB),
                version = version + 1
            WHERE event_id = $1
              AND jsonb_array_length(registrations) < capacity
              AND NOT registrations @> $3
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event_id.to_string())
        .bind(Json(registration))
        .bind(student_probe(&registration.student_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        if let Some(row) = row {
            return Ok(AppendOutcome::Appended(event_from_row(&row)?));
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM events WHERE event_id = $1)")
                .bind(event_id.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(StoreError::Query)?;

        Ok(if exists {
            AppendOutcome::Rejected
        } else {
            AppendOutcome::Missing
        })
    }

    async fn due_reminders(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE NOT reminder_sent AND starts_at > $1 AND starts_at <= $2
            ORDER BY starts_at ASC
            "#
        ))
        .bind(now)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn claim_reminder(
        &self,
        event_id: &EventId,
    ) -> Result<Option<EventRecord>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE events
            SET reminder_sent = TRUE
            WHERE event_id = $1 AND NOT reminder_sent
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        Ok(())
    }
}

// =============================================================================
// UserStore
// =============================================================================

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, email, full_name, password_hash, roles, profile, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.user_id.to_string())
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(user.roles.labels())
        .bind(Json(&user.profile))
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_write(e, "user", &user.email))?;

        Ok(())
    }

    async fn find_user(&self, user_id: &UserId) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"
        ))
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&session.token_hash)
        .bind(session.user_id.to_string())
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_write(e, "session", "<token>"))?;

        Ok(())
    }

    async fn find_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT token_hash, user_id, created_at, expires_at FROM sessions WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn delete_session(&self, token_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_probe_shape() {
        let id = UserId::new();
        let probe = student_probe(&id);
        assert_eq!(probe[0]["student_id"], id.to_string());
        assert_eq!(probe.as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_parse_id_reports_entity() {
        let err = parse_id::<EventId>("usr_bogus", "event").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { entity: "event", .. }));
    }
}
