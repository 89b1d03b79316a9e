//! Event listing, management and registration endpoints.
//!
//! Endpoints:
//! - POST   /v1/events                      - Create an event (coordinator)
//! - GET    /v1/events                      - Upcoming events, soonest first
//! - GET    /v1/events/category/{category}  - Upcoming events in one category
//! - GET    /v1/events/{event_id}           - One event
//! - DELETE /v1/events/{event_id}           - Delete an event (owner)
//! - POST   /v1/events/{event_id}/register  - Register the caller (student)
//!
//! Every endpoint requires a bearer token.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use campus_id::{EventId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::validation_error;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::model::{Actor, EventRecord, EventStatus, Registration, Role};
use crate::registration::{NewEvent, UpcomingFilter};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(create_event).get(list_events))
        .route("/events/category/{category}", get(list_by_category))
        .route("/events/{event_id}", get(get_event).delete(delete_event))
        .route("/events/{event_id}/register", post(register))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEventRequest {
    #[validate(length(min = 1, max = 200, message = "must be 1 to 200 characters"))]
    pub title: String,

    #[validate(length(min = 1, max = 5000, message = "must be 1 to 5000 characters"))]
    pub description: String,

    #[serde(default)]
    pub venue: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    pub starts_at: DateTime<Utc>,

    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,

    /// Range-checked by the registration manager.
    pub capacity: i64,
}

impl From<CreateEventRequest> for NewEvent {
    fn from(req: CreateEventRequest) -> Self {
        Self {
            title: req.title,
            description: req.description,
            venue: req.venue,
            category: req.category,
            starts_at: req.starts_at,
            ends_at: req.ends_at,
            capacity: req.capacity,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListEventsQuery {
    pub category: Option<String>,
    /// Only events owned by this coordinator.
    pub owner: Option<UserId>,
    /// `true` restricts to events the caller is registered for.
    #[serde(default)]
    pub registered: bool,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub student_id: UserId,
    pub registered_at: DateTime<Utc>,
    pub attended: bool,
}

impl From<&Registration> for RegistrationResponse {
    fn from(r: &Registration) -> Self {
        Self {
            student_id: r.student_id,
            registered_at: r.registered_at,
            attended: r.attended,
        }
    }
}

/// Response for a single event.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub id: EventId,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub starts_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    pub status: EventStatus,
    pub capacity: u32,
    pub registered_count: usize,
    pub spots_remaining: u32,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,

    /// Whether the caller holds a place.
    pub registered: bool,

    /// Only shown to the event's owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrations: Option<Vec<RegistrationResponse>>,
}

impl EventResponse {
    fn for_viewer(event: &EventRecord, viewer: &Actor, now: DateTime<Utc>) -> Self {
        let registered = event.is_registered(&viewer.user_id);
        let registrations = (viewer.user_id == event.owner_id)
            .then(|| event.registrations.iter().map(RegistrationResponse::from).collect());

        Self {
            id: event.event_id,
            title: event.title.clone(),
            description: event.description.clone(),
            venue: event.venue.clone(),
            category: event.category.clone(),
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            status: event.status_at(now),
            capacity: event.capacity,
            registered_count: event.registered_count(),
            spots_remaining: event.spots_remaining(),
            owner_id: event.owner_id,
            created_at: event.created_at,
            registered,
            registrations,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListEventsResponse {
    pub items: Vec<EventResponse>,
}

fn parse_event_id(raw: &str, request_id: &str) -> Result<EventId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request("invalid_event_id", format!("'{raw}' is not a valid event ID"))
            .with_request_id(request_id.to_string())
    })
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /v1/events
async fn create_event(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = ctx.actor_with_role(Role::Coordinator)?;
    req.validate()
        .map_err(|e| validation_error(e, &ctx.request_id))?;

    let event = state
        .registrations()
        .create_event(actor, req.into())
        .await
        .map_err(|e| ApiError::from_registration(e, &ctx.request_id))?;

    let body = EventResponse::for_viewer(&event, actor, Utc::now());
    Ok((StatusCode::CREATED, Json(body)))
}

async fn list_with_filter(
    state: &AppState,
    ctx: &RequestContext,
    query: ListEventsQuery,
) -> Result<Json<ListEventsResponse>, ApiError> {
    let viewer = ctx.actor()?;
    let registered = query.registered.then_some(viewer.user_id);

    let events = state
        .registrations()
        .list_upcoming(UpcomingFilter {
            category: query.category,
            owner_id: query.owner,
            registered,
            limit: query.limit,
        })
        .await
        .map_err(|e| ApiError::from_registration(e, &ctx.request_id))?;

    let now = Utc::now();
    Ok(Json(ListEventsResponse {
        items: events
            .iter()
            .map(|e| EventResponse::for_viewer(e, viewer, now))
            .collect(),
    }))
}

/// GET /v1/events
async fn list_events(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ListEventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    list_with_filter(&state, &ctx, query).await
}

/// GET /v1/events/category/{category}
async fn list_by_category(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(category): Path<String>,
    Query(query): Query<ListEventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let query = ListEventsQuery {
        category: Some(category),
        ..query
    };
    list_with_filter(&state, &ctx, query).await
}

/// GET /v1/events/{event_id}
async fn get_event(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = ctx.actor()?;
    let event_id = parse_event_id(&event_id, &ctx.request_id)?;
    let event = state
        .registrations()
        .get_by_id(&event_id)
        .await
        .map_err(|e| ApiError::from_registration(e, &ctx.request_id))?;

    Ok(Json(EventResponse::for_viewer(&event, viewer, Utc::now())))
}

/// DELETE /v1/events/{event_id}
async fn delete_event(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = ctx.actor()?;
    let event_id = parse_event_id(&event_id, &ctx.request_id)?;
    state
        .registrations()
        .delete_event(&event_id, actor)
        .await
        .map_err(|e| ApiError::from_registration(e, &ctx.request_id))?;

    tracing::info!(event_id = %event_id, request_id = %ctx.request_id, "Event deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/events/{event_id}/register
async fn register(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = ctx.actor()?;
    let event_id = parse_event_id(&event_id, &ctx.request_id)?;
    let registration = state
        .registrations()
        .register(&event_id, actor)
        .await
        .map_err(|e| ApiError::from_registration(e, &ctx.request_id))?;

    Ok((
        StatusCode::CREATED,
        Json(RegistrationResponse::from(&registration)),
    ))
}
