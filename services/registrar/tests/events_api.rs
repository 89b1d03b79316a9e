use std::sync::Arc;

use campus_registrar::{
    api,
    db::MemoryStore,
    notify::{Notification, NotificationSender},
    registration::RegistrationManager,
    state::AppState,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

struct ApiFixture {
    base_url: String,
    client: reqwest::Client,
    notifications: mpsc::Receiver<Notification>,
}

async fn start_api() -> ApiFixture {
    let store = Arc::new(MemoryStore::new());
    let (sender, notifications) = NotificationSender::channel(1024);
    let manager = RegistrationManager::new(store.clone(), sender);
    let state = AppState::new(manager, store, Duration::hours(24));
    let app = api::create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    ApiFixture {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        notifications,
    }
}

impl ApiFixture {
    /// Sign up and log in, returning `(user_id, token)`.
    async fn account(&self, email: &str, roles: &[&str]) -> (String, String) {
        let resp = self
            .client
            .post(format!("{}/v1/auth/signup", self.base_url))
            .json(&json!({
                "email": email,
                "password": "hunter22",
                "full_name": "Test User",
                "roles": roles,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 201);
        let user: Value = resp.json().await.unwrap();

        let resp = self
            .client
            .post(format!("{}/v1/auth/login", self.base_url))
            .json(&json!({ "email": email, "password": "hunter22" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let session: Value = resp.json().await.unwrap();

        (
            user["id"].as_str().unwrap().to_string(),
            session["access_token"].as_str().unwrap().to_string(),
        )
    }

    async fn create_event(&self, token: &str, capacity: i64) -> reqwest::Response {
        self.client
            .post(format!("{}/v1/events", self.base_url))
            .bearer_auth(token)
            .json(&json!({
                "title": "Tech Seminar",
                "description": "Learn about latest technologies",
                "venue": "Auditorium",
                "category": "Technical",
                "starts_at": (Utc::now() + Duration::days(7)).to_rfc3339(),
                "capacity": capacity,
            }))
            .send()
            .await
            .unwrap()
    }

    async fn register(&self, token: &str, event_id: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/v1/events/{event_id}/register", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
}

async fn problem_code(resp: reqwest::Response) -> String {
    let body: Value = resp.json().await.unwrap();
    body["code"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn registration_fills_event_then_rejects() {
    let mut fixture = start_api().await;
    let (_, coordinator) = fixture
        .account("coord@college.edu", &["coordinator"])
        .await;
    let (student_a, token_a) = fixture.account("a@college.edu", &["student"]).await;
    let (_, token_b) = fixture.account("b@college.edu", &["student"]).await;

    let resp = fixture.create_event(&coordinator, 1).await;
    assert_eq!(resp.status().as_u16(), 201);
    let event: Value = resp.json().await.unwrap();
    let event_id = event["id"].as_str().unwrap().to_string();
    assert_eq!(event["category"], "technical");
    assert_eq!(event["spots_remaining"], 1);

    let resp = fixture.register(&token_a, &event_id).await;
    assert_eq!(resp.status().as_u16(), 201);
    let registration: Value = resp.json().await.unwrap();
    assert_eq!(registration["student_id"], student_a.as_str());

    let resp = fixture.register(&token_a, &event_id).await;
    assert_eq!(resp.status().as_u16(), 409);
    assert_eq!(problem_code(resp).await, "already_registered");

    let resp = fixture.register(&token_b, &event_id).await;
    assert_eq!(resp.status().as_u16(), 409);
    assert_eq!(problem_code(resp).await, "event_full");

    let confirmation = fixture.notifications.recv().await.unwrap();
    assert_eq!(confirmation.recipient.to_string(), student_a);
    assert_eq!(confirmation.subject, "Registration confirmed");

    // Owner sees the roster, the student sees only their own flag.
    let resp = fixture
        .client
        .get(format!("{}/v1/events/{event_id}", fixture.base_url))
        .bearer_auth(&coordinator)
        .send()
        .await
        .unwrap();
    let as_owner: Value = resp.json().await.unwrap();
    assert_eq!(as_owner["registrations"].as_array().unwrap().len(), 1);
    assert_eq!(as_owner["registered_count"], 1);

    let resp = fixture
        .client
        .get(format!("{}/v1/events/{event_id}", fixture.base_url))
        .bearer_auth(&token_a)
        .send()
        .await
        .unwrap();
    let as_student: Value = resp.json().await.unwrap();
    assert!(as_student.get("registrations").is_none());
    assert_eq!(as_student["registered"], true);
}

#[tokio::test]
async fn only_owner_can_delete_and_registrants_are_told() {
    let mut fixture = start_api().await;
    let (_, owner) = fixture.account("owner@college.edu", &["coordinator"]).await;
    let (_, other) = fixture.account("other@college.edu", &["coordinator"]).await;
    let (student, student_token) = fixture.account("s@college.edu", &["student"]).await;

    let event: Value = fixture.create_event(&owner, 10).await.json().await.unwrap();
    let event_id = event["id"].as_str().unwrap().to_string();
    assert_eq!(fixture.register(&student_token, &event_id).await.status().as_u16(), 201);
    fixture.notifications.recv().await.unwrap();

    let url = format!("{}/v1/events/{event_id}", fixture.base_url);
    let resp = fixture.client.delete(&url).bearer_auth(&other).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 403);

    let resp = fixture.client.delete(&url).bearer_auth(&owner).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 204);

    let cancelled = fixture.notifications.recv().await.unwrap();
    assert_eq!(cancelled.recipient.to_string(), student);
    assert_eq!(cancelled.subject, "Event cancelled");

    let resp = fixture.client.get(&url).bearer_auth(&owner).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    assert_eq!(problem_code(resp).await, "event_not_found");

    let resp = fixture.register(&student_token, &event_id).await;
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn role_and_input_checks() {
    let fixture = start_api().await;
    let (_, coordinator) = fixture.account("c@college.edu", &["coordinator"]).await;
    let (_, student) = fixture.account("s@college.edu", &["student"]).await;

    let resp = fixture.create_event(&coordinator, 0).await;
    assert_eq!(resp.status().as_u16(), 400);
    assert_eq!(problem_code(resp).await, "invalid_argument");

    let resp = fixture.create_event(&student, 10).await;
    assert_eq!(resp.status().as_u16(), 403);

    let event: Value = fixture.create_event(&coordinator, 10).await.json().await.unwrap();
    let event_id = event["id"].as_str().unwrap().to_string();

    // Coordinator without the student role.
    let resp = fixture.register(&coordinator, &event_id).await;
    assert_eq!(resp.status().as_u16(), 403);

    let resp = fixture.register(&student, "not-an-id").await;
    assert_eq!(resp.status().as_u16(), 400);

    let resp = fixture
        .client
        .post(format!("{}/v1/events/{event_id}/register", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let resp = fixture
        .client
        .post(format!("{}/v1/auth/signup", fixture.base_url))
        .json(&json!({
            "email": "S@College.edu",
            "password": "hunter22",
            "full_name": "Dup",
            "roles": ["student"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 409);
    assert_eq!(problem_code(resp).await, "email_taken");
}

#[tokio::test]
async fn listing_filters_by_category_and_registration() {
    let fixture = start_api().await;
    let (_, coordinator) = fixture.account("c@college.edu", &["coordinator"]).await;
    let (_, student) = fixture.account("s@college.edu", &["student"]).await;

    let technical: Value = fixture.create_event(&coordinator, 5).await.json().await.unwrap();
    let resp = fixture
        .client
        .post(format!("{}/v1/events", fixture.base_url))
        .bearer_auth(&coordinator)
        .json(&json!({
            "title": "Cultural Fest",
            "description": "Annual fest",
            "category": "cultural",
            "starts_at": (Utc::now() + Duration::days(1)).to_rfc3339(),
            "capacity": 50,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    let cultural: Value = resp.json().await.unwrap();

    let resp = fixture
        .client
        .get(format!("{}/v1/events", fixture.base_url))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    let all: Value = resp.json().await.unwrap();
    let items = all["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    // Soonest first.
    assert_eq!(items[0]["id"], cultural["id"]);

    let resp = fixture
        .client
        .get(format!("{}/v1/events/category/TECHNICAL", fixture.base_url))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    let by_category: Value = resp.json().await.unwrap();
    let items = by_category["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], technical["id"]);

    let technical_id = technical["id"].as_str().unwrap();
    assert_eq!(fixture.register(&student, technical_id).await.status().as_u16(), 201);

    let resp = fixture
        .client
        .get(format!("{}/v1/events?registered=true", fixture.base_url))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    let mine: Value = resp.json().await.unwrap();
    let items = mine["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["registered"], true);

    let resp = fixture
        .client
        .get(format!("{}/v1/events?registered=true", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}

#[tokio::test]
async fn reading_events_requires_a_token() {
    let fixture = start_api().await;
    let (_, coordinator) = fixture.account("c@college.edu", &["coordinator"]).await;
    let event: Value = fixture.create_event(&coordinator, 5).await.json().await.unwrap();
    let event_id = event["id"].as_str().unwrap();

    for path in [
        "/v1/events".to_string(),
        "/v1/events/category/technical".to_string(),
        format!("/v1/events/{event_id}"),
    ] {
        let resp = fixture
            .client
            .get(format!("{}{path}", fixture.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 401, "GET {path}");
        assert_eq!(problem_code(resp).await, "unauthorized");

        let resp = fixture
            .client
            .get(format!("{}{path}", fixture.base_url))
            .bearer_auth(&coordinator)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200, "GET {path}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_never_overbook() {
    const CAPACITY: i64 = 5;
    const STUDENTS: usize = 20;

    let fixture = start_api().await;
    let (_, coordinator) = fixture.account("c@college.edu", &["coordinator"]).await;
    let event: Value = fixture
        .create_event(&coordinator, CAPACITY)
        .await
        .json()
        .await
        .unwrap();
    let event_id = event["id"].as_str().unwrap().to_string();

    let mut tokens = Vec::with_capacity(STUDENTS);
    for i in 0..STUDENTS {
        let (_, token) = fixture
            .account(&format!("student{i}@college.edu"), &["student"])
            .await;
        tokens.push(token);
    }

    let statuses = futures_util::future::join_all(
        tokens.iter().map(|token| fixture.register(token, &event_id)),
    )
    .await
    .into_iter()
    .map(|resp| resp.status().as_u16())
    .collect::<Vec<_>>();

    let accepted = statuses.iter().filter(|s| **s == 201).count();
    let rejected = statuses.iter().filter(|s| **s == 409).count();
    assert_eq!(accepted, CAPACITY as usize);
    assert_eq!(rejected, STUDENTS - CAPACITY as usize);

    let resp = fixture
        .client
        .get(format!("{}/v1/events/{event_id}", fixture.base_url))
        .bearer_auth(&coordinator)
        .send()
        .await
        .unwrap();
    let after: Value = resp.json().await.unwrap();
    assert_eq!(after["registered_count"], CAPACITY);
    assert_eq!(after["spots_remaining"], 0);
}

#[tokio::test]
async fn logout_revokes_token() {
    let fixture = start_api().await;
    let (user_id, token) = fixture.account("s@college.edu", &["student", "coordinator"]).await;

    let resp = fixture
        .client
        .get(format!("{}/v1/auth/whoami", fixture.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let whoami: Value = resp.json().await.unwrap();
    assert_eq!(whoami["user_id"], user_id.as_str());
    assert_eq!(whoami["roles"], json!(["student", "coordinator"]));

    let resp = fixture
        .client
        .post(format!("{}/v1/auth/logout", fixture.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 204);

    let resp = fixture
        .client
        .get(format!("{}/v1/auth/whoami", fixture.base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    assert_eq!(problem_code(resp).await, "invalid_token");

    let resp = fixture
        .client
        .post(format!("{}/v1/auth/login", fixture.base_url))
        .json(&json!({ "email": "s@college.edu", "password": "wrong-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    assert_eq!(problem_code(resp).await, "invalid_credentials");
}
