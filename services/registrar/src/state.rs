//! Application state shared across request handlers.

use std::sync::Arc;

use chrono::Duration;

use crate::db::UserStore;
use crate::registration::RegistrationManager;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registrations: RegistrationManager,
    users: Arc<dyn UserStore>,
    session_ttl: Duration,
}

impl AppState {
    pub fn new(
        registrations: RegistrationManager,
        users: Arc<dyn UserStore>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registrations,
                users,
                session_ttl,
            }),
        }
    }

    pub fn registrations(&self) -> &RegistrationManager {
        &self.inner.registrations
    }

    /// Account and session store backing the identity endpoints.
    pub fn users(&self) -> &dyn UserStore {
        self.inner.users.as_ref()
    }

    /// Lifetime of newly issued session tokens.
    pub fn session_ttl(&self) -> Duration {
        self.inner.session_ttl
    }
}
