//! Notification delivery.
//!
//! The registration manager never awaits a delivery. It hands a
//! [`Notification`] to a [`NotificationSender`], which enqueues without
//! blocking; the [`NotificationDispatcher`] worker drains the queue and calls
//! the configured [`Notifier`].

mod dispatcher;
mod webhook;

pub use dispatcher::{NotificationDispatcher, NotificationSender, DEFAULT_QUEUE_CAPACITY};
pub use webhook::WebhookNotifier;

use async_trait::async_trait;
use campus_id::{NotificationId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// A message addressed to one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(recipient: UserId, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: NotificationId::new(),
            recipient,
            subject: subject.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// Delivery failures. These are logged by the dispatcher and go no further.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("delivery endpoint returned {status}")]
    Rejected { status: u16 },
}

/// Delivery collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes each notification as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            notification_id = %notification.id,
            recipient = %notification.recipient,
            subject = %notification.subject,
            "Notification delivered to log"
        );
        Ok(())
    }
}
