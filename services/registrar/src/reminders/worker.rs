//! Periodic sweep that sends one reminder batch per event shortly before it starts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::db::{EventStore, StoreError};
use crate::model::EventRecord;
use crate::notify::{Notification, NotificationSender};

pub const DEFAULT_REMINDER_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct ReminderWorkerConfig {
    pub interval: Duration,
    /// How long before the start a reminder goes out.
    pub lead: chrono::Duration,
}

impl Default for ReminderWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_REMINDER_INTERVAL_SECS),
            lead: chrono::Duration::hours(1),
        }
    }
}

pub struct ReminderWorker {
    events: Arc<dyn EventStore>,
    notifications: NotificationSender,
    config: ReminderWorkerConfig,
}

impl ReminderWorker {
    pub fn new(
        events: Arc<dyn EventStore>,
        notifications: NotificationSender,
        config: ReminderWorkerConfig,
    ) -> Self {
        Self {
            events,
            notifications,
            config,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            lead_minutes = self.config.lead.num_minutes(),
            "Starting reminder worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(0) => {}
                        Ok(count) => info!(events = count, "Sent event reminders"),
                        Err(e) => error!(error = %e, "Failed to send event reminders"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reminder worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One sweep. Returns how many events had reminders sent.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let due = self.events.due_reminders(now, now + self.config.lead).await?;

        let mut sent = 0;
        for candidate in due {
            // Another replica or an overlapping sweep may have claimed it first.
            // The claimed record carries registrations made since the sweep.
            let Some(event) = self.events.claim_reminder(&candidate.event_id).await? else {
                continue;
            };
            self.remind(&event);
            sent += 1;
        }
        Ok(sent)
    }

    fn remind(&self, event: &EventRecord) {
        let body = match &event.venue {
            Some(venue) => format!("{} starts in 1 hour at {venue}", event.title),
            None => format!("{} starts in 1 hour", event.title),
        };
        for registration in &event.registrations {
            self.notifications.send(Notification::new(
                registration.student_id,
                "Event Reminder",
                body.clone(),
            ));
        }
    }
}
