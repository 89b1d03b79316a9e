//! Pre-event reminders for registered students.

mod worker;

pub use worker::{ReminderWorker, ReminderWorkerConfig, DEFAULT_REMINDER_INTERVAL_SECS};
