//! Queue and worker that keep delivery off the request path.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use super::{Notification, Notifier};

/// Default bound on queued, undelivered notifications.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Cheap, cloneable handle for enqueuing notifications.
#[derive(Clone, Debug)]
pub struct NotificationSender {
    tx: mpsc::Sender<Notification>,
}

impl NotificationSender {
    /// Enqueue without waiting. A full or closed queue drops the notification
    /// with a warning; the caller is never told.
    pub fn send(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(n)) => {
                warn!(
                    notification_id = %n.id,
                    recipient = %n.recipient,
                    "Notification queue full; dropping notification"
                );
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                warn!(
                    notification_id = %n.id,
                    recipient = %n.recipient,
                    "Notification dispatcher stopped; dropping notification"
                );
            }
        }
    }

    /// A sender whose queue is consumed by the returned receiver. Used by tests
    /// that want to inspect what was enqueued.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

/// Drains the notification queue into a [`Notifier`].
pub struct NotificationDispatcher {
    rx: mpsc::Receiver<Notification>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, capacity: usize) -> (Self, NotificationSender) {
        let (sender, rx) = NotificationSender::channel(capacity);
        (Self { rx, notifier }, sender)
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting notification dispatcher");

        loop {
            tokio::select! {
                maybe = self.rx.recv() => {
                    match maybe {
                        Some(notification) => self.deliver(notification).await,
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Deliver whatever was accepted before shutdown.
        self.rx.close();
        while let Some(notification) = self.rx.recv().await {
            self.deliver(notification).await;
        }

        info!("Notification dispatcher shutting down");
    }

    async fn deliver(&self, notification: Notification) {
        match self.notifier.deliver(&notification).await {
            Ok(()) => {
                debug!(notification_id = %notification.id, "Notification delivered");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    notification_id = %notification.id,
                    recipient = %notification.recipient,
                    "Notification delivery failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use async_trait::async_trait;
    use campus_id::UserId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        delivered: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Counting {
        async fn deliver(&self, _notification: &Notification) -> Result<(), NotifyError> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Rejected { status: 503 })
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (sender, mut rx) = NotificationSender::channel(1);
        sender.send(Notification::new(UserId::new(), "a", "a"));
        sender.send(Notification::new(UserId::new(), "b", "b"));
        assert_eq!(rx.recv().await.unwrap().subject, "a");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_close_is_silent() {
        let (sender, rx) = NotificationSender::channel(4);
        drop(rx);
        sender.send(Notification::new(UserId::new(), "a", "a"));
    }

    #[tokio::test]
    async fn test_dispatcher_drains_queue_on_shutdown() {
        let notifier = Arc::new(Counting {
            fail: true,
            ..Default::default()
        });
        let (dispatcher, sender) = NotificationDispatcher::new(notifier.clone(), 16);
        for i in 0..5 {
            sender.send(Notification::new(UserId::new(), format!("n{i}"), "body"));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_late_enqueues_are_delivered_before_drain_signal() {
        let notifier = Arc::new(Counting::default());
        let (dispatcher, sender) = NotificationDispatcher::new(notifier.clone(), 16);

        // The HTTP server is told to stop first; the dispatcher keeps running.
        let (http_tx, _http_rx) = watch::channel(false);
        let (drain_tx, drain_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(drain_rx));
        http_tx.send(true).unwrap();

        // A request still in flight enqueues its notices.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        for i in 0..3 {
            sender.send(Notification::new(UserId::new(), format!("late{i}"), "body"));
        }
        assert!(!handle.is_finished());

        drain_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 3);
    }
}
