//! Campus events registrar
//!
//! Serves the event registration API and runs the notification dispatcher
//! and the pre-event reminder worker alongside it.

use std::sync::Arc;

use anyhow::Result;
use campus_registrar::{
    api,
    config::{self, StoreKind},
    db::{Database, EventStore, MemoryStore, UserStore},
    notify::{LogNotifier, NotificationDispatcher, Notifier, WebhookNotifier},
    registration::RegistrationManager,
    reminders::{ReminderWorker, ReminderWorkerConfig},
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn open_stores(
    config: &config::Config,
) -> Result<(Arc<dyn EventStore>, Arc<dyn UserStore>)> {
    match config.store {
        StoreKind::Memory => {
            warn!("Using in-memory store; data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            let events: Arc<dyn EventStore> = store.clone();
            let users: Arc<dyn UserStore> = store;
            Ok((events, users))
        }
        StoreKind::Postgres => {
            let db = match Database::connect(&config.database).await {
                Ok(db) => {
                    info!("Database connection established");
                    db
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            // Run migrations in dev mode
            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                if let Err(e) = db.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }

            let store = Arc::new(db.store());
            let events: Arc<dyn EventStore> = store.clone();
            let users: Arc<dyn UserStore> = store;
            Ok((events, users))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to CAMPUS_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting campus events registrar");
    info!(
        listen_addr = %config.listen_addr,
        store = ?config.store,
        "Configuration loaded"
    );

    let (events, users) = open_stores(&config).await?;

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => {
            info!(url = %url, "Delivering notifications by webhook");
            Arc::new(WebhookNotifier::new(url.clone())?)
        }
        None => Arc::new(LogNotifier),
    };

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The dispatcher stops on its own signal, sent once nothing can enqueue.
    let (drain_tx, drain_rx) = watch::channel(false);

    let (dispatcher, notifications) =
        NotificationDispatcher::new(notifier, config.notify_queue_capacity);
    let dispatcher_handle = tokio::spawn(dispatcher.run(drain_rx));

    let reminder_worker = ReminderWorker::new(
        events.clone(),
        notifications.clone(),
        ReminderWorkerConfig {
            interval: config.reminder_interval,
            ..Default::default()
        },
    );
    let reminder_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            reminder_worker.run(shutdown_rx).await;
        }
    });

    let manager = RegistrationManager::new(events, notifications);
    let state = AppState::new(manager, users, config.session_ttl);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    let server_finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        result = &mut server_handle => {
            log_server_exit(result);
            true
        }
    };

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if !server_finished {
        match tokio::time::timeout(shutdown_timeout, server_handle).await {
            Ok(result) => log_server_exit(result),
            Err(e) => warn!(error = %e, "HTTP server did not shut down in time"),
        }
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, reminder_handle).await {
        warn!(error = %e, "Reminder worker did not shut down in time");
    }

    // Nothing enqueues past this point.
    let _ = drain_tx.send(true);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, dispatcher_handle).await {
        warn!(error = %e, "Notification dispatcher did not shut down in time");
    }

    info!("Registrar shutdown complete");
    Ok(())
}

fn log_server_exit(result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("Server exited normally"),
        Ok(Err(e)) => error!(error = %e, "Server error"),
        Err(e) => error!(error = %e, "Server task panicked"),
    }
}
