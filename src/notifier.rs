//! Best-effort notification dispatch.
//!
//! Request handlers hand events to [`Notifier::emit`], which never blocks and
//! never fails the caller. A single background task drains the channel and
//! persists each event through a [`NotificationSink`]. Failures are logged and
//! the event is dropped.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use diesel::prelude::*;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::NewNotification;
use crate::schema::notifications;

pub const KIND_NEW_APPLICATION: &str = "new_application";
pub const KIND_STATUS_CHANGED: &str = "application_status_changed";
pub const KIND_INTERVIEW_SCHEDULED: &str = "interview_scheduled";

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub recipient_id: Uuid,
    pub kind: &'static str,
    pub message: String,
    pub payload: Value,
}

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn store(&self, event: NotificationEvent) -> Result<()>;
}

pub struct PgNotificationSink {
    pool: PgPool,
}

impl PgNotificationSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSink for PgNotificationSink {
    async fn store(&self, event: NotificationEvent) -> Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("database pool error: {err}"))?;
            diesel::insert_into(notifications::table)
                .values(&NewNotification {
                    id: Uuid::new_v4(),
                    user_id: event.recipient_id,
                    kind: event.kind.to_string(),
                    message: event.message,
                    payload: event.payload,
                })
                .execute(&mut conn)
                .context("failed to insert notification")?;
            Ok(())
        })
        .await
        .context("notification insert task panicked")?
    }
}

#[derive(Clone)]
pub struct Notifier {
    sender: UnboundedSender<NotificationEvent>,
}

impl Notifier {
    /// Starts the dispatch task on the current tokio runtime.
    pub fn spawn(sink: Arc<dyn NotificationSink>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatch_loop(sink, receiver));
        (Self { sender }, handle)
    }

    pub fn emit(&self, event: NotificationEvent) {
        let recipient = event.recipient_id;
        let kind = event.kind;
        if self.sender.send(event).is_err() {
            warn!(%recipient, kind, "notification dispatcher is not running; dropping event");
        }
    }
}

async fn dispatch_loop(
    sink: Arc<dyn NotificationSink>,
    mut receiver: UnboundedReceiver<NotificationEvent>,
) {
    while let Some(event) = receiver.recv().await {
        let recipient = event.recipient_id;
        let kind = event.kind;
        match sink.store(event).await {
            Ok(()) => debug!(%recipient, kind, "notification stored"),
            Err(err) => warn!(%recipient, kind, error = %err, "failed to store notification"),
        }
    }
    debug!("notification dispatcher stopped");
}
