//! Best-effort notifications.
//!
//! A transition hands its notifications to [`NotificationDispatcher::notify`],
//! which returns immediately. Delivery runs on a spawned task; a failure is
//! logged and dropped, so it can never undo or delay a committed transition.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// One message for the email collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub template: String,
    pub context: serde_json::Value,
}

impl Notification {
    pub fn new(
        recipient: impl Into<String>,
        template: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            template: template.into(),
            context,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Fire-and-forget front for a [`Notifier`].
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn notify(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let recipient = notification.recipient.clone();
            let template = notification.template.clone();
            if let Err(e) = notifier.send(notification).await {
                tracing::warn!(%recipient, %template, error = %e, "notification dropped");
            }
        });
    }
}

impl core::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NotificationDispatcher").finish_non_exhaustive()
    }
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %notification.recipient,
            template = %notification.template,
            context = %notification.context,
            "notification"
        );
        Ok(())
    }
}

/// Keeps every notification in memory. Can be switched to fail every delivery.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let n = Self::default();
        n.set_failing(true);
        n
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn sent_with_template(&self, template: &str) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.template == template)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(NotifyError::Delivery("mail relay unreachable".into()));
        }
        match self.sent.lock() {
            Ok(mut g) => g.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        Ok(())
    }
}
