//! Local notifications
//!
//! The engine asks for user-visible notices but never waits on them.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    /// Non-blocking alert about something that failed.
    Alert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub service_id: Option<String>,
}

impl Notification {
    pub fn status_changed(service_id: &str, status: &str) -> Self {
        Self {
            level: NotificationLevel::Info,
            title: "Service status updated".into(),
            body: format!("The service status was updated to: {}", status),
            service_id: Some(service_id.to_string()),
        }
    }

    pub fn value_changed(service_id: &str, value: f64) -> Self {
        Self {
            level: NotificationLevel::Info,
            title: "Service value updated".into(),
            body: format!("A new value of {:.2} was proposed", value),
            service_id: Some(service_id.to_string()),
        }
    }

    pub fn new_appointment() -> Self {
        Self {
            level: NotificationLevel::Info,
            title: "New request".into(),
            body: "You received a new service request!".into(),
            service_id: None,
        }
    }

    pub fn alert(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Alert,
            title: title.into(),
            body: body.into(),
            service_id: None,
        }
    }
}

/// Fire-and-forget sink for user-visible notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: Notification) {
        match n.level {
            NotificationLevel::Info => info!(service = ?n.service_id, "🔔 {}: {}", n.title, n.body),
            NotificationLevel::Alert => warn!(service = ?n.service_id, "⚠️ {}: {}", n.title, n.body),
        }
    }
}
