//! Notification sink trait and implementations.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};

/// Kind of a user-visible notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// An operation finished successfully.
    Success,
    /// An operation failed.
    Error,
    /// Informational message.
    Info,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A user-visible message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Kind of the notification.
    pub kind: NotificationKind,
    /// Short title.
    pub title: String,
    /// Optional longer description.
    pub body: Option<String>,
}

impl Notification {
    /// Creates a notification of the given kind.
    #[must_use]
    pub fn new(kind: NotificationKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: None,
        }
    }

    /// Creates a success notification.
    #[must_use]
    pub fn success(title: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, title)
    }

    /// Creates an error notification.
    #[must_use]
    pub fn error(title: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, title)
    }

    /// Creates an info notification.
    #[must_use]
    pub fn info(title: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, title)
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Side channel for user-visible messages.
///
/// Implementations must not block and must never fail; callers do not wait
/// on notifications for correctness.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Shows a notification.
    fn notify(&self, notification: Notification);

    /// Asks the application to open its model settings.
    fn request_model_settings(&self) {}
}

/// A notifier that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNotifier;

impl Notifier for NoOpNotifier {
    fn notify(&self, _notification: Notification) {}
}

/// A notifier that logs through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify(&self, notification: Notification) {
        let body = notification.body.as_deref().unwrap_or_default();
        match notification.kind {
            NotificationKind::Success | NotificationKind::Info => {
                info!(kind = %notification.kind, body, "{}", notification.title);
            }
            NotificationKind::Error => {
                error!(kind = %notification.kind, body, "{}", notification.title);
            }
        }
    }

    fn request_model_settings(&self) {
        warn!("Model settings requested");
    }
}

/// A collecting notifier for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    notifications: parking_lot::RwLock<Vec<Notification>>,
    settings_requests: std::sync::atomic::AtomicUsize,
}

impl CollectingNotifier {
    /// Creates a new collecting notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected notifications.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().clone()
    }

    /// Returns notifications of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.notifications
            .read()
            .iter()
            .filter(|n| n.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of times model settings were requested.
    #[must_use]
    pub fn settings_requests(&self) -> usize {
        self.settings_requests
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Clears everything collected so far.
    pub fn clear(&self) {
        self.notifications.write().clear();
        self.settings_requests
            .store(0, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.write().push(notification);
    }

    fn request_model_settings(&self) {
        self.settings_requests
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}
