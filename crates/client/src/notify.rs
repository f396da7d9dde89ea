//! Toast-style user notifications.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Default,
    Destructive,
}

/// A transient message for the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub variant: Variant,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(title: impl Into<String>, description: impl Into<String>, variant: Variant) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            variant,
            created_at: Utc::now(),
        }
    }

    pub fn destructive(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, Variant::Destructive)
    }
}

/// Sink for user-visible notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Default number of toasts kept before the oldest is dropped.
pub const DEFAULT_TOAST_CAPACITY: usize = 20;

/// Bounded in-memory queue the page layer drains to render toasts.
#[derive(Debug, Clone)]
pub struct ToastQueue {
    inner: Arc<Mutex<VecDeque<Notification>>>,
    capacity: usize,
}

impl ToastQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOAST_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Notification>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take every pending notification, oldest first.
    pub fn drain(&self) -> Vec<Notification> {
        self.queue().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for ToastQueue {
    fn notify(&self, notification: Notification) {
        match notification.variant {
            Variant::Destructive => crate::log_warn!(
                "{}: {}",
                notification.title,
                notification.description
            ),
            Variant::Default => crate::log_info!(
                "{}: {}",
                notification.title,
                notification.description
            ),
        }

        let mut queue = self.queue();
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(notification);
    }
}
