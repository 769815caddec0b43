//! User-facing notices.
//!
//! The service has no UI of its own; notices are published as events on a
//! broadcast channel and whoever renders them subscribes.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 64;

pub type NotificationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Progress,
    Success,
    Error,
    Reminder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum NotificationEvent {
    Shown {
        id: NotificationId,
        message: String,
        kind: NotificationKind,
    },
    Cleared {
        id: NotificationId,
    },
}

struct Inner {
    events: broadcast::Sender<NotificationEvent>,
    next_id: AtomicU64,
    /// Progress notice currently on screen
    progress: Mutex<Option<NotificationId>>,
    dismiss_after: Duration,
}

/// Cheap to clone; all clones publish to the same subscribers
#[derive(Clone)]
pub struct NotificationReporter {
    inner: Arc<Inner>,
}

impl NotificationReporter {
    pub fn new(dismiss_after: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                events,
                next_id: AtomicU64::new(1),
                progress: Mutex::new(None),
                dismiss_after,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.inner.events.subscribe()
    }

    fn publish(&self, event: NotificationEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn take_progress(&self) -> Option<NotificationId> {
        self.inner
            .progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Show a notice. Replaces any progress notice on screen; non-progress
    /// notices clear themselves after the dismiss delay.
    pub fn notify(&self, message: impl Into<String>, kind: NotificationKind) -> NotificationId {
        let message = message.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);

        if let Some(previous) = self.take_progress() {
            self.publish(NotificationEvent::Cleared { id: previous });
        }

        info!("Notice [{:?}]: {}", kind, message);
        self.publish(NotificationEvent::Shown { id, message, kind });

        if kind == NotificationKind::Progress {
            *self
                .inner
                .progress
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(id);
        } else if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let reporter = self.clone();
            let delay = self.inner.dismiss_after;
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                reporter.publish(NotificationEvent::Cleared { id });
            });
        } else {
            debug!("No runtime; notice {} will not auto-dismiss", id);
        }

        id
    }

    /// Remove a notice before its timer fires
    pub fn clear(&self, id: NotificationId) {
        let mut progress = self
            .inner
            .progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *progress == Some(id) {
            *progress = None;
        }
        drop(progress);
        self.publish(NotificationEvent::Cleared { id });
    }
}

impl Default for NotificationReporter {
    fn default() -> Self {
        Self::new(Duration::from_millis(3000))
    }
}
