use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const TOAST_TTL: Duration = Duration::from_secs(5);
const EXPIRY_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Info,
}

/// Fire-and-forget sink for user-facing messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, kind: NotificationKind);

    fn success(&self, message: &str) {
        self.notify(message, NotificationKind::Success);
    }

    fn error(&self, message: &str) {
        self.notify(message, NotificationKind::Error);
    }

    fn info(&self, message: &str) {
        self.notify(message, NotificationKind::Info);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Toast {
    pub id: u64,
    pub message: String,
    pub kind: NotificationKind,
    #[serde(skip)]
    expires_at: Instant,
}

/// Change to the visible toast set, as seen by subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ToastEvent {
    Shown(Toast),
    Dismissed { id: u64 },
}

/// In-app toast queue. Toasts expire after [`TOAST_TTL`] or on dismissal.
/// Expired entries are pruned whenever the queue is touched, and by the
/// task from [`ToastQueue::spawn_expiry`], which is what announces them.
pub struct ToastQueue {
    toasts: Mutex<Vec<Toast>>,
    next_id: AtomicU64,
    ttl: Duration,
    sender: broadcast::Sender<ToastEvent>,
}

impl ToastQueue {
    pub fn new() -> Self {
        Self::with_ttl(TOAST_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            toasts: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            ttl,
            sender,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToastEvent> {
        self.sender.subscribe()
    }

    /// Periodically expires due toasts until the queue is dropped. Must be
    /// called inside a Tokio runtime.
    pub fn spawn_expiry(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(EXPIRY_TICK);
            loop {
                ticks.tick().await;
                let Some(live) = queue.upgrade() else {
                    break;
                };
                live.expire_at(Instant::now());
            }
        })
    }

    pub fn push(&self, message: &str, kind: NotificationKind) -> u64 {
        let now = Instant::now();
        let toast = Toast {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            message: message.to_string(),
            kind,
            expires_at: now + self.ttl,
        };

        match kind {
            NotificationKind::Error => log::warn!("[toast] {message}"),
            _ => log::info!("[toast] {message}"),
        }

        let id = toast.id;
        self.expire_at(now);
        self.toasts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(toast.clone());
        self.announce(ToastEvent::Shown(toast));
        id
    }

    pub fn dismiss(&self, id: u64) -> bool {
        let mut toasts = self.toasts.lock().unwrap_or_else(|e| e.into_inner());
        let before = toasts.len();
        toasts.retain(|toast| toast.id != id);
        let removed = toasts.len() != before;
        drop(toasts);

        if removed {
            self.announce(ToastEvent::Dismissed { id });
        }
        removed
    }

    pub fn active(&self) -> Vec<Toast> {
        self.expire_at(Instant::now());
        self.toasts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drops toasts due at `now` and announces each one.
    fn expire_at(&self, now: Instant) -> Vec<u64> {
        let mut toasts = self.toasts.lock().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<u64> = toasts
            .iter()
            .filter(|toast| toast.expires_at <= now)
            .map(|toast| toast.id)
            .collect();
        toasts.retain(|toast| toast.expires_at > now);
        drop(toasts);

        for &id in &expired {
            self.announce(ToastEvent::Dismissed { id });
        }
        expired
    }

    fn announce(&self, event: ToastEvent) {
        // No listeners is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for ToastQueue {
    fn notify(&self, message: &str, kind: NotificationKind) {
        self.push(message, kind);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Captures every notification for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub messages: Mutex<Vec<(String, NotificationKind)>>,
    }

    impl RecordingNotifier {
        pub fn messages(&self) -> Vec<(String, NotificationKind)> {
            self.messages.lock().unwrap().clone()
        }

        pub fn texts(&self) -> Vec<String> {
            self.messages().into_iter().map(|(text, _)| text).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str, kind: NotificationKind) {
            self.messages.lock().unwrap().push((message.to_string(), kind));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toasts_coexist_in_insertion_order() {
        let queue = ToastQueue::new();
        queue.success("one");
        queue.error("two");
        queue.info("three");

        let active = queue.active();
        let messages: Vec<_> = active.iter().map(|toast| toast.message.as_str()).collect();
        assert_eq!(messages, ["one", "two", "three"]);
        assert_eq!(active[1].kind, NotificationKind::Error);
        assert_ne!(active[0].id, active[1].id);
    }

    #[test]
    fn dismiss_removes_only_the_given_toast() {
        let queue = ToastQueue::new();
        let first = queue.push("first", NotificationKind::Info);
        queue.push("second", NotificationKind::Info);

        assert!(queue.dismiss(first));
        assert!(!queue.dismiss(first));
        let remaining = queue.active();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "second");
    }

    #[test]
    fn toasts_expire_after_ttl() {
        let queue = ToastQueue::new();
        queue.push("short lived", NotificationKind::Success);

        assert_eq!(queue.active().len(), 1);
        queue.expire_at(Instant::now() + TOAST_TTL);
        assert!(queue.active().is_empty());
    }

    #[test]
    fn dismissal_and_expiry_are_announced() {
        let queue = ToastQueue::new();
        let kept = queue.push("kept", NotificationKind::Info);
        let mut receiver = queue.subscribe();

        let dismissed = queue.push("dismissed", NotificationKind::Info);
        assert!(queue.dismiss(dismissed));
        assert!(matches!(receiver.try_recv(), Ok(ToastEvent::Shown(toast)) if toast.id == dismissed));
        assert!(matches!(receiver.try_recv(), Ok(ToastEvent::Dismissed { id }) if id == dismissed));

        assert_eq!(queue.expire_at(Instant::now() + TOAST_TTL), [kept]);
        assert!(matches!(receiver.try_recv(), Ok(ToastEvent::Dismissed { id }) if id == kept));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn expiry_task_announces_auto_dismissal() {
        let queue = Arc::new(ToastQueue::with_ttl(Duration::from_millis(20)));
        let mut receiver = queue.subscribe();
        let expiry = queue.spawn_expiry();

        let id = queue.push("fleeting", NotificationKind::Success);
        assert!(matches!(receiver.recv().await, Ok(ToastEvent::Shown(_))));

        let event = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .unwrap();
        assert!(matches!(event, Ok(ToastEvent::Dismissed { id: expired }) if expired == id));
        assert!(queue.active().is_empty());

        drop(queue);
        tokio::time::timeout(Duration::from_secs(2), expiry)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn subscribers_receive_new_toasts() {
        let queue = ToastQueue::new();
        let mut receiver = queue.subscribe();
        queue.success("saved");

        let Ok(ToastEvent::Shown(toast)) = receiver.try_recv() else {
            panic!("expected a shown toast");
        };
        assert_eq!(toast.message, "saved");
        assert_eq!(toast.kind, NotificationKind::Success);
    }
}
