use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::events::{Subscribers, Subscription};
use crate::models::Tone;

pub const DEFAULT_TOAST_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub tone: Tone,
    pub expires_at: Instant,
}

/// Transient notifications that dismiss themselves after a fixed delay.
pub struct Toaster {
    ttl: Duration,
    active: Vec<Toast>,
    shown: Subscribers<Toast>,
}

impl Toaster {
    pub fn new(ttl: Duration) -> Self {
        Toaster {
            ttl,
            active: Vec::new(),
            shown: Subscribers::new(),
        }
    }

    pub fn show(&mut self, title: impl Into<String>, message: impl Into<String>, tone: Tone) -> Uuid {
        let toast = Toast {
            id: Uuid::new_v4(),
            title: title.into(),
            message: message.into(),
            tone,
            expires_at: Instant::now() + self.ttl,
        };
        tracing::debug!(title = %toast.title, tone = tone.as_str(), "toast shown");
        let id = toast.id;
        self.shown.emit(&toast);
        self.active.push(toast);
        id
    }

    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let before = self.active.len();
        self.active.retain(|toast| toast.id != id);
        self.active.len() != before
    }

    /// Removes toasts whose display time has passed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.active.len();
        self.active.retain(|toast| toast.expires_at > now);
        before - self.active.len()
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.active.iter().map(|toast| toast.expires_at).min()
    }

    pub fn active(&self) -> &[Toast] {
        &self.active
    }

    /// Notifies `handler` once for every toast shown from now on.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Toast) + Send + Sync + 'static,
    {
        self.shown.subscribe(handler)
    }
}

impl Default for Toaster {
    fn default() -> Self {
        Toaster::new(DEFAULT_TOAST_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn toasts_expire_after_ttl() {
        let mut toaster = Toaster::new(Duration::from_secs(5));
        toaster.show("Dashboard Updated", "refreshed", Tone::Success);
        assert_eq!(toaster.prune(Instant::now()), 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(toaster.prune(Instant::now()), 1);
        assert!(toaster.active().is_empty());
        assert!(toaster.next_expiry().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn one_toast_per_call() {
        let mut toaster = Toaster::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = toaster.subscribe(move |toast| {
            sink.lock().unwrap().push(toast.message.clone());
        });

        toaster.show("Data Loading Error", "db down", Tone::Danger);
        toaster.show("Data Loading Error", "db down", Tone::Danger);

        assert_eq!(toaster.active().len(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["db down", "db down"]);
    }

    #[tokio::test(start_paused = true)]
    async fn dismiss_removes_only_target() {
        let mut toaster = Toaster::default();
        let first = toaster.show("A", "a", Tone::Info);
        toaster.show("B", "b", Tone::Info);
        assert!(toaster.dismiss(first));
        assert!(!toaster.dismiss(first));
        assert_eq!(toaster.active()[0].title, "B");
    }
}
