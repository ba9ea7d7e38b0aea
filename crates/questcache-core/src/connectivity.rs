//! Online/offline signal fed by the host environment.
//!
//! "Online" is only what the host reports. It says nothing about whether the
//! remote API is actually reachable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;

type Callback = Arc<dyn Fn() + Send + Sync>;

struct Listener {
    on_online: Callback,
    on_offline: Callback,
}

struct Inner {
    state: watch::Sender<bool>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
}

/// Shared connectivity state. Clones observe and drive the same signal.
#[derive(Clone)]
pub struct Connectivity {
    inner: Arc<Inner>,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connectivity")
            .field("online", &self.is_online())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            inner: Arc::new(Inner {
                state,
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Record a connectivity signal from the host. Listeners run only when
    /// the state actually changes.
    pub fn set_online(&self, online: bool) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return;
        }

        info!(online, "Connectivity changed");
        // Callbacks run outside the lock so they may register or drop listeners
        let callbacks: Vec<Callback> = self
            .inner
            .listeners
            .lock()
            .values()
            .map(|l| {
                if online {
                    Arc::clone(&l.on_online)
                } else {
                    Arc::clone(&l.on_offline)
                }
            })
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    /// Register transition callbacks. They stay registered until the returned
    /// `Subscription` is dropped.
    #[must_use = "dropping the subscription unregisters the listeners"]
    pub fn on_change<F, G>(&self, on_online: F, on_offline: G) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
        G: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(
            id,
            Listener {
                on_online: Arc::new(on_online),
                on_offline: Arc::new(on_offline),
            },
        );
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Async view of the online flag, for tasks that wait on transitions.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

/// Registration handle returned by `Connectivity::on_change`.
#[derive(Debug)]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.lock().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_callbacks_fire_on_transitions_only() {
        let connectivity = Connectivity::new(true);
        let (online, on_online) = counter();
        let (offline, on_offline) = counter();
        let _sub = connectivity.on_change(on_online, on_offline);

        connectivity.set_online(true); // no change
        assert_eq!(online.load(Ordering::SeqCst), 0);

        connectivity.set_online(false);
        connectivity.set_online(false);
        assert_eq!(offline.load(Ordering::SeqCst), 1);
        assert!(!connectivity.is_online());

        connectivity.set_online(true);
        assert_eq!(online.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multiple_listeners() {
        let connectivity = Connectivity::new(false);
        let (first, on_first) = counter();
        let (second, on_second) = counter();
        let _a = connectivity.on_change(on_first, || {});
        let _b = connectivity.on_change(on_second, || {});
        assert_eq!(connectivity.listener_count(), 2);

        connectivity.set_online(true);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_subscription_stops_firing() {
        let connectivity = Connectivity::new(true);
        let (offline, on_offline) = counter();
        let sub = connectivity.on_change(|| {}, on_offline);
        sub.unsubscribe();
        assert_eq!(connectivity.listener_count(), 0);

        connectivity.set_online(false);
        assert_eq!(offline.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_outliving_connectivity() {
        let connectivity = Connectivity::new(true);
        let sub = connectivity.on_change(|| {}, || {});
        drop(connectivity);
        drop(sub);
    }

    #[tokio::test]
    async fn test_watch_sees_transition() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.watch();
        connectivity.set_online(true);
        rx.changed().await.expect("sender alive");
        assert!(*rx.borrow());
    }
}
