//! Approximate online/offline state derived from request outcomes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Listener, Subscription};

struct Inner {
    online: bool,
    listeners: HashMap<u64, Listener>,
    next_id: u64,
}

/// Whether the last network attempt reached the server.
///
/// Subscribers only hear about actual transitions; setting the current value
/// again is a no-op.
pub struct ConnectivityState {
    inner: Arc<Mutex<Inner>>,
    /// Held across write and dispatch so subscribers see transitions in order.
    notify: Mutex<()>,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                online: true,
                listeners: HashMap::new(),
                next_id: 0,
            })),
            notify: Mutex::new(()),
        }
    }
}

impl ConnectivityState {
    /// Create a state that starts online.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Record the connectivity observed by a request.
    ///
    /// Transitions are dispatched in the order they were written. Subscribers
    /// may call `is_online` but must not call `set_online`.
    pub fn set_online(&self, online: bool) {
        let _order = self.notify.lock().unwrap_or_else(PoisonError::into_inner);
        let listeners: Vec<Listener> = {
            let mut inner = self.lock();
            if inner.online == online {
                return;
            }
            inner.online = online;
            inner.listeners.values().map(Arc::clone).collect()
        };

        if online {
            log::info!("Connectivity restored");
        } else {
            log::warn!("Network appears offline");
        }
        for listener in listeners {
            listener(online);
        }
    }

    /// Register a callback for online/offline transitions.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.insert(id, Arc::new(callback));
            id
        };

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .listeners
                    .remove(&id);
            }
        })
    }
}
