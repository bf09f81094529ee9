//! Per-key loading flags for UI progress indicators.
//!
//! Keys are opaque strings chosen by callers. A flag stays in the map at
//! `false` once its request completes; `reset()` clears flags but keeps
//! subscribers attached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Listener, Subscription};

#[derive(Default)]
struct Inner {
    flags: HashMap<String, bool>,
    listeners: HashMap<String, Vec<(u64, Listener)>>,
    next_id: u64,
}

/// Registry of in-flight flags keyed by loading key.
///
/// Concurrent requests sharing a key are not reference counted: the last
/// writer for a key wins.
#[derive(Default)]
pub struct LoadingRegistry {
    inner: Arc<Mutex<Inner>>,
    /// Held across write and dispatch so subscribers see updates in write order.
    notify: Mutex<()>,
}

impl LoadingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the flag for `key` and notify every subscriber of that key.
    ///
    /// Concurrent updates are serialized end to end: the last notification a
    /// subscriber receives always matches the stored flag. Subscribers run
    /// with the data lock released, so they may query the registry, but must
    /// not call `set_loading` themselves.
    pub fn set_loading(&self, key: &str, loading: bool) {
        let _order = self.notify.lock().unwrap_or_else(PoisonError::into_inner);
        let listeners: Vec<Listener> = {
            let mut inner = self.lock();
            inner.flags.insert(key.to_string(), loading);
            inner
                .listeners
                .get(key)
                .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default()
        };

        log::trace!("loading[{}] = {}", key, loading);
        for listener in listeners {
            listener(loading);
        }
    }

    /// Current flag for `key`; unknown keys read as `false`.
    pub fn is_loading(&self, key: &str) -> bool {
        self.lock().flags.get(key).copied().unwrap_or(false)
    }

    pub fn is_any_loading(&self) -> bool {
        self.lock().flags.values().any(|&v| v)
    }

    /// Keys whose flag is currently `true`, sorted for stable output.
    pub fn loading_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .flags
            .iter()
            .filter(|&(_, &v)| v)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Register a callback for changes to `key`.
    ///
    /// The returned [`Subscription`] removes exactly this callback when
    /// `unsubscribe()` is called. Dropping it without calling `unsubscribe()`
    /// leaves the callback registered.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .listeners
                .entry(key.to_string())
                .or_default()
                .push((id, Arc::new(callback)));
            id
        };

        let weak = Arc::downgrade(&self.inner);
        let key = key.to_string();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(list) = inner.listeners.get_mut(&key) {
                    list.retain(|(lid, _)| *lid != id);
                    if list.is_empty() {
                        inner.listeners.remove(&key);
                    }
                }
            }
        })
    }

    /// Clear every flag. Subscriptions are kept and not notified.
    pub fn reset(&self) {
        self.lock().flags.clear();
    }

    #[cfg(test)]
    fn listener_count(&self, key: &str) -> usize {
        self.lock().listeners.get(key).map_or(0, Vec::len)
    }
}

/// Marks a key as loading for as long as the guard is alive.
///
/// Dropping the guard clears the flag, so every exit path of the owning
/// future (success, error, panic, cancellation) leaves the key at `false`.
pub struct LoadingGuard {
    registry: Arc<LoadingRegistry>,
    key: Option<String>,
}

impl LoadingGuard {
    pub fn acquire(registry: &Arc<LoadingRegistry>, key: Option<&str>) -> Self {
        if let Some(k) = key {
            registry.set_loading(k, true);
        }
        Self {
            registry: Arc::clone(registry),
            key: key.map(str::to_string),
        }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        if let Some(ref key) = self.key {
            self.registry.set_loading(key, false);
        }
    }
}
