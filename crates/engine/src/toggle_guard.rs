use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// At most one in-flight write per key for one client session.
///
/// A second toggle for a key that is already in flight is refused rather
/// than queued; callers report it as busy.
#[derive(Clone)]
pub struct ToggleGuard<K> {
    in_flight: Arc<Mutex<HashSet<K>>>,
}

impl<K> Default for ToggleGuard<K> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> ToggleGuard<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: K) -> Option<TogglePermit<K>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(TogglePermit {
            in_flight: Arc::clone(&self.in_flight),
            key,
        })
    }

    pub fn is_busy(&self, key: &K) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(key)
    }
}

/// Releases the key on drop, including when the owning task panics or is aborted.
pub struct TogglePermit<K: Eq + Hash> {
    in_flight: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K: Eq + Hash> Drop for TogglePermit<K> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.key);
    }
}
