use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashSet;

/// Keys with an outstanding request. Acquiring a key already in flight fails.
#[derive(Debug)]
pub struct InFlight<K: Eq + Hash + Clone> {
    keys: Arc<DashSet<K>>,
}

impl<K: Eq + Hash + Clone> Clone for InFlight<K> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for InFlight<K> {
    fn default() -> Self {
        Self {
            keys: Arc::new(DashSet::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> InFlight<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: K) -> Option<InFlightGuard<K>> {
        if self.keys.insert(key.clone()) {
            Some(InFlightGuard {
                keys: self.keys.clone(),
                key,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct InFlightGuard<K: Eq + Hash + Clone> {
    keys: Arc<DashSet<K>>,
    key: K,
}

impl<K: Eq + Hash + Clone> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::InFlight;

    #[test]
    fn second_acquire_fails_until_guard_drops() {
        let inflight = InFlight::new();

        let guard = inflight.try_acquire(7u32);
        assert!(guard.is_some());
        assert!(inflight.try_acquire(7).is_none());
        assert!(inflight.try_acquire(8).is_some());

        drop(guard);
        assert!(!inflight.contains(&7));
        assert!(inflight.try_acquire(7).is_some());
    }
}
