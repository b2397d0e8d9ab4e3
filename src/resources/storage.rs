//! Path-keyed resource storage.
//!
//! Every resource kind lives in one [`ResourceStorage`]: a thread-safe map
//! from path to `Loading | Ready | Failed`. Instead of observer callbacks,
//! the storage bumps a generation counter on every state change; runtimes
//! cache `(Arc, generation)` pairs and compare each tick, tearing down and
//! lazily re-initializing when the generation moves (hot reload, load
//! failure).

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Load state of one resource entry.
#[derive(Debug)]
pub enum ResourceState<T> {
    Loading,
    Ready(Arc<T>),
    Failed,
}

impl<T> Clone for ResourceState<T> {
    fn clone(&self) -> Self {
        match self {
            ResourceState::Loading => ResourceState::Loading,
            ResourceState::Ready(value) => ResourceState::Ready(Arc::clone(value)),
            ResourceState::Failed => ResourceState::Failed,
        }
    }
}

impl<T> ResourceState<T> {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, ResourceState::Ready(_))
    }
}

struct StorageInner<T> {
    entries: FxHashMap<String, ResourceState<T>>,
    generation: u64,
}

impl<T> Default for StorageInner<T> {
    fn default() -> Self {
        Self {
            entries: FxHashMap::default(),
            generation: 0,
        }
    }
}

/// Thread-safe, path-keyed container of one resource kind.
pub struct ResourceStorage<T> {
    inner: RwLock<StorageInner<T>>,
}

impl<T> Default for ResourceStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResourceStorage<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::default(),
        }
    }

    /// Monotonically increasing counter, bumped on every state change.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.inner.read().entries.contains_key(path)
    }

    /// Ready value, `None` while loading/failed/absent.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Arc<T>> {
        match self.inner.read().entries.get(path) {
            Some(ResourceState::Ready(value)) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    #[must_use]
    pub fn state(&self, path: &str) -> Option<ResourceState<T>> {
        self.inner.read().entries.get(path).cloned()
    }

    #[must_use]
    pub fn is_ready(&self, path: &str) -> bool {
        matches!(
            self.inner.read().entries.get(path),
            Some(ResourceState::Ready(_))
        )
    }

    #[must_use]
    pub fn is_failed(&self, path: &str) -> bool {
        matches!(
            self.inner.read().entries.get(path),
            Some(ResourceState::Failed)
        )
    }

    /// Marks a path as loading. Returns `false` if an entry already exists
    /// (load already requested or finished).
    pub fn begin_load(&self, path: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.entries.contains_key(path) {
            return false;
        }
        inner.entries.insert(path.to_string(), ResourceState::Loading);
        inner.generation += 1;
        true
    }

    /// Direct injection of a ready value, used by tests and procedural
    /// content.
    pub fn insert_ready(&self, path: &str, value: T) -> Arc<T> {
        let value = Arc::new(value);
        let mut inner = self.inner.write();
        inner
            .entries
            .insert(path.to_string(), ResourceState::Ready(Arc::clone(&value)));
        inner.generation += 1;
        value
    }

    pub fn set_ready(&self, path: &str, value: Arc<T>) {
        let mut inner = self.inner.write();
        inner
            .entries
            .insert(path.to_string(), ResourceState::Ready(value));
        inner.generation += 1;
    }

    pub fn set_failed(&self, path: &str) {
        let mut inner = self.inner.write();
        inner
            .entries
            .insert(path.to_string(), ResourceState::Failed);
        inner.generation += 1;
    }

    /// Flips an entry back to `Loading` for hot reload. No-op for unknown
    /// paths.
    pub fn invalidate(&self, path: &str) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.entries.get_mut(path) {
            *entry = ResourceState::Loading;
            inner.generation += 1;
        }
    }

    pub fn remove(&self, path: &str) {
        let mut inner = self.inner.write();
        if inner.entries.remove(path).is_some() {
            inner.generation += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_bumps_on_state_changes() {
        let storage: ResourceStorage<u32> = ResourceStorage::new();
        let g0 = storage.generation();
        storage.begin_load("a");
        let g1 = storage.generation();
        assert!(g1 > g0);
        storage.insert_ready("a", 7);
        assert!(storage.generation() > g1);
        assert_eq!(*storage.get("a").unwrap(), 7);
    }

    #[test]
    fn invalidate_hides_ready_value() {
        let storage: ResourceStorage<u32> = ResourceStorage::new();
        storage.insert_ready("a", 1);
        storage.invalidate("a");
        assert!(storage.get("a").is_none());
        assert!(!storage.is_ready("a"));
    }
}
