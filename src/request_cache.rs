use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Process-scoped keyed cache shared between the scheduled jobs that fill it
/// and the code paths that read it.
#[derive(Debug, Clone)]
pub struct RequestCache<T> {
    map: Arc<RwLock<HashMap<String, Arc<T>>>>,
}

impl<T> Default for RequestCache<T> {
    fn default() -> Self {
        Self {
            map: Arc::<RwLock<HashMap<String, Arc<T>>>>::default(),
        }
    }
}

impl<T> RequestCache<T> {
    pub fn new() -> RequestCache<T> {
        RequestCache::default()
    }

    pub fn get<S>(&self, key: S) -> Option<Arc<T>>
    where
        S: Into<String>,
    {
        let key: String = key.into();
        let map = self.map.read().expect("RWLock should never be poisoned");
        map.get(&key).cloned()
    }

    /// Stores a value that stays until it is replaced.
    pub fn insert<S>(&self, key: S, value: T)
    where
        S: Into<String>,
    {
        self.map
            .write()
            .expect("RWLock should never be poisoned")
            .insert(key.into(), Arc::new(value));
    }
}
