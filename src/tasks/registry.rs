use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::RandomState;
use uuid::Uuid;

use crate::tasks::{Task, TaskEntry};

type Entries = HashMap<String, Arc<TaskEntry>, RandomState>;

/// In-flight tasks keyed by the daemon job identifier they were submitted as.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    entries: Arc<RwLock<Entries>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().expect("RWLock should never be poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().expect("RWLock should never be poisoned")
    }

    /// Registers a new task, replacing any stale entry for the same job.
    pub(crate) fn insert(&self, gid: &str, item_id: Uuid) -> (Arc<TaskEntry>, Task) {
        let entry = Arc::new(TaskEntry::new(gid.to_owned(), item_id));
        let task = entry.handle();
        self.write().insert(gid.to_owned(), entry.clone());
        (entry, task)
    }

    pub(crate) fn entry(&self, gid: &str) -> Option<Arc<TaskEntry>> {
        self.read().get(gid).cloned()
    }

    pub(crate) fn remove(&self, gid: &str) -> Option<Arc<TaskEntry>> {
        self.write().remove(gid)
    }

    pub fn get(&self, gid: &str) -> Option<Task> {
        self.read().get(gid).map(TaskEntry::handle)
    }

    pub fn find_by_item(&self, item_id: Uuid) -> Option<Task> {
        self.read()
            .values()
            .find(|entry| entry.item_id() == item_id)
            .map(TaskEntry::handle)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
