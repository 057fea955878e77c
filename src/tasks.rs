use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, watch, Mutex, MutexGuard};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::models::FileRecord;

pub use dispatcher::Dispatcher;
pub use registry::TaskRegistry;

pub mod dispatcher;
pub mod registry;

const EVENT_CAPACITY: usize = 16;

/// Lifecycle of one tracked transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending,
    Paused,
    Completed(Arc<Vec<FileRecord>>),
    Failed(Option<String>),
    /// Stopped on the daemon side or cancelled by the service.
    Stopped,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_) | Self::Stopped)
    }
}

#[derive(Debug, Clone)]
pub enum TaskEvent {
    Start,
    Pause,
    Complete(Arc<Vec<FileRecord>>),
    Failed(Box<aria2::Status>),
    Stop(Box<aria2::Status>),
}

/// Registry-owned half of a task. Dropping it closes every subscriber stream.
#[derive(Debug)]
pub(crate) struct TaskEntry {
    gid: String,
    item_id: Uuid,
    state: watch::Sender<TaskState>,
    events: broadcast::Sender<TaskEvent>,
    /// Serializes notifications for this task; `true` once terminal.
    gate: Mutex<bool>,
}

impl TaskEntry {
    fn new(gid: String, item_id: Uuid) -> Self {
        let (state, _) = watch::channel(TaskState::Pending);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gid,
            item_id,
            state,
            events,
            gate: Mutex::new(false),
        }
    }

    pub(crate) fn gid(&self) -> &str {
        &self.gid
    }

    pub(crate) fn item_id(&self) -> Uuid {
        self.item_id
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, bool> {
        self.gate.lock().await
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.send_replace(state);
    }

    pub(crate) fn transition(&self, state: TaskState, event: TaskEvent) {
        self.set_state(state);
        // No listeners is fine.
        let _ = self.events.send(event);
    }

    fn handle(self: &Arc<Self>) -> Task {
        Task {
            gid: self.gid.clone(),
            item_id: self.item_id,
            state: self.state.subscribe(),
            entry: Arc::downgrade(self),
        }
    }
}

/// Caller-facing handle of an in-flight transfer.
///
/// The handle stays valid after the task leaves the registry; it then reports
/// the final state and refuses new subscriptions.
#[derive(Debug, Clone)]
pub struct Task {
    gid: String,
    item_id: Uuid,
    state: watch::Receiver<TaskState>,
    entry: Weak<TaskEntry>,
}

impl Task {
    pub fn gid(&self) -> &str {
        &self.gid
    }

    pub fn item_id(&self) -> Uuid {
        self.item_id
    }

    pub fn state(&self) -> TaskState {
        self.state.borrow().clone()
    }

    /// Event stream of the task, or `None` once it has been removed.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<TaskEvent>> {
        self.entry.upgrade().map(|entry| entry.events.subscribe())
    }

    /// [`Task::subscribe`] as a stream. It ends once the task leaves the
    /// registry; a lagging reader sees an error item and keeps going.
    pub fn events(&self) -> Option<BroadcastStream<TaskEvent>> {
        self.subscribe().map(BroadcastStream::new)
    }

    /// Resolves with the terminal state. A task dropped from the registry
    /// without one counts as stopped.
    pub async fn finished(&self) -> TaskState {
        let mut state = self.state.clone();
        let finished = match state.wait_for(TaskState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => TaskState::Stopped,
        };
        finished
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_finished_resolves_with_terminal_state() {
        let entry = Arc::new(TaskEntry::new("gid".into(), Uuid::new_v4()));
        let task = entry.handle();
        let mut events = task.subscribe().unwrap();

        let waiter = tokio::spawn({
            let task = task.clone();
            async move { task.finished().await }
        });
        entry.transition(TaskState::Paused, TaskEvent::Pause);
        entry.transition(
            TaskState::Failed(Some("boom".into())),
            TaskEvent::Failed(Box::default()),
        );

        let state = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, TaskState::Failed(Some("boom".into())));
        assert!(matches!(events.recv().await.unwrap(), TaskEvent::Pause));
    }

    #[tokio::test]
    async fn test_event_stream_ends_with_the_entry() {
        use tokio_stream::StreamExt;

        let entry = Arc::new(TaskEntry::new("gid".into(), Uuid::new_v4()));
        let task = entry.handle();
        let events = task.events().unwrap();
        entry.transition(TaskState::Pending, TaskEvent::Start);
        entry.transition(TaskState::Stopped, TaskEvent::Stop(Box::default()));
        drop(entry);

        let events: Vec<_> = events.collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(TaskEvent::Start)));
        assert!(matches!(events[1], Ok(TaskEvent::Stop(_))));
    }

    #[tokio::test]
    async fn test_dropped_entry_closes_streams() {
        let entry = Arc::new(TaskEntry::new("gid".into(), Uuid::new_v4()));
        let task = entry.handle();
        let mut events = task.subscribe().unwrap();
        drop(entry);

        assert!(task.subscribe().is_none());
        assert!(events.recv().await.is_err());
        assert_eq!(task.finished().await, TaskState::Stopped);
    }
}
