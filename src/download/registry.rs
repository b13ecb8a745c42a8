//! Observable registry of transfer tasks

use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use log::{debug, info, warn};
use range_dl::{CancellationToken, Strategy};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::watch;

use super::types::{percent_of, RemoteFileRef, TaskId, TaskSnapshot, TaskStatus};

/// Registry-owned state of one transfer
struct TransferTask {
    id: TaskId,
    file: RemoteFileRef,
    status: TaskStatus,
    downloaded_bytes: u64,
    total_bytes: u64,
    local_path: Option<PathBuf>,
    error_message: Option<String>,
    strategy: Option<Strategy>,
    created_at: DateTime<Utc>,
    started_at: Option<Instant>,
    cancel: CancellationToken,
}

impl TransferTask {
    fn snapshot(&self) -> TaskSnapshot {
        let speed = match self.started_at {
            Some(started) if self.downloaded_bytes > 0 => {
                let elapsed = started.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.downloaded_bytes as f64 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        TaskSnapshot {
            id: self.id.clone(),
            name: self.file.display_name.clone(),
            mount_id: self.file.mount_id,
            path: self.file.path.clone(),
            status: self.status,
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            percent: percent_of(self.downloaded_bytes, self.total_bytes),
            speed,
            local_path: self.local_path.clone(),
            error_message: self.error_message.clone(),
            strategy: self.strategy.clone(),
            created_at: self.created_at,
        }
    }
}

struct Inner {
    /// Newest first
    tasks: Mutex<Vec<TransferTask>>,
    updates: watch::Sender<Vec<TaskSnapshot>>,
}

/// Single source of truth for transfer state.
///
/// Cloning is cheap; clones share the same task list. Every mutation
/// publishes a fresh snapshot list to observers. Reporting methods never
/// fail: transitions that the state machine forbids are ignored and return
/// `false`.
#[derive(Clone)]
pub struct TransferRegistry {
    inner: Arc<Inner>,
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferRegistry {
    pub fn new() -> Self {
        let (updates, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(Vec::new()),
                updates,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TransferTask>> {
        // recover from poisoning
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, tasks: &[TransferTask]) {
        self.inner
            .updates
            .send_replace(tasks.iter().map(TransferTask::snapshot).collect());
    }

    /// Apply `f` to the task if it exists, publishing when `f` reports a change
    fn update<F>(&self, id: &TaskId, f: F) -> bool
    where
        F: FnOnce(&mut TransferTask) -> bool,
    {
        let mut tasks = self.lock();
        let changed = match tasks.iter_mut().find(|t| &t.id == id) {
            Some(task) => f(task),
            None => false,
        };
        if changed {
            self.publish(&tasks);
        }
        changed
    }

    pub fn register(&self, file: RemoteFileRef) -> TaskId {
        let id = TaskId::generate();
        let mut tasks = self.lock();
        debug!(
            "task_registered: {} mount={} path={}",
            id, file.mount_id, file.path
        );
        tasks.insert(
            0,
            TransferTask {
                id: id.clone(),
                total_bytes: file.declared_size.unwrap_or(0),
                file,
                status: TaskStatus::Pending,
                downloaded_bytes: 0,
                local_path: None,
                error_message: None,
                strategy: None,
                created_at: Utc::now(),
                started_at: None,
                cancel: CancellationToken::new(),
            },
        );
        self.publish(&tasks);
        id
    }

    /// Token fired when the task is canceled
    pub fn cancel_token(&self, id: &TaskId) -> Option<CancellationToken> {
        self.lock()
            .iter()
            .find(|t| &t.id == id)
            .map(|t| t.cancel.clone())
    }

    /// Pending -> Downloading. A task may start only once.
    pub fn start(&self, id: &TaskId) -> bool {
        self.update(id, |task| {
            if task.status != TaskStatus::Pending {
                return false;
            }
            task.status = TaskStatus::Downloading;
            task.started_at = Some(Instant::now());
            true
        })
    }

    /// Record progress; downloaded bytes never go backwards and the total never shrinks
    pub fn report_progress(&self, id: &TaskId, downloaded: u64, total: u64) -> bool {
        self.update(id, |task| {
            if task.status != TaskStatus::Downloading {
                return false;
            }
            let mut changed = false;
            if downloaded > task.downloaded_bytes {
                task.downloaded_bytes = downloaded;
                changed = true;
            }
            if total > task.total_bytes {
                task.total_bytes = total;
                changed = true;
            }
            changed
        })
    }

    /// Downloading -> Completed
    pub fn complete(&self, id: &TaskId, local_path: PathBuf, bytes: u64, strategy: Strategy) -> bool {
        self.update(id, |task| {
            if task.status != TaskStatus::Downloading {
                return false;
            }
            info!(
                "task_completed: {} bytes={} path={}",
                task.id,
                bytes,
                local_path.display()
            );
            task.status = TaskStatus::Completed;
            task.downloaded_bytes = task.downloaded_bytes.max(bytes);
            task.total_bytes = task.total_bytes.max(task.downloaded_bytes);
            task.local_path = Some(local_path);
            task.strategy = Some(strategy);
            true
        })
    }

    /// Pending | Downloading -> Failed
    pub fn fail(&self, id: &TaskId, message: impl Into<String>) -> bool {
        let message = message.into();
        self.update(id, |task| {
            if task.status.is_terminal() {
                return false;
            }
            warn!("task_failed: {} error={}", task.id, message);
            task.status = TaskStatus::Failed;
            task.error_message = Some(message);
            true
        })
    }

    /// Pending | Downloading -> Canceled. Unknown or finished tasks are left alone.
    pub fn cancel(&self, id: &TaskId) -> bool {
        self.update(id, |task| {
            if task.status.is_terminal() {
                return false;
            }
            info!("task_canceled: {} was={}", task.id, task.status);
            task.status = TaskStatus::Canceled;
            task.cancel.cancel();
            true
        })
    }

    pub fn get(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.lock()
            .iter()
            .find(|t| &t.id == id)
            .map(TransferTask::snapshot)
    }

    /// All tasks, newest first
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.lock().iter().map(TransferTask::snapshot).collect()
    }

    /// Drop completed, failed and canceled tasks; returns how many were removed
    pub fn clear_finished(&self) -> usize {
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|t| !t.status.is_terminal());
        let removed = before - tasks.len();
        if removed > 0 {
            self.publish(&tasks);
        }
        removed
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<TaskSnapshot>> {
        self.inner.updates.subscribe()
    }

    /// Stream of task lists: the current list first, then one per change.
    /// A slow observer skips intermediate lists and always sees the latest.
    pub fn observe(&self) -> impl Stream<Item = Vec<TaskSnapshot>> + Send + 'static {
        let rx = self.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let tasks = rx.borrow_and_update().clone();
            Some((tasks, (rx, false)))
        })
    }

    /// Wait until the task reaches a terminal state; `None` if it is unknown or evicted
    pub async fn wait_finished(&self, id: &TaskId) -> Option<TaskSnapshot> {
        let mut rx = self.subscribe();
        loop {
            let current = rx
                .borrow_and_update()
                .iter()
                .find(|t| &t.id == id)
                .cloned();
            match current {
                Some(task) if task.status.is_terminal() => return Some(task),
                Some(_) => {}
                None => return None,
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn file(name: &str) -> RemoteFileRef {
        RemoteFileRef::new(1, format!("docs/{}", name), 1000)
    }

    #[test]
    fn happy_path_transitions() {
        let registry = TransferRegistry::new();
        let id = registry.register(file("a.bin"));
        assert_eq!(registry.get(&id).unwrap().status, TaskStatus::Pending);

        assert!(registry.start(&id));
        assert!(!registry.start(&id));
        assert!(registry.report_progress(&id, 400, 1000));

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Downloading);
        assert_eq!(task.percent, 40);

        assert!(registry.complete(&id, PathBuf::from("/tmp/a.bin"), 1000, Strategy::Sequential));
        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.downloaded_bytes, 1000);
        assert_eq!(task.local_path, Some(PathBuf::from("/tmp/a.bin")));
        assert_eq!(task.strategy, Some(Strategy::Sequential));
        assert_eq!(task.error_message, None);
    }

    #[test]
    fn progress_is_monotonic_and_total_never_shrinks() {
        let registry = TransferRegistry::new();
        let id = registry.register(RemoteFileRef::new(1, "x", 0));
        // ignored before start
        assert!(!registry.report_progress(&id, 10, 100));
        registry.start(&id);

        registry.report_progress(&id, 50, 0);
        assert_eq!(registry.get(&id).unwrap().total_bytes, 0);
        registry.report_progress(&id, 60, 200);
        registry.report_progress(&id, 30, 100);

        let task = registry.get(&id).unwrap();
        assert_eq!(task.downloaded_bytes, 60);
        assert_eq!(task.total_bytes, 200);
    }

    #[test]
    fn canceled_task_never_completes() {
        let registry = TransferRegistry::new();
        let id = registry.register(file("a.bin"));
        registry.start(&id);
        let token = registry.cancel_token(&id).unwrap();

        assert!(registry.cancel(&id));
        assert!(token.is_cancelled());
        assert!(!registry.complete(&id, PathBuf::from("/tmp/a.bin"), 1000, Strategy::Sequential));
        assert!(!registry.fail(&id, "late error"));
        assert!(!registry.report_progress(&id, 999, 1000));

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Canceled);
        assert_eq!(task.local_path, None);
    }

    #[test]
    fn cancel_is_noop_for_unknown_or_finished() {
        let registry = TransferRegistry::new();
        let id = registry.register(file("a.bin"));
        registry.start(&id);
        registry.fail(&id, "HTTP 500");

        assert!(!registry.cancel(&id));
        assert_eq!(registry.get(&id).unwrap().status, TaskStatus::Failed);
        assert_eq!(
            registry.get(&id).unwrap().error_message.as_deref(),
            Some("HTTP 500")
        );

        let unknown = TaskId::generate();
        assert!(!registry.cancel(&unknown));
    }

    #[test]
    fn pending_task_can_be_canceled_and_never_starts() {
        let registry = TransferRegistry::new();
        let id = registry.register(file("a.bin"));
        assert!(registry.cancel(&id));
        assert!(!registry.start(&id));
    }

    #[test]
    fn newest_first_and_clear_finished() {
        let registry = TransferRegistry::new();
        let first = registry.register(file("1"));
        let second = registry.register(file("2"));
        let third = registry.register(file("3"));

        let ids: Vec<TaskId> = registry.snapshot().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![third.clone(), second.clone(), first.clone()]);

        registry.start(&first);
        registry.complete(&first, PathBuf::from("/tmp/1"), 1000, Strategy::Sequential);
        registry.cancel(&second);

        assert_eq!(registry.clear_finished(), 2);
        let remaining: Vec<TaskId> = registry.snapshot().into_iter().map(|t| t.id).collect();
        assert_eq!(remaining, vec![third]);
        assert!(registry.get(&first).is_none());
    }

    #[tokio::test]
    async fn observe_yields_current_then_changes() {
        let registry = TransferRegistry::new();
        let mut updates = Box::pin(registry.observe());
        assert!(updates.next().await.unwrap().is_empty());

        let id = registry.register(file("a.bin"));
        let tasks = updates.next().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, id);
        assert_eq!(tasks[0].status, TaskStatus::Pending);

        registry.start(&id);
        let tasks = updates.next().await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Downloading);
    }

    #[tokio::test]
    async fn wait_finished_returns_terminal_snapshot() {
        let registry = TransferRegistry::new();
        let id = registry.register(file("a.bin"));

        let waiter = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.wait_finished(&id).await })
        };
        registry.start(&id);
        registry.report_progress(&id, 10, 1000);
        registry.fail(&id, "boom");

        let task = waiter.await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(registry.wait_finished(&TaskId::generate()).await.is_none());
    }
}
