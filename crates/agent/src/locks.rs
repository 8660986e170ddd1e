//! Per-task async locks
//!
//! Turns and settlements for one task run one at a time. An entry lives in
//! the map only while someone holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use bazaar_core::domain::task::TaskId;

type LockMap = HashMap<TaskId, Arc<AsyncMutex<()>>>;

#[derive(Default)]
pub struct TaskLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `task_id`.
    pub async fn lock(&self, task_id: &TaskId) -> TaskLockGuard {
        let lock = {
            let mut locks = lock_map(&self.locks);
            // Waiters cancelled before acquiring leave idle entries behind.
            locks.retain(|id, lock| id == task_id || Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(task_id.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        TaskLockGuard { task_id: task_id.clone(), guard: Some(guard), locks: Arc::clone(&self.locks) }
    }

    /// Tasks currently locked or contended.
    pub fn active(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

pub struct TaskLockGuard {
    task_id: TaskId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for TaskLockGuard {
    fn drop(&mut self) {
        // Release under the map lock so no new waiter can clone the entry
        // between the release and the idle check.
        let mut locks = lock_map(&self.locks);
        drop(self.guard.take());
        let idle = locks.get(&self.task_id).is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.task_id);
        }
    }
}

fn lock_map(locks: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}
