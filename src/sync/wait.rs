//! Wait queues and the scheduler seam.
//!
//! The block layer never parks a task itself. It records who is waiting in a
//! [`WaitQueue`] and defers the actual context switch to the kernel's
//! scheduler through the [`Scheduler`] trait.

use crate::NR_TASKS;
use arrayvec::ArrayVec;
use spin::Mutex;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct TaskId(pub usize);

/// Scheduler operations the block layer needs.
///
/// `block` must honor wake permits: a `wake` delivered after the task
/// registered on a wait queue but before it called `block` makes `block`
/// return immediately instead of parking forever. All waits are
/// uninterruptible.
pub trait Scheduler: Send + Sync {
    fn current(&self) -> TaskId;
    fn block(&self, task: TaskId);
    fn wake(&self, task: TaskId);
}

/// A list of tasks waiting for some condition on the owning structure.
///
/// Callers register while still holding the lock that guards the condition,
/// drop the lock, then block. Registration before the lock is dropped is
/// what closes the lost-wakeup window.
pub struct WaitQueue {
    waiters: Mutex<ArrayVec<TaskId, NR_TASKS>>,
}

impl WaitQueue {
    pub const fn new() -> WaitQueue {
        WaitQueue {
            waiters: Mutex::new(ArrayVec::new_const()),
        }
    }

    /// Add `task` to the queue. Idempotent.
    pub fn register(&self, task: TaskId) {
        let mut waiters = self.waiters.lock();
        if !waiters.contains(&task) {
            waiters.push(task);
        }
    }

    /// Wake every registered task and empty the queue.
    pub fn wake_all(&self, sched: &dyn Scheduler) {
        let woken: ArrayVec<TaskId, NR_TASKS> = self.waiters.lock().drain(..).collect();
        for task in woken {
            sched.wake(task);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

impl Default for WaitQueue {
    fn default() -> WaitQueue {
        WaitQueue::new()
    }
}
