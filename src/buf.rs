//! Cache buffers as the block layer sees them.
//!
//! The buffer cache proper lives elsewhere in the kernel; it hands out
//! `Arc<Buffer>`s. This module owns the per-buffer lock protocol: a buffer
//! is locked for the whole life of a queued request, and tasks that need it
//! sleep on the buffer's wait queue until completion unlocks it.

use crate::{
    dev::Dev,
    sync::{Scheduler, WaitQueue},
    BLOCK_SIZE,
};

pub struct Buffer {
    dev: Dev,
    block: u64,
    wait: WaitQueue,
    inner: spin::Mutex<BufferInner>,
}

struct BufferInner {
    locked: bool,
    dirty: bool,
    uptodate: bool,
    data: [u8; BLOCK_SIZE],
}

impl Buffer {
    pub fn new(dev: Dev, block: u64) -> Buffer {
        Buffer {
            dev,
            block,
            wait: WaitQueue::new(),
            inner: spin::Mutex::new(BufferInner {
                locked: false,
                dirty: false,
                uptodate: false,
                data: [0; BLOCK_SIZE],
            }),
        }
    }

    pub fn dev(&self) -> Dev {
        self.dev
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    /// Acquire the buffer lock, sleeping while another task holds it.
    pub fn lock(&self, sched: &dyn Scheduler) {
        loop {
            let mut inner = self.inner.lock();
            if !inner.locked {
                inner.locked = true;
                return;
            }
            let task = sched.current();
            self.wait.register(task);
            drop(inner);
            sched.block(task);
        }
    }

    /// Release the buffer lock and wake everyone sleeping on it.
    ///
    /// Unlocking an unlocked buffer is tolerated with a warning, matching
    /// how completion paths have always treated it.
    pub fn unlock(&self, sched: &dyn Scheduler) {
        let mut inner = self.inner.lock();
        if !inner.locked {
            log::warn!(
                "unlocking unlocked buffer (dev {:#06x}, block {})",
                self.dev.raw(),
                self.block
            );
        }
        inner.locked = false;
        drop(inner);
        self.wait.wake_all(sched);
    }

    /// Sleep until the buffer is unlocked, without acquiring it.
    pub fn wait_unlocked(&self, sched: &dyn Scheduler) {
        loop {
            let inner = self.inner.lock();
            if !inner.locked {
                return;
            }
            let task = sched.current();
            self.wait.register(task);
            drop(inner);
            sched.block(task);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().locked
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    pub fn is_uptodate(&self) -> bool {
        self.inner.lock().uptodate
    }

    /// Mark the contents modified relative to the device.
    pub fn mark_dirty(&self) {
        self.inner.lock().dirty = true;
    }

    pub(crate) fn clear_dirty(&self) {
        self.inner.lock().dirty = false;
    }

    pub(crate) fn set_uptodate(&self, uptodate: bool) {
        self.inner.lock().uptodate = uptodate;
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&[u8; BLOCK_SIZE]) -> R) -> R {
        f(&self.inner.lock().data)
    }

    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8; BLOCK_SIZE]) -> R) -> R {
        f(&mut self.inner.lock().data)
    }
}
