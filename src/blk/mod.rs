//! The device-independent block layer.
//!
//! One fixed pool of request slots feeds per-device queues ordered by the
//! elevator relation. Drivers register a [`RequestHandler`] per major number
//! and consume their queue head through [`BlockIo::with_current`] and
//! [`BlockIo::end_request`].

pub mod request;

pub use request::Command;

use crate::{
    buf::Buffer,
    dev::Dev,
    sync::{Scheduler, WaitQueue},
    NR_BLK_DEV, NR_REQUEST, SECTORS_PER_BLOCK,
};
use alloc::sync::Arc;
use arrayvec::ArrayVec;
use request::{in_order, Request};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlkError {
    /// No driver registered for the device's major number.
    NoDevice,
}

/// A block-device driver, keyed by major number.
///
/// `handle` is called with the device's queue freshly non-empty; the driver
/// starts the head request and completes it from interrupt context later.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, io: &BlockIo, sched: &dyn Scheduler);
}

struct QueueState {
    pool: [Request; NR_REQUEST],
    /// Head of each per-major queue, as a pool index.
    heads: [Option<usize>; NR_BLK_DEV],
}

pub struct BlockIo {
    queue: spin::Mutex<QueueState>,
    devices: spin::Mutex<[Option<Arc<dyn RequestHandler>>; NR_BLK_DEV]>,
    /// Tasks waiting for a free request slot.
    wait_for_request: WaitQueue,
}

impl BlockIo {
    pub fn new() -> BlockIo {
        BlockIo {
            queue: spin::Mutex::new(QueueState {
                pool: core::array::from_fn(|_| Request::free()),
                heads: [None; NR_BLK_DEV],
            }),
            devices: spin::Mutex::new(core::array::from_fn(|_| None)),
            wait_for_request: WaitQueue::new(),
        }
    }

    /// Install the driver for `major`. Once, at init.
    pub fn register_device(&self, major: u8, handler: Arc<dyn RequestHandler>) {
        assert!((major as usize) < NR_BLK_DEV, "bad major number {major}");
        let mut devices = self.devices.lock();
        if devices[major as usize].is_some() {
            panic!("block device {major} registered twice");
        }
        devices[major as usize] = Some(handler);
    }

    /// Queue a transfer for the buffer's block and start the device if its
    /// queue was idle.
    ///
    /// Read-ahead and write-ahead are best-effort: a busy buffer or a full
    /// pool drops them silently. Plain reads and writes block until a slot
    /// frees up. Writes may only take the low two thirds of the pool so a
    /// flood of them cannot starve reads.
    pub fn submit(
        &self,
        sched: &dyn Scheduler,
        cmd: Command,
        buffer: &Arc<Buffer>,
    ) -> Result<(), BlkError> {
        let major = buffer.dev().major();
        let handler = if (major as usize) < NR_BLK_DEV {
            self.devices.lock()[major as usize].clone()
        } else {
            None
        };
        let Some(handler) = handler else {
            log::error!(
                "request for nonexistent block device {:#06x}",
                buffer.dev().raw()
            );
            return Err(BlkError::NoDevice);
        };

        let ahead = cmd.is_ahead();
        if ahead && buffer.is_locked() {
            return Ok(());
        }
        let cmd = cmd.demoted();

        buffer.lock(sched);
        let pointless = match cmd {
            Command::Write => !buffer.is_dirty(),
            _ => buffer.is_uptodate(),
        };
        if pointless {
            buffer.unlock(sched);
            return Ok(());
        }

        loop {
            let mut q = self.queue.lock();
            if let Some(idx) = free_slot(&q.pool, cmd) {
                q.pool[idx] = Request {
                    dev: Some(buffer.dev()),
                    cmd,
                    errors: 0,
                    sector: buffer.block() * SECTORS_PER_BLOCK,
                    nr_sectors: SECTORS_PER_BLOCK,
                    transferred: 0,
                    buffer: Some(buffer.clone()),
                    waiting: ArrayVec::new(),
                    next: None,
                };
                buffer.clear_dirty();
                match q.heads[major as usize] {
                    None => {
                        q.heads[major as usize] = Some(idx);
                        drop(q);
                        handler.handle(self, sched);
                    }
                    Some(head) => {
                        insert_sorted(&mut q, head, idx);
                    }
                }
                return Ok(());
            }
            if ahead {
                drop(q);
                buffer.unlock(sched);
                return Ok(());
            }
            let task = sched.current();
            self.wait_for_request.register(task);
            drop(q);
            sched.block(task);
        }
    }

    /// Run `f` on the head request of `major`'s queue, or `None` if the
    /// queue is empty. Driver-side accessor; holds the queue mutex for the
    /// duration of `f`.
    pub(crate) fn with_current<R>(
        &self,
        major: u8,
        f: impl FnOnce(&mut Request) -> R,
    ) -> Option<R> {
        let mut q = self.queue.lock();
        let head = q.heads[major as usize]?;
        Some(f(&mut q.pool[head]))
    }

    /// Retire the head request of `major`'s queue.
    ///
    /// The attached buffer is marked up to date (or not), unlocked, and its
    /// waiters woken; the slot returns to the pool and the queue advances.
    pub(crate) fn end_request(&self, major: u8, uptodate: bool, sched: &dyn Scheduler) {
        let mut guard = self.queue.lock();
        let q = &mut *guard;
        let Some(head) = q.heads[major as usize] else {
            return;
        };
        let slot = &mut q.pool[head];
        let dev = slot.dev.take();
        let sector = slot.sector;
        let buffer = slot.buffer.take();
        let waiting = core::mem::take(&mut slot.waiting);
        slot.errors = 0;
        slot.nr_sectors = 0;
        slot.transferred = 0;
        q.heads[major as usize] = slot.next.take();
        drop(guard);

        if let Some(buffer) = &buffer {
            buffer.set_uptodate(uptodate);
            buffer.unlock(sched);
        }
        if !uptodate {
            let raw = dev.map_or(0, Dev::raw);
            log::error!(
                "{} I/O error, dev {:#06x}, block {}",
                device_name(major),
                raw,
                sector / SECTORS_PER_BLOCK
            );
        }
        for task in waiting {
            sched.wake(task);
        }
        self.wait_for_request.wake_all(sched);
    }
}

impl Default for BlockIo {
    fn default() -> BlockIo {
        BlockIo::new()
    }
}

fn device_name(major: u8) -> &'static str {
    match major {
        1 => "ramdisk",
        2 => "floppy",
        3 => "harddisk",
        _ => "unknown device",
    }
}

/// Downward scan for a free slot. Reads may use the whole pool, writes only
/// the low two thirds.
fn free_slot(pool: &[Request; NR_REQUEST], cmd: Command) -> Option<usize> {
    let limit = match cmd.demoted() {
        Command::Read => NR_REQUEST,
        _ => NR_REQUEST * 2 / 3,
    };
    (0..limit).rev().find(|&i| pool[i].dev.is_none())
}

/// Elevator insertion. Walk the queue and place the new request at the first
/// point that keeps each run ordered; the `!in_order(step, next)` clause lets
/// it also slot in where one sorted run ends and the next begins.
fn insert_sorted(q: &mut QueueState, head: usize, idx: usize) {
    let mut step = head;
    while let Some(next) = q.pool[step].next {
        let step_before_new = in_order(&q.pool[step], &q.pool[idx]);
        let run_break = !in_order(&q.pool[step], &q.pool[next]);
        let new_before_next = in_order(&q.pool[idx], &q.pool[next]);
        if (step_before_new || run_break) && new_before_next {
            break;
        }
        step = next;
    }
    q.pool[idx].next = q.pool[step].next;
    q.pool[step].next = Some(idx);
}
