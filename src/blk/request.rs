//! Request descriptors and the elevator ordering relation.

use crate::{buf::Buffer, dev::Dev, sync::TaskId, NR_TASKS};
use alloc::sync::Arc;
use arrayvec::ArrayVec;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Command {
    Read,
    Write,
    /// Read, but only worth doing if it costs nothing: dropped when the
    /// buffer is busy or the pool is full.
    ReadAhead,
    /// Write under the same best-effort rules as [`Command::ReadAhead`].
    WriteAhead,
}

impl Command {
    pub(crate) fn is_ahead(self) -> bool {
        matches!(self, Command::ReadAhead | Command::WriteAhead)
    }

    pub(crate) fn demoted(self) -> Command {
        match self {
            Command::ReadAhead => Command::Read,
            Command::WriteAhead => Command::Write,
            c => c,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Command::Read | Command::ReadAhead => 0,
            Command::Write | Command::WriteAhead => 1,
        }
    }
}

/// One slot in the shared request pool. `dev == None` means free.
///
/// Slots link into per-device queues by pool index rather than by pointer,
/// so the whole pool can sit in one array behind one mutex.
pub(crate) struct Request {
    pub dev: Option<Dev>,
    pub cmd: Command,
    pub errors: u32,
    /// Start sector, relative to the partition.
    pub sector: u64,
    pub nr_sectors: u64,
    /// Bytes of the attached buffer already transferred.
    pub transferred: usize,
    pub buffer: Option<Arc<Buffer>>,
    pub waiting: ArrayVec<TaskId, NR_TASKS>,
    pub next: Option<usize>,
}

impl Request {
    pub(crate) fn free() -> Request {
        Request {
            dev: None,
            cmd: Command::Read,
            errors: 0,
            sector: 0,
            nr_sectors: 0,
            transferred: 0,
            buffer: None,
            waiting: ArrayVec::new(),
            next: None,
        }
    }

    fn key(&self) -> (u8, u16, u64) {
        (
            self.cmd.rank(),
            self.dev.map_or(u16::MAX, Dev::raw),
            self.sector,
        )
    }
}

/// Elevator ordering: reads before writes, then by device, then by sector.
pub(crate) fn in_order(a: &Request, b: &Request) -> bool {
    a.key() < b.key()
}
