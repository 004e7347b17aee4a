//! Hard-disk driver.
//!
//! A single controller with up to two drives. One command is in flight at a
//! time; the armed [`Intr`] continuation says what the next interrupt means.
//! Errors retry the current request, escalate to a controller reset past
//! half the budget, and fail the request once the budget is spent.

pub mod port;
pub mod setup;
#[cfg(test)]
pub(crate) mod sim;

pub use port::HdPort;
pub use setup::{GeometrySource, HdGeometry, Partition, SetupError};

use crate::{
    blk::{BlockIo, Command, RequestHandler},
    dev::MAJOR_HD,
    sync::Scheduler,
    SECTORS_PER_BLOCK, SECTOR_SIZE,
};
use alloc::sync::Arc;
use core::sync::atomic::AtomicBool;
use port::{cmd, status};
use setup::HdInfo;

/// Per-request error budget.
pub const MAX_ERRORS: u32 = 7;
/// Drives per controller.
pub const MAX_HD: usize = 2;

const READY_RETRIES: usize = 10_000;
const DRQ_RETRIES: usize = 3_000;
const RESET_RETRIES: usize = 10_000;

/// What the next controller interrupt completes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Intr {
    Idle,
    AwaitingRecalibrate,
    AwaitingRead,
    AwaitingWrite,
}

struct HdState {
    /// Reset the controller before the next command.
    reset: bool,
    /// Recalibrate (seek to 0) before the next transfer.
    recalibrate: bool,
    armed: Intr,
}

pub struct HdController {
    port: Arc<dyn HdPort>,
    state: spin::Mutex<HdState>,
    pub(crate) info: spin::Mutex<HdInfo>,
    pub(crate) source: GeometrySource,
    pub(crate) discovered: AtomicBool,
}

impl HdController {
    pub fn new(port: Arc<dyn HdPort>, source: GeometrySource) -> HdController {
        HdController {
            port,
            // Force a reset and recalibration ahead of the first transfer.
            state: spin::Mutex::new(HdState {
                reset: true,
                recalibrate: true,
                armed: Intr::Idle,
            }),
            info: spin::Mutex::new(HdInfo::empty()),
            source,
            discovered: AtomicBool::new(false),
        }
    }

    /// Hook the driver up: dispatch-table entry and interrupt line.
    pub fn init(self: &Arc<Self>, io: &BlockIo) {
        io.register_device(MAJOR_HD, self.clone());
        self.port.unmask_irq();
    }

    /// Start the head request of the queue, if any and if the controller is
    /// idle. Runs from task context (queue went non-empty) and from the tail
    /// of every interrupt.
    fn dispatch(&self, io: &BlockIo, sched: &dyn Scheduler) {
        loop {
            if self.state.lock().armed != Intr::Idle {
                return;
            }
            let head = io.with_current(MAJOR_HD, |r| {
                match r.dev {
                    Some(d) if d.major() == MAJOR_HD => {}
                    _ => panic!("harddisk: request list destroyed"),
                }
                if let Some(b) = &r.buffer {
                    if !b.is_locked() {
                        panic!("harddisk: block not locked");
                    }
                }
                (
                    r.dev.map_or(0, |d| d.minor()) as usize,
                    r.cmd,
                    r.sector,
                    r.nr_sectors,
                    r.transferred,
                    r.buffer.clone(),
                )
            });
            let Some((minor, cmd_kind, sector, nr_sectors, transferred, buffer)) = head else {
                return;
            };

            let located = {
                let info = self.info.lock();
                if minor >= 5 * info.disks.len()
                    || sector + SECTORS_PER_BLOCK > info.partitions[minor].nr_sects
                {
                    None
                } else {
                    let drive = minor / 5;
                    Some((drive as u8, info.disks[drive], info.partitions[minor].start_sect))
                }
            };
            let Some((drive, geo, start)) = located else {
                io.end_request(MAJOR_HD, false, sched);
                continue;
            };
            let Some(buffer) = buffer else {
                log::error!("harddisk: request carries no data buffer");
                io.end_request(MAJOR_HD, false, sched);
                continue;
            };

            let abs = start + sector;
            let track = abs / geo.sectors as u64;
            let sect = (abs % geo.sectors as u64) as u8 + 1;
            let head = (track % geo.heads as u64) as u8;
            let cyl = (track / geo.heads as u64) as u16;

            let mut st = self.state.lock();
            if st.reset {
                st.reset = false;
                st.recalibrate = true;
                st.armed = Intr::AwaitingRecalibrate;
                drop(st);
                self.reset_controller(&geo);
                // The reset wiped the drive parameters; reload them.
                self.out(
                    drive,
                    &geo,
                    geo.sectors,
                    geo.sectors,
                    geo.heads - 1,
                    geo.cyls,
                    cmd::WIN_SPECIFY,
                );
                return;
            }
            if st.recalibrate {
                st.recalibrate = false;
                st.armed = Intr::AwaitingRecalibrate;
                drop(st);
                self.out(drive, &geo, geo.sectors, 0, 0, 0, cmd::WIN_RESTORE);
                return;
            }
            match cmd_kind {
                Command::Write => {
                    st.armed = Intr::AwaitingWrite;
                    drop(st);
                    self.out(drive, &geo, nr_sectors as u8, sect, head, cyl, cmd::WIN_WRITE);
                    if !self.await_drq() {
                        self.state.lock().armed = Intr::Idle;
                        self.bad_rw(io, sched);
                        continue;
                    }
                    let mut data = [0u8; SECTOR_SIZE];
                    buffer.with_data(|d| {
                        data.copy_from_slice(&d[transferred..transferred + SECTOR_SIZE])
                    });
                    self.port.write_sector(&data);
                }
                Command::Read => {
                    st.armed = Intr::AwaitingRead;
                    drop(st);
                    self.out(drive, &geo, nr_sectors as u8, sect, head, cyl, cmd::WIN_READ);
                }
                Command::ReadAhead | Command::WriteAhead => {
                    panic!("harddisk: unknown command in queue");
                }
            }
            return;
        }
    }

    /// Hardware interrupt entry point.
    pub fn interrupt(&self, io: &BlockIo, sched: &dyn Scheduler) {
        let armed = {
            let mut st = self.state.lock();
            core::mem::replace(&mut st.armed, Intr::Idle)
        };
        match armed {
            Intr::Idle => {
                log::warn!("unexpected harddisk interrupt");
                return;
            }
            Intr::AwaitingRecalibrate => {
                if self.win_result() {
                    self.bad_rw(io, sched);
                }
            }
            Intr::AwaitingRead => {
                if self.win_result() {
                    self.bad_rw(io, sched);
                } else {
                    let mut data = [0u8; SECTOR_SIZE];
                    self.port.read_sector(&mut data);
                    let remaining = io.with_current(MAJOR_HD, |r| {
                        if let Some(b) = &r.buffer {
                            b.with_data_mut(|d| {
                                d[r.transferred..r.transferred + SECTOR_SIZE]
                                    .copy_from_slice(&data)
                            });
                        }
                        r.errors = 0;
                        r.transferred += SECTOR_SIZE;
                        r.sector += 1;
                        r.nr_sectors -= 1;
                        r.nr_sectors
                    });
                    if let Some(n) = remaining {
                        if n > 0 {
                            self.state.lock().armed = Intr::AwaitingRead;
                            return;
                        }
                    }
                    io.end_request(MAJOR_HD, true, sched);
                }
            }
            Intr::AwaitingWrite => {
                if self.win_result() {
                    self.bad_rw(io, sched);
                } else {
                    let next = io.with_current(MAJOR_HD, |r| {
                        r.nr_sectors -= 1;
                        if r.nr_sectors == 0 {
                            return None;
                        }
                        r.sector += 1;
                        r.transferred += SECTOR_SIZE;
                        let mut data = [0u8; SECTOR_SIZE];
                        if let Some(b) = &r.buffer {
                            b.with_data(|d| {
                                data.copy_from_slice(
                                    &d[r.transferred..r.transferred + SECTOR_SIZE],
                                )
                            });
                        }
                        Some(data)
                    });
                    match next.flatten() {
                        Some(data) => {
                            self.state.lock().armed = Intr::AwaitingWrite;
                            self.port.write_sector(&data);
                            return;
                        }
                        None => io.end_request(MAJOR_HD, true, sched),
                    }
                }
            }
        }
        self.dispatch(io, sched);
    }

    /// Charge one error to the current request; fail it once the budget is
    /// spent, ask for a controller reset once it passes the halfway mark.
    fn bad_rw(&self, io: &BlockIo, sched: &dyn Scheduler) {
        let Some(errors) = io.with_current(MAJOR_HD, |r| {
            r.errors += 1;
            r.errors
        }) else {
            return;
        };
        if errors >= MAX_ERRORS {
            io.end_request(MAJOR_HD, false, sched);
        } else if errors > MAX_ERRORS / 2 {
            self.state.lock().reset = true;
        }
    }

    /// True if the controller reports the last command failed.
    fn win_result(&self) -> bool {
        const MASK: u8 = status::BUSY_STAT
            | status::READY_STAT
            | status::WRERR_STAT
            | status::SEEK_STAT
            | status::ERR_STAT;
        const GOOD: u8 = status::READY_STAT | status::SEEK_STAT;
        let s = self.port.status();
        if s & MASK == GOOD {
            return false;
        }
        if s & status::ERR_STAT != 0 {
            let _ = self.port.error();
        }
        true
    }

    fn out(&self, drive: u8, geo: &HdGeometry, nsect: u8, sect: u8, head: u8, cyl: u16, opcode: u8) {
        if drive > 1 || head > 15 {
            panic!("harddisk: impossible drive or head");
        }
        if !self.controller_ready() {
            panic!("harddisk: controller not ready");
        }
        let drive_head = 0xa0 | (drive << 4) | head;
        self.port
            .issue_command((geo.wpcom >> 2) as u8, nsect, sect, cyl, drive_head, opcode);
    }

    fn controller_ready(&self) -> bool {
        for _ in 0..READY_RETRIES {
            let s = self.port.status();
            if s & (status::BUSY_STAT | status::READY_STAT) == status::READY_STAT {
                return true;
            }
        }
        false
    }

    fn await_drq(&self) -> bool {
        for _ in 0..DRQ_RETRIES {
            if self.port.status() & status::DRQ_STAT != 0 {
                return true;
            }
        }
        false
    }

    fn reset_controller(&self, geo: &HdGeometry) {
        self.port.write_control(4);
        self.port.write_control(geo.ctl & 0x0f);
        if self.drive_busy() {
            log::warn!("harddisk: controller still busy after reset");
        }
        let err = self.port.error();
        if err != 1 {
            log::warn!("harddisk: controller reset failed ({err:#04x})");
        }
    }

    fn drive_busy(&self) -> bool {
        const MASK: u8 = status::BUSY_STAT | status::READY_STAT | status::SEEK_STAT;
        const IDLE: u8 = status::READY_STAT | status::SEEK_STAT;
        for _ in 0..RESET_RETRIES {
            if self.port.status() & MASK == IDLE {
                return false;
            }
        }
        true
    }
}

impl RequestHandler for HdController {
    fn handle(&self, io: &BlockIo, sched: &dyn Scheduler) {
        self.dispatch(io, sched);
    }
}
