//! A scripted controller for driving the state machine in tests, plus the
//! wiring that pumps its latched interrupts through the driver whenever a
//! task blocks.

use super::{
    port::{cmd, status, HdPort},
    setup::{GeometrySource, HdGeometry},
    HdController,
};
use crate::{blk::BlockIo, sync::wait::tests::TestScheduler, SECTOR_SIZE};
use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};
use arrayvec::ArrayVec;
use spin::Mutex;

pub(crate) fn test_geometry() -> HdGeometry {
    HdGeometry {
        cyls: 64,
        heads: 4,
        sectors: 17,
        wpcom: 0,
        lzone: 64,
        ctl: 0,
    }
}

pub(crate) fn single_drive() -> GeometrySource {
    let mut disks = ArrayVec::new();
    disks.push(test_geometry());
    GeometrySource::Static(disks)
}

pub(crate) fn two_drives() -> GeometrySource {
    let mut disks = ArrayVec::new();
    disks.push(test_geometry());
    disks.push(test_geometry());
    GeometrySource::Static(disks)
}

/// A boot sector with the given `(start_sect, nr_sects)` partition entries.
pub(crate) fn mbr(parts: &[(u32, u32)]) -> [u8; SECTOR_SIZE] {
    let mut sector = [0u8; SECTOR_SIZE];
    for (i, (start, count)) in parts.iter().enumerate() {
        let e = 0x1be + i * 16;
        sector[e + 8..e + 12].copy_from_slice(&start.to_le_bytes());
        sector[e + 12..e + 16].copy_from_slice(&count.to_le_bytes());
    }
    sector[510] = 0x55;
    sector[511] = 0xaa;
    sector
}

struct ActiveCmd {
    opcode: u8,
    drive: usize,
    lba: u64,
    remaining: u8,
}

struct SimInner {
    geo: HdGeometry,
    drives: [Vec<[u8; SECTOR_SIZE]>; 2],
    status: u8,
    error: u8,
    active: Option<ActiveCmd>,
    pending_irqs: usize,
    irq_unmasked: bool,
    /// Abort the next N read/write commands at issue time.
    fail_transfers: u32,
    commands: Vec<u8>,
    cmos: u8,
}

pub(crate) struct SimDisk {
    inner: Mutex<SimInner>,
}

impl SimDisk {
    pub(crate) fn new(geo: HdGeometry, cmos: u8) -> SimDisk {
        let total = geo.total_sectors() as usize;
        SimDisk {
            inner: Mutex::new(SimInner {
                geo,
                drives: [vec![[0; SECTOR_SIZE]; total], vec![[0; SECTOR_SIZE]; total]],
                status: status::READY_STAT | status::SEEK_STAT,
                error: 1,
                active: None,
                pending_irqs: 0,
                irq_unmasked: false,
                fail_transfers: 0,
                commands: Vec::new(),
                cmos,
            }),
        }
    }

    pub(crate) fn set_sector(&self, drive: usize, lba: u64, data: [u8; SECTOR_SIZE]) {
        self.inner.lock().drives[drive][lba as usize] = data;
    }

    pub(crate) fn sector(&self, drive: usize, lba: u64) -> [u8; SECTOR_SIZE] {
        self.inner.lock().drives[drive][lba as usize]
    }

    pub(crate) fn fail_next_transfers(&self, n: u32) {
        self.inner.lock().fail_transfers = n;
    }

    pub(crate) fn take_irq(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending_irqs > 0 {
            inner.pending_irqs -= 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn commands_issued(&self, opcode: u8) -> usize {
        self.inner
            .lock()
            .commands
            .iter()
            .filter(|&&c| c == opcode)
            .count()
    }

    pub(crate) fn irq_unmasked(&self) -> bool {
        self.inner.lock().irq_unmasked
    }
}

impl HdPort for SimDisk {
    fn status(&self) -> u8 {
        self.inner.lock().status
    }

    fn error(&self) -> u8 {
        self.inner.lock().error
    }

    fn write_control(&self, value: u8) {
        let mut inner = self.inner.lock();
        if value & 4 != 0 {
            inner.active = None;
            inner.status = status::READY_STAT | status::SEEK_STAT;
            inner.error = 1;
        }
    }

    fn issue_command(&self, _wpcom: u8, nsect: u8, sect: u8, cyl: u16, drive_head: u8, opcode: u8) {
        let mut inner = self.inner.lock();
        assert!(
            inner.active.is_none(),
            "command {opcode:#04x} issued while a transfer is in flight"
        );
        inner.commands.push(opcode);
        match opcode {
            cmd::WIN_SPECIFY | cmd::WIN_RESTORE => {
                inner.status = status::READY_STAT | status::SEEK_STAT;
                inner.pending_irqs += 1;
            }
            cmd::WIN_READ | cmd::WIN_WRITE => {
                if inner.fail_transfers > 0 {
                    inner.fail_transfers -= 1;
                    inner.status = status::READY_STAT | status::SEEK_STAT | status::ERR_STAT;
                    inner.error = 0x04;
                    // A failed read still interrupts; a failed write never
                    // raises data-request, so the driver times out instead.
                    if opcode == cmd::WIN_READ {
                        inner.pending_irqs += 1;
                    }
                    return;
                }
                let drive = ((drive_head >> 4) & 1) as usize;
                let head = (drive_head & 0x0f) as u64;
                let track = cyl as u64 * inner.geo.heads as u64 + head;
                let lba = track * inner.geo.sectors as u64 + sect as u64 - 1;
                inner.active = Some(ActiveCmd {
                    opcode,
                    drive,
                    lba,
                    remaining: nsect,
                });
                inner.status = status::READY_STAT | status::SEEK_STAT | status::DRQ_STAT;
                if opcode == cmd::WIN_READ {
                    // First sector is ready immediately.
                    inner.pending_irqs += 1;
                }
            }
            other => panic!("unsupported controller opcode {other:#04x}"),
        }
    }

    fn read_sector(&self, data: &mut [u8; SECTOR_SIZE]) {
        let mut inner = self.inner.lock();
        let (drive, lba, remaining) = {
            let active = inner.active.as_ref().expect("data read with no transfer");
            assert_eq!(active.opcode, cmd::WIN_READ);
            (active.drive, active.lba, active.remaining)
        };
        *data = inner.drives[drive][lba as usize];
        if remaining > 1 {
            let active = inner.active.as_mut().unwrap();
            active.lba += 1;
            active.remaining -= 1;
            inner.pending_irqs += 1;
        } else {
            inner.active = None;
            inner.status = status::READY_STAT | status::SEEK_STAT;
        }
    }

    fn write_sector(&self, data: &[u8; SECTOR_SIZE]) {
        let mut inner = self.inner.lock();
        let (drive, lba, remaining) = {
            let active = inner.active.as_ref().expect("data write with no transfer");
            assert_eq!(active.opcode, cmd::WIN_WRITE);
            (active.drive, active.lba, active.remaining)
        };
        inner.drives[drive][lba as usize] = *data;
        inner.pending_irqs += 1;
        if remaining > 1 {
            let active = inner.active.as_mut().unwrap();
            active.lba += 1;
            active.remaining -= 1;
        } else {
            inner.active = None;
            inner.status = status::READY_STAT | status::SEEK_STAT;
        }
    }

    fn drive_info_flags(&self) -> u8 {
        self.inner.lock().cmos
    }

    fn unmask_irq(&self) {
        self.inner.lock().irq_unmasked = true;
    }
}

/// Everything a driver test needs, wired together: interrupts latched by the
/// simulator are delivered whenever a task blocks, and can be drained
/// explicitly with [`Rig::pump`].
pub(crate) struct Rig {
    pub io: Arc<BlockIo>,
    pub hd: Arc<HdController>,
    pub sim: Arc<SimDisk>,
    pub sched: Arc<TestScheduler>,
}

impl Rig {
    pub(crate) fn pump(&self) {
        while self.sim.take_irq() {
            self.hd.interrupt(&self.io, &*self.sched);
        }
    }
}

pub(crate) fn rig(source: GeometrySource, cmos: u8) -> Rig {
    let io = Arc::new(BlockIo::new());
    let sim = Arc::new(SimDisk::new(test_geometry(), cmos));
    let hd = Arc::new(HdController::new(sim.clone(), source));
    hd.init(&io);
    let sched = Arc::new(TestScheduler::new());
    {
        let hook_sim = sim.clone();
        let hook_hd = hd.clone();
        let hook_io = io.clone();
        let hook_sched = sched.clone();
        sched.set_hook(Box::new(move || {
            if hook_sim.take_irq() {
                hook_hd.interrupt(&hook_io, &*hook_sched);
                true
            } else {
                false
            }
        }));
    }
    Rig { io, hd, sim, sched }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulator_latches_one_irq_per_command() {
        let sim = SimDisk::new(test_geometry(), 0x10);
        sim.issue_command(0, 17, 0, 0, 0xa0, cmd::WIN_RESTORE);
        assert!(sim.take_irq());
        assert!(!sim.take_irq());
    }

    #[test]
    fn mbr_helper_places_the_signature() {
        let sector = mbr(&[(63, 100)]);
        assert_eq!(sector[510], 0x55);
        assert_eq!(sector[511], 0xaa);
        assert_eq!(sector[0x1be + 8], 63);
    }
}
