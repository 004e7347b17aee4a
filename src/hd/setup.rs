//! Drive geometry and boot-time partition discovery.
//!
//! Discovery runs once, after the driver is registered: it fixes the drive
//! count against the CMOS presence byte, publishes the whole-disk spans, and
//! reads each drive's partition table through the regular request path.

use super::{HdController, MAX_HD};
use crate::{
    blk::{BlockIo, Command},
    buf::Buffer,
    dev::Dev,
    sync::Scheduler,
};
use alloc::sync::Arc;
use arrayvec::ArrayVec;
use core::sync::atomic::Ordering;

/// Drive geometry as the BIOS or the board config reports it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HdGeometry {
    pub cyls: u16,
    pub heads: u8,
    pub sectors: u8,
    /// Write-precompensation cylinder.
    pub wpcom: u16,
    /// Landing zone cylinder.
    pub lzone: u16,
    pub ctl: u8,
}

impl HdGeometry {
    pub const fn total_sectors(&self) -> u64 {
        self.cyls as u64 * self.heads as u64 * self.sectors as u64
    }

    /// Parse one 16-byte BIOS drive-parameter entry.
    fn from_bios_entry(e: &[u8]) -> HdGeometry {
        HdGeometry {
            cyls: u16::from_le_bytes([e[0], e[1]]),
            heads: e[2],
            wpcom: u16::from_le_bytes([e[5], e[6]]),
            ctl: e[8],
            lzone: u16::from_le_bytes([e[12], e[13]]),
            sectors: e[14],
        }
    }
}

/// One partition-table slot: a sector span on the drive. Index 0 of each
/// drive's five entries is the whole disk. `nr_sects == 0` means the slot
/// holds nothing.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Partition {
    pub start_sect: u64,
    pub nr_sects: u64,
}

#[derive(Clone, Debug)]
pub enum GeometrySource {
    /// Geometry fixed by kernel configuration.
    Static(ArrayVec<HdGeometry, MAX_HD>),
    /// The 32-byte BIOS drive-parameter block. Drive 1 is present iff its
    /// cylinder count is nonzero.
    BiosTable([u8; 32]),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SetupError {
    /// Discovery already ran.
    AlreadyDone,
    /// Block 0 of the drive could not be read. Fatal to boot.
    Unreadable { drive: u8 },
    /// Block 0 carries no 0x55 0xaa signature. Fatal to boot.
    BadSignature { drive: u8 },
}

pub(crate) struct HdInfo {
    pub disks: ArrayVec<HdGeometry, MAX_HD>,
    pub partitions: [Partition; 5 * MAX_HD],
}

impl HdInfo {
    pub(crate) fn empty() -> HdInfo {
        HdInfo {
            disks: ArrayVec::new(),
            partitions: [Partition::default(); 5 * MAX_HD],
        }
    }
}

const PART_TABLE_OFFSET: usize = 0x1be;
const PART_ENTRY_SIZE: usize = 16;

impl HdController {
    /// Read the partition tables off every present drive.
    pub fn discover_partitions(
        &self,
        io: &BlockIo,
        sched: &dyn Scheduler,
    ) -> Result<(), SetupError> {
        if self.discovered.swap(true, Ordering::AcqRel) {
            return Err(SetupError::AlreadyDone);
        }

        let mut disks: ArrayVec<HdGeometry, MAX_HD> = match &self.source {
            GeometrySource::Static(disks) => disks.clone(),
            GeometrySource::BiosTable(table) => {
                let mut disks = ArrayVec::new();
                disks.push(HdGeometry::from_bios_entry(&table[0..16]));
                let second = HdGeometry::from_bios_entry(&table[16..32]);
                if second.cyls != 0 {
                    disks.push(second);
                }
                disks
            }
        };

        // The CMOS presence byte has the final say on the drive count.
        let flags = self.port.drive_info_flags();
        let present = if flags & 0xf0 == 0 {
            0
        } else if flags & 0x0f != 0 {
            2
        } else {
            1
        };
        disks.truncate(present);

        {
            let mut info = self.info.lock();
            info.disks = disks.clone();
            for (drive, geo) in disks.iter().enumerate() {
                info.partitions[drive * 5] = Partition {
                    start_sect: 0,
                    nr_sects: geo.total_sectors(),
                };
            }
        }

        for drive in 0..disks.len() as u8 {
            let buf = Arc::new(Buffer::new(Dev::hd(drive, 0), 0));
            io.submit(sched, Command::Read, &buf)
                .map_err(|_| SetupError::Unreadable { drive })?;
            buf.wait_unlocked(sched);
            if !buf.is_uptodate() {
                log::error!("unable to read partition table of drive {drive}");
                return Err(SetupError::Unreadable { drive });
            }
            let parsed = buf.with_data(|data| {
                if data[510] != 0x55 || data[511] != 0xaa {
                    return None;
                }
                let mut parts = [Partition::default(); 4];
                for (i, part) in parts.iter_mut().enumerate() {
                    let e = &data[PART_TABLE_OFFSET + i * PART_ENTRY_SIZE..];
                    part.start_sect = u32::from_le_bytes([e[8], e[9], e[10], e[11]]) as u64;
                    part.nr_sects = u32::from_le_bytes([e[12], e[13], e[14], e[15]]) as u64;
                }
                Some(parts)
            });
            let Some(parts) = parsed else {
                log::error!("bad partition table on drive {drive}");
                return Err(SetupError::BadSignature { drive });
            };
            let mut info = self.info.lock();
            info.partitions[drive as usize * 5 + 1..][..4].copy_from_slice(&parts);
        }

        log::info!(
            "partition table{} ok",
            if disks.len() > 1 { "s" } else { "" }
        );
        Ok(())
    }

    pub fn nr_disks(&self) -> usize {
        self.info.lock().disks.len()
    }

    /// Partition entry for a minor number, if in range.
    pub fn partition(&self, minor: u8) -> Option<Partition> {
        self.info.lock().partitions.get(minor as usize).copied()
    }
}
