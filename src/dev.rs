//! Device numbers.
//!
//! A device id packs the major number (which block driver) in the high byte
//! and the minor number (which unit or partition) in the low byte.

/// Major number of the hard-disk driver.
pub const MAJOR_HD: u8 = 3;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Dev(u16);

impl Dev {
    pub const fn new(major: u8, minor: u8) -> Dev {
        Dev(((major as u16) << 8) | minor as u16)
    }

    /// Device id of a hard-disk partition. Minor 0, 5 are the whole disks,
    /// 1-4 and 6-9 their partitions.
    pub const fn hd(drive: u8, partition: u8) -> Dev {
        Dev::new(MAJOR_HD, drive * 5 + partition)
    }

    pub const fn major(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn minor(self) -> u8 {
        self.0 as u8
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}
