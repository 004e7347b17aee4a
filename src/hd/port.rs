//! Register-level access to the hard-disk controller.
//!
//! The driver state machine talks to the controller only through [`HdPort`].
//! The kernel's implementation does port I/O on the 0x1f0 block and the
//! interrupt controller; tests substitute a simulated controller.

use crate::SECTOR_SIZE;

/// Status register bits.
pub mod status {
    /// Previous command ended in error
    pub const ERR_STAT: u8 = 0x01;
    /// Data ready for transfer through the data register
    pub const DRQ_STAT: u8 = 0x08;
    /// Seek complete
    pub const SEEK_STAT: u8 = 0x10;
    /// Write fault
    pub const WRERR_STAT: u8 = 0x20;
    /// Drive ready
    pub const READY_STAT: u8 = 0x40;
    /// Controller busy
    pub const BUSY_STAT: u8 = 0x80;
}

/// Controller command opcodes.
pub mod cmd {
    /// Recalibrate: seek to cylinder 0
    pub const WIN_RESTORE: u8 = 0x10;
    pub const WIN_READ: u8 = 0x20;
    pub const WIN_WRITE: u8 = 0x30;
    /// Set geometry parameters after a reset
    pub const WIN_SPECIFY: u8 = 0x91;
}

pub trait HdPort: Send + Sync {
    fn status(&self) -> u8;

    /// Read and clear the error register.
    fn error(&self) -> u8;

    /// Write the control register (bit 2 = soft reset).
    fn write_control(&self, value: u8);

    /// Write the full command block: precompensation, sector count, start
    /// sector, cylinder, drive/head select, opcode.
    #[allow(clippy::too_many_arguments)]
    fn issue_command(
        &self,
        wpcom: u8,
        nsect: u8,
        sect: u8,
        cyl: u16,
        drive_head: u8,
        opcode: u8,
    );

    /// Pull one sector (256 data-register words) out of the controller.
    fn read_sector(&self, data: &mut [u8; SECTOR_SIZE]);

    /// Push one sector into the controller.
    fn write_sector(&self, data: &[u8; SECTOR_SIZE]);

    /// The CMOS drive-presence byte: high nibble set means drive 0 exists,
    /// low nibble set means drive 1 does too.
    fn drive_info_flags(&self) -> u8;

    /// Unmask the disk interrupt at the interrupt controller.
    fn unmask_irq(&self);
}
