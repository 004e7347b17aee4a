//! Block-device layer: buffer locks, the request queue with elevator
//! scheduling, the device dispatch table, and the hard-disk driver.
//!
//! The crate is a library consumed by the rest of the kernel. Blocking and
//! interrupt delivery go through the [`sync::Scheduler`] trait and the
//! [`hd::HdPort`] trait, so the whole stack runs unmodified on real hardware
//! or against a simulated controller.
#![no_std]

extern crate alloc;

pub mod blk;
pub mod buf;
pub mod dev;
pub mod hd;
pub mod sync;

/// Number of request slots in the shared pool
pub const NR_REQUEST: usize = 32;
/// Number of entries in the block-device dispatch table
pub const NR_BLK_DEV: usize = 7;
/// Maximum number of tasks that can exist at once
pub const NR_TASKS: usize = 64;
/// Bytes per cache block
pub const BLOCK_SIZE: usize = 1024;
/// Bytes per device sector
pub const SECTOR_SIZE: usize = 512;
/// Sectors per cache block
pub const SECTORS_PER_BLOCK: u64 = (BLOCK_SIZE / SECTOR_SIZE) as u64;
