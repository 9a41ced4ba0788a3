//! ATA PIO driver for the primary bus.
//!
//! Synchronous 28-bit LBA sector I/O against the primary master. The CPU
//! moves every word through the data port and spins on the status register
//! between sectors. The driver assumes a single outstanding command, which
//! holds because the kernel is single-threaded and disk I/O only happens
//! from the main context.

use x86::io::{inb, inw, outb, outw};

use crate::constants::ports::{
    ATA_ALT_STATUS, ATA_COMMAND, ATA_DATA, ATA_DRIVE_HEAD, ATA_LBA_HI, ATA_LBA_LO, ATA_LBA_MID,
    ATA_SECTOR_COUNT, ATA_STATUS,
};
use crate::filesys::{BlockDevice, FsError};

const ATA_SR_BSY: u8 = 0x80;
const ATA_SR_DF: u8 = 0x20;
const ATA_SR_DRQ: u8 = 0x08;
const ATA_SR_ERR: u8 = 0x01;

const ATA_CMD_READ_PIO: u8 = 0x20;
const ATA_CMD_WRITE_PIO: u8 = 0x30;
const ATA_CMD_CACHE_FLUSH: u8 = 0xE7;
const ATA_CMD_IDENTIFY: u8 = 0xEC;

/// Master drive in LBA mode: bit 6 selects LBA, bit 4 clear selects master.
const ATA_MASTER_LBA: u8 = 0xE0;

pub const SECTOR_SIZE: usize = 512;

/// Spin budget for status waits. A dead drive surfaces as [`AtaError::Timeout`]
/// instead of hanging the kernel forever.
const MAX_SPIN: u32 = 1_000_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AtaError {
    /// Status register read 0: nothing on the bus.
    NoDevice,
    /// LBA mid/hi went non-zero after IDENTIFY: ATAPI or SATA, not ATA.
    NotAta,
    /// ERR set; the drive rejected the command.
    DeviceError,
    /// DF set; drive fault.
    DriveFault,
    /// DRQ never rose for a data transfer.
    NoData,
    /// The spin budget expired.
    Timeout,
    InvalidArgument,
}

/// The primary ATA master, sized from its IDENTIFY data.
pub struct AtaDrive {
    total_sectors: u32,
}

/// The protocol requires 400 ns between drive select and the next status
/// read; four alternate-status reads take about that long.
fn delay_400ns() {
    unsafe {
        inb(ATA_ALT_STATUS);
        inb(ATA_ALT_STATUS);
        inb(ATA_ALT_STATUS);
        inb(ATA_ALT_STATUS);
    }
}

fn wait_while_busy() -> Result<(), AtaError> {
    for _ in 0..MAX_SPIN {
        if unsafe { inb(ATA_STATUS) } & ATA_SR_BSY == 0 {
            return Ok(());
        }
    }
    Err(AtaError::Timeout)
}

/// Waits until the drive is ready to move data for the current command.
fn poll_transfer() -> Result<(), AtaError> {
    delay_400ns();
    wait_while_busy()?;

    let status = unsafe { inb(ATA_STATUS) };
    if status & ATA_SR_ERR != 0 {
        return Err(AtaError::DeviceError);
    }
    if status & ATA_SR_DF != 0 {
        return Err(AtaError::DriveFault);
    }
    if status & ATA_SR_DRQ == 0 {
        return Err(AtaError::NoData);
    }
    Ok(())
}

/// Selects the master with the LBA high nibble and programs count and the
/// low 24 LBA bits.
fn select(lba: u32, count: u8) {
    unsafe {
        outb(ATA_DRIVE_HEAD, ATA_MASTER_LBA | ((lba >> 24) & 0x0F) as u8);
        outb(ATA_SECTOR_COUNT, count);
        outb(ATA_LBA_LO, lba as u8);
        outb(ATA_LBA_MID, (lba >> 8) as u8);
        outb(ATA_LBA_HI, (lba >> 16) as u8);
    }
}

impl AtaDrive {
    /// Identifies the primary master, distinguishing an empty bus, a
    /// non-ATA device and a drive error.
    pub fn identify() -> Result<AtaDrive, AtaError> {
        unsafe {
            outb(ATA_DRIVE_HEAD, ATA_MASTER_LBA);
            delay_400ns();

            outb(ATA_SECTOR_COUNT, 0);
            outb(ATA_LBA_LO, 0);
            outb(ATA_LBA_MID, 0);
            outb(ATA_LBA_HI, 0);
            outb(ATA_COMMAND, ATA_CMD_IDENTIFY);
            delay_400ns();

            if inb(ATA_STATUS) == 0 {
                return Err(AtaError::NoDevice);
            }
            wait_while_busy()?;

            if inb(ATA_LBA_MID) != 0 || inb(ATA_LBA_HI) != 0 {
                return Err(AtaError::NotAta);
            }

            let mut ready = false;
            for _ in 0..MAX_SPIN {
                let status = inb(ATA_STATUS);
                if status & ATA_SR_ERR != 0 {
                    return Err(AtaError::DeviceError);
                }
                if status & ATA_SR_DRQ != 0 {
                    ready = true;
                    break;
                }
            }
            if !ready {
                return Err(AtaError::Timeout);
            }

            // Drain the 256-word identify block. Words 60..61 carry the
            // 28-bit LBA sector count.
            let mut identify = [0u16; 256];
            for word in identify.iter_mut() {
                *word = inw(ATA_DATA);
            }
            let total_sectors = identify[60] as u32 | ((identify[61] as u32) << 16);

            log::info!("ata: primary master, {} sectors", total_sectors);
            Ok(AtaDrive { total_sectors })
        }
    }

    pub fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    /// Reads `count` sectors starting at `lba` into `buffer`.
    pub fn read_sectors(&self, lba: u32, count: u8, buffer: &mut [u8]) -> Result<(), AtaError> {
        if count == 0 || buffer.len() < count as usize * SECTOR_SIZE {
            return Err(AtaError::InvalidArgument);
        }

        select(lba, count);
        unsafe {
            outb(ATA_COMMAND, ATA_CMD_READ_PIO);

            for sector in 0..count as usize {
                poll_transfer()?;
                for i in 0..SECTOR_SIZE / 2 {
                    let word = inw(ATA_DATA);
                    let offset = sector * SECTOR_SIZE + i * 2;
                    buffer[offset] = word as u8;
                    buffer[offset + 1] = (word >> 8) as u8;
                }
            }
        }
        Ok(())
    }

    /// Writes `count` sectors starting at `lba`, then flushes the drive's
    /// write cache.
    pub fn write_sectors(&mut self, lba: u32, count: u8, buffer: &[u8]) -> Result<(), AtaError> {
        if count == 0 || buffer.len() < count as usize * SECTOR_SIZE {
            return Err(AtaError::InvalidArgument);
        }

        select(lba, count);
        unsafe {
            outb(ATA_COMMAND, ATA_CMD_WRITE_PIO);

            for sector in 0..count as usize {
                poll_transfer()?;
                for i in 0..SECTOR_SIZE / 2 {
                    let offset = sector * SECTOR_SIZE + i * 2;
                    let word = buffer[offset] as u16 | ((buffer[offset + 1] as u16) << 8);
                    outw(ATA_DATA, word);
                }
            }

            outb(ATA_COMMAND, ATA_CMD_CACHE_FLUSH);
        }
        wait_while_busy()
    }
}

impl BlockDevice for AtaDrive {
    fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<(), FsError> {
        self.read_sectors(block_num as u32, 1, buf)
            .map_err(|_| FsError::IOError)
    }

    fn write_block(&mut self, block_num: u64, buf: &[u8]) -> Result<(), FsError> {
        self.write_sectors(block_num as u32, 1, buf)
            .map_err(|_| FsError::IOError)
    }

    fn block_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn total_blocks(&self) -> u64 {
        self.total_sectors as u64
    }
}
