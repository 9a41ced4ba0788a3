//! In-memory block device.
//!
//! Doubles as a ramdisk in the kernel and as the simulated disk the hosted
//! filesystem tests run against.

use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;
use core::result::Result;

use crate::filesys::{BlockDevice, FsError};

pub struct MemoryBlockDevice {
    /// All blocks back to back in one allocation.
    data: Vec<u8>,
    block_size: usize,
}

impl MemoryBlockDevice {
    pub fn new(total_blocks: u64, block_size: usize) -> Self {
        Self {
            data: vec![0; total_blocks as usize * block_size],
            block_size,
        }
    }

    /// Byte range of `block_num`, bounds-checked.
    fn block_range(&self, block_num: u64, buf_len: usize) -> Result<Range<usize>, FsError> {
        if buf_len != self.block_size {
            return Err(FsError::IOError);
        }
        let start = block_num as usize * self.block_size;
        let end = start + self.block_size;
        if end > self.data.len() {
            return Err(FsError::IOError);
        }
        Ok(start..end)
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn read_block(&self, block_num: u64, buf: &mut [u8]) -> Result<(), FsError> {
        let range = self.block_range(block_num, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_block(&mut self, block_num: u64, buf: &[u8]) -> Result<(), FsError> {
        let range = self.block_range(block_num, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> u64 {
        (self.data.len() / self.block_size) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_independent() {
        let mut device = MemoryBlockDevice::new(4, 512);
        let pattern = [0xABu8; 512];
        device.write_block(2, &pattern).unwrap();

        let mut out = [0u8; 512];
        device.read_block(2, &mut out).unwrap();
        assert_eq!(out, pattern);

        device.read_block(1, &mut out).unwrap();
        assert_eq!(out, [0u8; 512]);
    }

    #[test]
    fn out_of_range_and_short_buffers_error() {
        let mut device = MemoryBlockDevice::new(4, 512);
        let mut out = [0u8; 512];
        assert_eq!(device.read_block(4, &mut out).unwrap_err(), FsError::IOError);
        assert_eq!(device.write_block(0, &[0u8; 100]).unwrap_err(), FsError::IOError);
    }
}
