//! FAT16 filesystem driver.
//!
//! On-disk layout, in order: boot sector with the BPB, remaining reserved
//! sectors, the FAT copies, the fixed-size root directory, then the data
//! region whose first cluster is number 2. A file is a chain of clusters
//! linked through the FAT; values at or above 0xFFF8 terminate a chain and
//! 0 marks a free cluster.
//!
//! All operations work on the root directory (subdirectory traversal is out
//! of scope) and persist every mutation sector by sector as it happens.
//! FAT writes are mirrored to every copy.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::min;

use super::{BlockDevice, DirEntry, FileMetadata, FsError};

mod boot_sector;
mod constants;
mod dir_entry;
mod fat_entry;

pub use boot_sector::BootSector;
use constants::*;
pub use dir_entry::{to_83, DirEntry83};
pub use fat_entry::FatEntry;

/// A mounted FAT16 volume.
pub struct Fat16 {
    /// Underlying block device.
    pub device: Box<dyn BlockDevice>,
    /// BPB snapshot taken at mount.
    boot_sector: BootSector,
    /// First LBA of FAT copy #1.
    fat_start: u64,
    /// First LBA of the root directory.
    root_dir_start: u64,
    /// Sectors the root directory occupies.
    root_dir_sectors: u64,
    /// First LBA of the data region (cluster 2).
    data_start: u64,
    /// Bytes per cluster.
    cluster_size: usize,
}

impl core::fmt::Debug for Fat16 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Fat16")
            .field("boot_sector", &self.boot_sector)
            .field("fat_start", &self.fat_start)
            .field("root_dir_start", &self.root_dir_start)
            .field("root_dir_sectors", &self.root_dir_sectors)
            .field("data_start", &self.data_start)
            .field("cluster_size", &self.cluster_size)
            .finish()
    }
}

impl Fat16 {
    /// Mounts the volume: validate the boot signature and BPB, then derive
    /// the layout constants every other operation uses.
    pub fn mount(device: Box<dyn BlockDevice>) -> Result<Self, FsError> {
        let mut sector = vec![0u8; SECTOR_SIZE];
        device.read_block(0, &mut sector)?;

        if sector[510] != 0x55 || sector[511] != 0xAA {
            return Err(FsError::InvalidVolume);
        }

        let boot_sector =
            unsafe { core::ptr::read_unaligned(sector.as_ptr() as *const BootSector) };

        let bytes_per_sector = boot_sector.bytes_per_sector;
        if bytes_per_sector as usize != SECTOR_SIZE {
            return Err(FsError::InvalidVolume);
        }
        if boot_sector.sectors_per_cluster == 0 {
            return Err(FsError::InvalidVolume);
        }
        if boot_sector.fat_count == 0 {
            return Err(FsError::InvalidVolume);
        }

        let fs = Fat16 {
            fat_start: boot_sector.fat_start(),
            root_dir_start: boot_sector.root_dir_start(),
            root_dir_sectors: boot_sector.root_dir_sectors(),
            data_start: boot_sector.data_start(),
            cluster_size: boot_sector.cluster_size(),
            boot_sector,
            device,
        };
        log::debug!(
            "fat16: {} sectors, {} per cluster, data at {}",
            fs.total_sectors(),
            fs.boot_sector.sectors_per_cluster,
            fs.data_start
        );
        Ok(fs)
    }

    /// Writes a fresh FAT16 layout onto `device` and mounts it: BPB with
    /// boot signature, reserved FAT head entries, zeroed FATs, empty root
    /// directory.
    pub fn format(mut device: Box<dyn BlockDevice>) -> Result<Self, FsError> {
        let total_blocks = device.total_blocks();
        if device.block_size() != SECTOR_SIZE {
            return Err(FsError::InvalidVolume);
        }

        let sectors_per_cluster = FORMAT_SECTORS_PER_CLUSTER;
        let reserved_sectors = FORMAT_RESERVED_SECTORS;
        let fat_count = FORMAT_FAT_COUNT;
        let root_dir_entries = FORMAT_ROOT_ENTRIES;
        let root_dir_sectors = (root_dir_entries as usize * DIR_ENTRY_SIZE).div_ceil(SECTOR_SIZE);

        let total_clusters = (total_blocks as usize - reserved_sectors as usize - root_dir_sectors)
            / sectors_per_cluster as usize;
        let sectors_per_fat = (total_clusters * FAT_ENTRY_SIZE).div_ceil(SECTOR_SIZE);

        let boot_sector = BootSector {
            jump_boot: [0xEB, 0x3C, 0x90],
            oem_name: *b"MINOS1.0",
            bytes_per_sector: SECTOR_SIZE as u16,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            root_dir_entries,
            total_sectors_16: if total_blocks < 65536 {
                total_blocks as u16
            } else {
                0
            },
            media_type: 0xF8, // fixed disk
            sectors_per_fat: sectors_per_fat as u16,
            sectors_per_track: 63,
            head_count: 255,
            hidden_sectors: 0,
            total_sectors_32: if total_blocks >= 65536 {
                total_blocks as u32
            } else {
                0
            },
            drive_number: 0x80,
            reserved1: 0,
            boot_signature: 0x29,
            volume_id: 0x1A2B3C4D,
            volume_label: *b"NO NAME    ",
            fs_type: *b"FAT16   ",
        };

        let mut sector = vec![0u8; SECTOR_SIZE];
        let raw = unsafe {
            core::slice::from_raw_parts(
                &boot_sector as *const BootSector as *const u8,
                core::mem::size_of::<BootSector>(),
            )
        };
        sector[..raw.len()].copy_from_slice(raw);
        sector[510] = 0x55;
        sector[511] = 0xAA;
        device.write_block(0, &sector)?;

        // Head of each FAT: media descriptor in entry 0, end-of-chain in
        // entry 1, both reserved.
        sector.fill(0);
        sector[0] = boot_sector.media_type;
        sector[1] = 0xFF;
        sector[2] = 0xFF;
        sector[3] = 0xFF;
        for copy in 0..fat_count as u64 {
            let fat_start = reserved_sectors as u64 + copy * sectors_per_fat as u64;
            device.write_block(fat_start, &sector)?;
        }

        sector.fill(0);
        for copy in 0..fat_count as u64 {
            let fat_start = reserved_sectors as u64 + copy * sectors_per_fat as u64;
            for s in 1..sectors_per_fat as u64 {
                device.write_block(fat_start + s, &sector)?;
            }
        }

        let root_dir_start = reserved_sectors as u64 + fat_count as u64 * sectors_per_fat as u64;
        for s in 0..root_dir_sectors as u64 {
            device.write_block(root_dir_start + s, &sector)?;
        }

        Fat16::mount(device)
    }

    pub fn total_sectors(&self) -> u64 {
        self.boot_sector.total_sectors()
    }

    pub fn fat_start(&self) -> u64 {
        self.fat_start
    }

    pub fn sectors_per_fat(&self) -> u64 {
        self.boot_sector.sectors_per_fat as u64
    }

    pub fn root_dir_start(&self) -> u64 {
        self.root_dir_start
    }

    pub fn root_dir_sectors(&self) -> u64 {
        self.root_dir_sectors
    }

    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    fn sectors_per_cluster(&self) -> u64 {
        self.boot_sector.sectors_per_cluster as u64
    }

    /// Clusters the data region can hold.
    fn total_clusters(&self) -> u32 {
        ((self.total_sectors().saturating_sub(self.data_start)) / self.sectors_per_cluster()) as u32
    }

    /// First sector of `cluster` in the data region.
    pub fn cluster_to_lba(&self, cluster: u16) -> u64 {
        self.data_start + (cluster as u64 - 2) * self.sectors_per_cluster()
    }

    /// Reads the FAT entry for `cluster` from FAT copy #1.
    fn read_fat_entry(&self, cluster: u16) -> Result<FatEntry, FsError> {
        let offset = cluster as u64 * FAT_ENTRY_SIZE as u64;
        let sector = self.fat_start + offset / SECTOR_SIZE as u64;
        let sector_offset = (offset % SECTOR_SIZE as u64) as usize;

        let mut data = vec![0u8; SECTOR_SIZE];
        self.device.read_block(sector, &mut data)?;

        Ok(FatEntry {
            cluster: u16::from_le_bytes([data[sector_offset], data[sector_offset + 1]]),
        })
    }

    /// Writes the FAT entry for `cluster`, mirrored to every FAT copy.
    fn write_fat_entry(&mut self, cluster: u16, entry: FatEntry) -> Result<(), FsError> {
        let offset = cluster as u64 * FAT_ENTRY_SIZE as u64;
        let sector = self.fat_start + offset / SECTOR_SIZE as u64;
        let sector_offset = (offset % SECTOR_SIZE as u64) as usize;

        let mut data = vec![0u8; SECTOR_SIZE];
        self.device.read_block(sector, &mut data)?;

        let bytes = entry.cluster.to_le_bytes();
        data[sector_offset] = bytes[0];
        data[sector_offset + 1] = bytes[1];

        let fat_count = self.boot_sector.fat_count as u64;
        let sectors_per_fat = self.sectors_per_fat();
        for copy in 0..fat_count {
            self.device
                .write_block(sector + copy * sectors_per_fat, &data)?;
        }
        Ok(())
    }

    /// Claims the first free cluster, marking it end-of-chain. The caller
    /// relinks the predecessor when appending to an existing chain.
    fn alloc_cluster(&mut self) -> Result<u16, FsError> {
        let limit = FIRST_DATA_CLUSTER as u32 + self.total_clusters();
        for cluster in FIRST_DATA_CLUSTER as u32..limit {
            let cluster = cluster as u16;
            if self.read_fat_entry(cluster)?.is_free() {
                self.write_fat_entry(cluster, FatEntry::END_OF_CHAIN)?;
                return Ok(cluster);
            }
        }
        Err(FsError::NoSpace)
    }

    /// Frees a whole chain. The successor is read before the entry is
    /// zeroed; the walk stops at an end-of-chain or invalid value.
    fn free_chain(&mut self, start: u16) -> Result<(), FsError> {
        let mut cluster = start;
        while (FatEntry { cluster }).is_chain_link() {
            let next = self.read_fat_entry(cluster)?.cluster;
            self.write_fat_entry(cluster, FatEntry::FREE)?;
            cluster = next;
        }
        Ok(())
    }

    /// Locates `name83` in the root directory, returning a copy of the
    /// entry plus the (sector, index) of its slot. A first byte of 0x00
    /// ends the scan; deleted, long-filename and volume-label entries are
    /// skipped.
    fn find_in_root(&self, name83: &[u8; 11]) -> Result<(DirEntry83, u64, usize), FsError> {
        let mut sector_buf = vec![0u8; SECTOR_SIZE];
        for sec in 0..self.root_dir_sectors {
            self.device
                .read_block(self.root_dir_start + sec, &mut sector_buf)?;
            for i in 0..ENTRIES_PER_SECTOR {
                let entry = unsafe {
                    &*(sector_buf.as_ptr().add(i * DIR_ENTRY_SIZE) as *const DirEntry83)
                };
                if entry.is_free() {
                    return Err(FsError::NotFound);
                }
                if entry.is_deleted() || entry.is_long_name() || entry.is_volume_label() {
                    continue;
                }
                if entry.matches(name83) {
                    return Ok((*entry, self.root_dir_start + sec, i));
                }
            }
        }
        Err(FsError::NotFound)
    }

    /// First never-used or deleted root slot.
    fn find_free_slot(&self) -> Result<(u64, usize), FsError> {
        let mut sector_buf = vec![0u8; SECTOR_SIZE];
        for sec in 0..self.root_dir_sectors {
            self.device
                .read_block(self.root_dir_start + sec, &mut sector_buf)?;
            for i in 0..ENTRIES_PER_SECTOR {
                let entry = unsafe {
                    &*(sector_buf.as_ptr().add(i * DIR_ENTRY_SIZE) as *const DirEntry83)
                };
                if entry.is_free() || entry.is_deleted() {
                    return Ok((self.root_dir_start + sec, i));
                }
            }
        }
        Err(FsError::DirectoryFull)
    }

    /// Writes `entry` into the root slot at (sector, index).
    fn write_root_slot(
        &mut self,
        slot_sector: u64,
        slot_index: usize,
        entry: DirEntry83,
    ) -> Result<(), FsError> {
        let mut sector_buf = vec![0u8; SECTOR_SIZE];
        self.device.read_block(slot_sector, &mut sector_buf)?;
        unsafe {
            *(sector_buf.as_mut_ptr().add(slot_index * DIR_ENTRY_SIZE) as *mut DirEntry83) = entry;
        }
        self.device.write_block(slot_sector, &sector_buf)
    }

    /// File size from the directory entry, without reading any data.
    pub fn file_size(&self, name: &str) -> Result<u32, FsError> {
        let name83 = to_83(name)?;
        let (entry, _, _) = self.find_in_root(&name83)?;
        let size = entry.file_size;
        Ok(size)
    }

    /// Reads `name` into `buffer`, truncating at the smaller of the file
    /// size and the buffer length. Returns the bytes copied.
    pub fn read_file(&self, name: &str, buffer: &mut [u8]) -> Result<usize, FsError> {
        let name83 = to_83(name)?;
        let (entry, _, _) = self.find_in_root(&name83)?;
        if entry.is_directory() {
            return Err(FsError::NotSupported);
        }

        let file_size = entry.file_size as usize;
        let to_read = min(file_size, buffer.len());

        let mut cluster = entry.cluster_low;
        let mut bytes_read = 0;
        let mut sector_buf = vec![0u8; SECTOR_SIZE];

        while bytes_read < to_read {
            if !(FatEntry { cluster }).is_chain_link() {
                break;
            }
            let lba = self.cluster_to_lba(cluster);
            let mut s = 0;
            while s < self.sectors_per_cluster() && bytes_read < to_read {
                self.device.read_block(lba + s, &mut sector_buf)?;
                let chunk = min(to_read - bytes_read, SECTOR_SIZE);
                buffer[bytes_read..bytes_read + chunk].copy_from_slice(&sector_buf[..chunk]);
                bytes_read += chunk;
                s += 1;
            }
            cluster = self.read_fat_entry(cluster)?.cluster;
        }

        Ok(bytes_read)
    }

    /// Creates `name` holding `data`, overwriting any existing file of the
    /// same name. Empty data produces an entry with no cluster chain.
    pub fn create_file(&mut self, name: &str, data: &[u8]) -> Result<(), FsError> {
        let name83 = to_83(name)?;

        match self.delete(name) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(err) => return Err(err),
        }

        // Pick the slot before touching the FAT so a full directory fails
        // before any clusters move.
        let (slot_sector, slot_index) = self.find_free_slot()?;

        let first_cluster = if data.is_empty() {
            0
        } else {
            let mut first = 0u16;
            if let Err(err) = self.write_chain(data, &mut first) {
                if first >= FIRST_DATA_CLUSTER {
                    let _ = self.free_chain(first);
                }
                return Err(err);
            }
            first
        };

        let entry = DirEntry83::new_file(name83, first_cluster, data.len() as u32);
        self.write_root_slot(slot_sector, slot_index, entry)
    }

    /// Allocates and links the chain for `data`, zero-padding the tail
    /// sector. `first_cluster` is updated as soon as the head exists so the
    /// caller can free a partial chain on failure.
    fn write_chain(&mut self, data: &[u8], first_cluster: &mut u16) -> Result<(), FsError> {
        let clusters_needed = data.len().div_ceil(self.cluster_size);
        let mut prev_cluster = 0u16;
        let mut written = 0usize;
        let mut sector_buf = vec![0u8; SECTOR_SIZE];

        for _ in 0..clusters_needed {
            // Already marked end-of-chain; relinked below when another
            // cluster follows.
            let cluster = self.alloc_cluster()?;
            if *first_cluster == 0 {
                *first_cluster = cluster;
            }
            if prev_cluster != 0 {
                self.write_fat_entry(prev_cluster, FatEntry { cluster })?;
            }

            let lba = self.cluster_to_lba(cluster);
            let mut s = 0;
            while s < self.sectors_per_cluster() && written < data.len() {
                sector_buf.fill(0);
                let chunk = min(data.len() - written, SECTOR_SIZE);
                sector_buf[..chunk].copy_from_slice(&data[written..written + chunk]);
                self.device.write_block(lba + s, &sector_buf)?;
                written += chunk;
                s += 1;
            }

            prev_cluster = cluster;
        }
        Ok(())
    }

    /// Deletes `name`: free its chain, then mark the slot 0xE5.
    pub fn delete(&mut self, name: &str) -> Result<(), FsError> {
        let name83 = to_83(name)?;
        let (entry, slot_sector, slot_index) = self.find_in_root(&name83)?;

        let cluster = entry.cluster_low;
        if cluster >= FIRST_DATA_CLUSTER {
            self.free_chain(cluster)?;
        }

        let mut sector_buf = vec![0u8; SECTOR_SIZE];
        self.device.read_block(slot_sector, &mut sector_buf)?;
        sector_buf[slot_index * DIR_ENTRY_SIZE] = DELETED_ENTRY_MARKER;
        self.device.write_block(slot_sector, &sector_buf)
    }

    /// Creates an empty directory: one end-of-chain cluster initialized
    /// with `.` and `..`, then a root entry. The cluster is released again
    /// if anything past its allocation fails.
    pub fn mkdir(&mut self, name: &str) -> Result<(), FsError> {
        let name83 = to_83(name)?;
        if self.find_in_root(&name83).is_ok() {
            return Err(FsError::AlreadyExists);
        }

        let cluster = self.alloc_cluster()?;

        if let Err(err) = self.init_directory_cluster(cluster) {
            let _ = self.free_chain(cluster);
            return Err(err);
        }

        let slot = match self.find_free_slot() {
            Ok(slot) => slot,
            Err(err) => {
                let _ = self.free_chain(cluster);
                return Err(err);
            }
        };
        let entry = DirEntry83::new_directory(name83, cluster);
        if let Err(err) = self.write_root_slot(slot.0, slot.1, entry) {
            let _ = self.free_chain(cluster);
            return Err(err);
        }
        Ok(())
    }

    /// Zeroes every sector of a fresh directory cluster and writes `.` and
    /// `..` as the first two entries.
    fn init_directory_cluster(&mut self, cluster: u16) -> Result<(), FsError> {
        let lba = self.cluster_to_lba(cluster);
        let mut sector_buf = vec![0u8; SECTOR_SIZE];

        unsafe {
            *(sector_buf.as_mut_ptr() as *mut DirEntry83) = DirEntry83::dot_entry(cluster);
            *(sector_buf.as_mut_ptr().add(DIR_ENTRY_SIZE) as *mut DirEntry83) =
                DirEntry83::dot_dot_entry();
        }
        self.device.write_block(lba, &sector_buf)?;

        sector_buf.fill(0);
        for s in 1..self.sectors_per_cluster() {
            self.device.write_block(lba + s, &sector_buf)?;
        }
        Ok(())
    }

    /// Lists the visible root entries: deleted, long-filename and
    /// volume-label slots are skipped, 0x00 ends the directory.
    pub fn list_root(&self) -> Result<Vec<DirEntry>, FsError> {
        let mut entries = Vec::new();
        let mut sector_buf = vec![0u8; SECTOR_SIZE];

        'scan: for sec in 0..self.root_dir_sectors {
            self.device
                .read_block(self.root_dir_start + sec, &mut sector_buf)?;
            for i in 0..ENTRIES_PER_SECTOR {
                let entry = unsafe {
                    &*(sector_buf.as_ptr().add(i * DIR_ENTRY_SIZE) as *const DirEntry83)
                };
                if entry.is_free() {
                    break 'scan;
                }
                if entry.is_deleted() || entry.is_long_name() || entry.is_volume_label() {
                    continue;
                }
                entries.push(DirEntry {
                    name: entry.display_name(),
                    metadata: FileMetadata {
                        size: entry.file_size as u64,
                        is_dir: entry.is_directory(),
                        read_only: entry.is_read_only(),
                    },
                });
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesys::block::memory::MemoryBlockDevice;

    /// 4096 sectors of 512 bytes with the format defaults gives the
    /// geometry the driver is specified against: 1 reserved sector, two
    /// 16-sector FATs, 512 root entries in 32 sectors, data from LBA 65.
    const TEST_SECTORS: u64 = 4096;

    fn fresh_volume() -> Fat16 {
        let device = Box::new(MemoryBlockDevice::new(TEST_SECTORS, SECTOR_SIZE));
        Fat16::format(device).unwrap()
    }

    fn read_sector(fs: &Fat16, lba: u64) -> Vec<u8> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        fs.device.read_block(lba, &mut buf).unwrap();
        buf
    }

    fn entry_of(fs: &Fat16, name: &str) -> DirEntry83 {
        let (entry, _, _) = fs.find_in_root(&to_83(name).unwrap()).unwrap();
        entry
    }

    #[test]
    fn format_produces_the_expected_geometry() {
        let fs = fresh_volume();
        assert_eq!(fs.fat_start(), 1);
        assert_eq!(fs.sectors_per_fat(), 16);
        assert_eq!(fs.root_dir_start(), 33);
        assert_eq!(fs.root_dir_sectors(), 32);
        assert_eq!(fs.data_start(), 65);

        let sector0 = read_sector(&fs, 0);
        assert_eq!(sector0[510], 0x55);
        assert_eq!(sector0[511], 0xAA);
    }

    #[test]
    fn mount_rejects_a_blank_device() {
        let device = Box::new(MemoryBlockDevice::new(64, SECTOR_SIZE));
        assert_eq!(Fat16::mount(device).unwrap_err(), FsError::InvalidVolume);
    }

    #[test]
    fn mount_rejects_a_corrupt_bpb() {
        let device = Box::new(MemoryBlockDevice::new(TEST_SECTORS, SECTOR_SIZE));
        let mut fs = Fat16::format(device).unwrap();

        // Zero out sectors-per-cluster in place and re-mount.
        let mut sector0 = read_sector(&fs, 0);
        sector0[13] = 0;
        fs.device.write_block(0, &sector0).unwrap();
        assert_eq!(Fat16::mount(fs.device).unwrap_err(), FsError::InvalidVolume);
    }

    #[test]
    fn small_file_round_trip() {
        let mut fs = fresh_volume();
        fs.create_file("HELLO.TXT", b"hi").unwrap();

        let mut out = [0u8; 16];
        let read = fs.read_file("hello.txt", &mut out).unwrap();
        assert_eq!(read, 2);
        assert_eq!(&out[..2], b"hi");

        let entry = entry_of(&fs, "hello.txt");
        assert_eq!(&entry.name, b"HELLO   ");
        assert_eq!(&entry.ext, b"TXT");
        let attributes = entry.attributes;
        assert_eq!(attributes, ATTR_ARCHIVE);
        let size = entry.file_size;
        assert_eq!(size, 2);
        let cluster = entry.cluster_low;
        assert!(cluster >= FIRST_DATA_CLUSTER);
    }

    #[test]
    fn multi_cluster_file_chains_three_clusters() {
        let mut fs = fresh_volume();
        let data: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        fs.create_file("A", &data).unwrap();

        let entry = entry_of(&fs, "A");
        let first = entry.cluster_low;
        let second = fs.read_fat_entry(first).unwrap();
        assert!(second.is_chain_link());
        let third = fs.read_fat_entry(second.cluster).unwrap();
        assert!(third.is_chain_link());
        assert!(fs.read_fat_entry(third.cluster).unwrap().is_end_of_chain());

        let mut out = vec![0u8; 2048];
        assert_eq!(fs.read_file("A", &mut out).unwrap(), 1500);
        assert_eq!(&out[..1500], &data[..]);
        // The tail sector past the payload was zero-padded on disk.
        let tail = read_sector(&fs, fs.cluster_to_lba(third.cluster));
        assert!(tail[1500 - 1024..].iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_file_create_then_delete() {
        let mut fs = fresh_volume();
        fs.create_file("X", b"").unwrap();

        let entry = entry_of(&fs, "X");
        let cluster = entry.cluster_low;
        let size = entry.file_size;
        assert_eq!(cluster, 0);
        assert_eq!(size, 0);

        fs.delete("X").unwrap();
        let mut out = [0u8; 4];
        assert_eq!(fs.read_file("X", &mut out).unwrap_err(), FsError::NotFound);
        assert_eq!(fs.delete("X").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn mkdir_initializes_dot_entries() {
        let mut fs = fresh_volume();
        fs.mkdir("DOCS").unwrap();

        let entry = entry_of(&fs, "DOCS");
        assert_eq!(&entry.name, b"DOCS    ");
        assert_eq!(&entry.ext, b"   ");
        let attributes = entry.attributes;
        assert_eq!(attributes, ATTR_DIRECTORY);
        let size = entry.file_size;
        assert_eq!(size, 0);
        let cluster = entry.cluster_low;
        assert!(cluster >= FIRST_DATA_CLUSTER);
        assert!(fs.read_fat_entry(cluster).unwrap().is_end_of_chain());

        let sector = read_sector(&fs, fs.cluster_to_lba(cluster));
        let dot = unsafe { &*(sector.as_ptr() as *const DirEntry83) };
        let dot_dot = unsafe { &*(sector.as_ptr().add(DIR_ENTRY_SIZE) as *const DirEntry83) };

        assert_eq!(&dot.name, b".       ");
        let dot_cluster = dot.cluster_low;
        assert_eq!(dot_cluster, cluster);
        assert!(dot.is_directory());

        assert_eq!(&dot_dot.name, b"..      ");
        let dot_dot_cluster = dot_dot.cluster_low;
        assert_eq!(dot_dot_cluster, 0);
        assert!(dot_dot.is_directory());

        assert_eq!(fs.mkdir("DOCS").unwrap_err(), FsError::AlreadyExists);
    }

    #[test]
    fn delete_frees_clusters_for_reuse() {
        let mut fs = fresh_volume();
        fs.create_file("A.BIN", &[1u8; 600]).unwrap();
        let first = {
            let entry = entry_of(&fs, "A.BIN");
            entry.cluster_low
        };

        fs.delete("A.BIN").unwrap();
        assert_eq!(
            fs.find_in_root(&to_83("A.BIN").unwrap()).unwrap_err(),
            FsError::NotFound
        );
        assert!(fs.read_fat_entry(first).unwrap().is_free());

        // The linear scan hands the same clusters to the next file.
        fs.create_file("B.BIN", &[2u8; 600]).unwrap();
        let entry = entry_of(&fs, "B.BIN");
        let reused = entry.cluster_low;
        assert_eq!(reused, first);
    }

    #[test]
    fn fat_copies_stay_mirrored() {
        let mut fs = fresh_volume();
        fs.create_file("M.TXT", &[7u8; 1300]).unwrap();
        fs.mkdir("D").unwrap();
        fs.delete("M.TXT").unwrap();

        for s in 0..fs.sectors_per_fat() {
            let fat1 = read_sector(&fs, fs.fat_start() + s);
            let fat2 = read_sector(&fs, fs.fat_start() + fs.sectors_per_fat() + s);
            assert_eq!(fat1, fat2, "FAT copies diverge at sector {}", s);
        }
    }

    #[test]
    fn overwrite_keeps_a_single_entry() {
        let mut fs = fresh_volume();
        fs.create_file("LOG.TXT", b"first version").unwrap();
        fs.create_file("LOG.TXT", b"second").unwrap();

        let mut out = [0u8; 32];
        assert_eq!(fs.read_file("LOG.TXT", &mut out).unwrap(), 6);
        assert_eq!(&out[..6], b"second");

        let matching = fs
            .list_root()
            .unwrap()
            .into_iter()
            .filter(|e| e.name == "LOG.TXT")
            .count();
        assert_eq!(matching, 1);
    }

    #[test]
    fn read_truncates_to_the_caller_buffer() {
        let mut fs = fresh_volume();
        let data: Vec<u8> = (0..100u8).collect();
        fs.create_file("T", &data).unwrap();

        let mut out = [0u8; 10];
        assert_eq!(fs.read_file("T", &mut out).unwrap(), 10);
        assert_eq!(&out[..], &data[..10]);
    }

    #[test]
    fn read_file_rejects_directories() {
        let mut fs = fresh_volume();
        fs.mkdir("SUB").unwrap();
        let mut out = [0u8; 4];
        assert_eq!(
            fs.read_file("SUB", &mut out).unwrap_err(),
            FsError::NotSupported
        );
    }

    #[test]
    fn file_size_reads_the_entry_only() {
        let mut fs = fresh_volume();
        fs.create_file("S.DAT", &[0u8; 777]).unwrap();
        assert_eq!(fs.file_size("s.dat").unwrap(), 777);
        assert_eq!(fs.file_size("missing").unwrap_err(), FsError::NotFound);
    }

    #[test]
    fn list_root_reports_visible_entries() {
        let mut fs = fresh_volume();
        fs.create_file("ONE.TXT", b"1").unwrap();
        fs.create_file("TWO.TXT", b"22").unwrap();
        fs.mkdir("DIR").unwrap();
        fs.delete("ONE.TXT").unwrap();

        let entries = fs.list_root().unwrap();
        assert_eq!(entries.len(), 2);

        let two = entries.iter().find(|e| e.name == "TWO.TXT").unwrap();
        assert_eq!(two.metadata.size, 2);
        assert!(!two.metadata.is_dir);

        let dir = entries.iter().find(|e| e.name == "DIR").unwrap();
        assert!(dir.metadata.is_dir);
        assert_eq!(dir.metadata.size, 0);
    }

    #[test]
    fn four_kib_file_on_a_sixteen_mib_image() {
        let device = Box::new(MemoryBlockDevice::new(32 * 1024, SECTOR_SIZE));
        let mut fs = Fat16::format(device).unwrap();

        let data: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 256) as u8).collect();
        fs.create_file("BIG.DAT", &data).unwrap();

        let mut out = vec![0u8; 4096];
        assert_eq!(fs.read_file("big.dat", &mut out).unwrap(), 4096);
        assert_eq!(out, data);
    }

    #[test]
    fn disk_full_surfaces_no_space() {
        // 80 sectors: 1 reserved, two 1-sector FATs, 32 root sectors,
        // data from LBA 35 leaves 45 clusters.
        let device = Box::new(MemoryBlockDevice::new(80, SECTOR_SIZE));
        let mut fs = Fat16::format(device).unwrap();

        fs.create_file("FILL", &vec![9u8; 45 * SECTOR_SIZE]).unwrap();
        assert_eq!(
            fs.create_file("MORE", b"x").unwrap_err(),
            FsError::NoSpace
        );
        // The failed create left no directory entry behind.
        assert_eq!(
            fs.find_in_root(&to_83("MORE").unwrap()).unwrap_err(),
            FsError::NotFound
        );
    }

    #[test]
    fn failed_create_releases_its_partial_chain() {
        let device = Box::new(MemoryBlockDevice::new(80, SECTOR_SIZE));
        let mut fs = Fat16::format(device).unwrap();

        // 46 clusters needed, 45 available: fails after claiming 45.
        assert_eq!(
            fs.create_file("BIG", &vec![1u8; 46 * SECTOR_SIZE]).unwrap_err(),
            FsError::NoSpace
        );

        // Every cluster is free again and usable by the next file.
        for cluster in 2..47u16 {
            assert!(fs.read_fat_entry(cluster).unwrap().is_free());
        }
        fs.create_file("OK.BIN", &[5u8; 512]).unwrap();
        let entry = entry_of(&fs, "OK.BIN");
        let cluster = entry.cluster_low;
        assert_eq!(cluster, 2);
    }
}
