//! Firmware memory map handoff.
//!
//! The boot stage leaves an E820 snapshot at a fixed physical address: a
//! 32-bit entry count followed by the packed entry array. The map is parsed
//! exactly once to seed the frame allocator and is never written back.

use core::fmt;

use static_assertions::const_assert_eq;

#[cfg(target_arch = "x86")]
use crate::constants::memory::{E820_COUNT_ADDR, E820_ENTRIES_ADDR};

/// One record of the firmware memory map, in the layout the BIOS call
/// produces on disk: 64-bit base and length, 32-bit type tag, 32-bit
/// ACPI attribute flags.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct E820Entry {
    pub base: u64,
    pub length: u64,
    pub entry_type: u32,
    pub acpi_attrs: u32,
}

const_assert_eq!(core::mem::size_of::<E820Entry>(), 24);

/// Classification of a physical range.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegionKind {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    Bad,
    Unknown,
}

impl E820Entry {
    pub fn new(base: u64, length: u64, entry_type: u32) -> Self {
        E820Entry {
            base,
            length,
            entry_type,
            acpi_attrs: 0,
        }
    }

    pub fn kind(&self) -> RegionKind {
        match self.entry_type {
            1 => RegionKind::Usable,
            2 => RegionKind::Reserved,
            3 => RegionKind::AcpiReclaimable,
            4 => RegionKind::AcpiNvs,
            5 => RegionKind::Bad,
            _ => RegionKind::Unknown,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.kind() == RegionKind::Usable
    }

    /// First address past the region.
    pub fn end(&self) -> u64 {
        let base = self.base;
        let length = self.length;
        base + length
    }
}

impl fmt::Debug for E820Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.base;
        let length = self.length;
        write!(
            f,
            "{:?} @ {:#010x} ({} KiB)",
            self.kind(),
            base,
            length >> 10
        )
    }
}

/// A borrowed view of the firmware memory map.
#[derive(Clone, Copy)]
pub struct MemoryMap<'a> {
    entries: &'a [E820Entry],
}

impl<'a> MemoryMap<'a> {
    pub fn new(entries: &'a [E820Entry]) -> Self {
        MemoryMap { entries }
    }

    /// Reads the map the bootloader stored at its fixed physical address.
    ///
    /// # Safety
    /// The boot stage must have written a valid count and entry array, and
    /// the region must stay identity-accessible for the kernel's lifetime.
    #[cfg(target_arch = "x86")]
    pub unsafe fn from_bootloader() -> MemoryMap<'static> {
        let count = (E820_COUNT_ADDR as *const u32).read() as usize;
        let entries = core::slice::from_raw_parts(E820_ENTRIES_ADDR as *const E820Entry, count);
        MemoryMap { entries }
    }

    pub fn entries(&self) -> &'a [E820Entry] {
        self.entries
    }

    pub fn usable(&self) -> impl Iterator<Item = &'a E820Entry> {
        let entries = self.entries;
        entries.iter().filter(|e| e.is_usable())
    }

    /// Largest end address across all entries, usable or not.
    pub fn highest_address(&self) -> u64 {
        self.entries.iter().map(|e| e.end()).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mapping_follows_firmware_tags() {
        assert_eq!(E820Entry::new(0, 0, 1).kind(), RegionKind::Usable);
        assert_eq!(E820Entry::new(0, 0, 2).kind(), RegionKind::Reserved);
        assert_eq!(E820Entry::new(0, 0, 3).kind(), RegionKind::AcpiReclaimable);
        assert_eq!(E820Entry::new(0, 0, 4).kind(), RegionKind::AcpiNvs);
        assert_eq!(E820Entry::new(0, 0, 5).kind(), RegionKind::Bad);
        assert_eq!(E820Entry::new(0, 0, 77).kind(), RegionKind::Unknown);
    }

    #[test]
    fn highest_address_spans_all_entries() {
        let entries = [
            E820Entry::new(0, 0x9F000, 1),
            E820Entry::new(0x100000, 0x700000, 1),
            E820Entry::new(0xFFFC0000, 0x40000, 2),
        ];
        let map = MemoryMap::new(&entries);
        assert_eq!(map.highest_address(), 0x1_0000_0000);
        assert_eq!(map.usable().count(), 2);
    }
}
