pub const PAGE_SIZE: usize = 4096;
pub const FRAME_SIZE: usize = 4096;

/// Highest physical address the frame bitmap can describe.
pub const MAX_PHYS_MEMORY: u64 = 256 * 1024 * 1024;

/// Number of frames covered by a full bitmap.
pub const MAX_FRAMES: usize = (MAX_PHYS_MEMORY / FRAME_SIZE as u64) as usize;

/// Frames below the first megabyte stay reserved no matter what the firmware
/// map claims: IVT, BIOS data, the E820 map itself, IDT, kernel image.
pub const LOW_MEMORY_FRAMES: usize = (1024 * 1024) / FRAME_SIZE;

/// End of the identity-mapped low region, exclusive.
pub const IDENTITY_MAP_END: u32 = 0x40_0000;

/// The heap occupies a fixed virtual range right above the identity-mapped
/// region and grows upward by whole pages.
pub const HEAP_START: usize = 0x40_0000;
pub const HEAP_INITIAL_PAGES: usize = 4;
pub const HEAP_MAX_PAGES: usize = 256;

/// Where the bootloader leaves the firmware memory map: a 32-bit entry count
/// followed by the packed entry array.
pub const E820_COUNT_ADDR: usize = 0x8000;
pub const E820_ENTRIES_ADDR: usize = 0x8004;
