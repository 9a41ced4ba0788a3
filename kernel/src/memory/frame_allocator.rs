//! Bitmap physical frame allocator.
//!
//! Every 4 KiB frame of physical memory is one bit: set = in use or outside
//! any usable region. The bitmap is seeded once from the firmware memory map
//! and lives for the kernel's lifetime. Unlike the heap, this allocator runs
//! before any heap exists, so the bitmap is a fixed inline array.

use spin::Mutex;

use crate::boot::MemoryMap;
use crate::constants::memory::{FRAME_SIZE, LOW_MEMORY_FRAMES, MAX_FRAMES, MAX_PHYS_MEMORY};
use crate::memory::addr::PhysAddr;

const BITMAP_ENTRY_BITS: usize = 64;
const BITMAP_WORDS: usize = MAX_FRAMES / BITMAP_ENTRY_BITS;

/// Process-wide allocator instance, populated once by [`init`].
pub static FRAME_ALLOCATOR: Mutex<Option<FrameAllocator>> = Mutex::new(None);

pub struct FrameAllocator {
    /// Frames covered by the bitmap (top of physical memory / 4 KiB).
    total_frames: usize,
    /// Frames currently marked used, low-memory reservation included.
    used_frames: usize,
    bitmap: [u64; BITMAP_WORDS],
}

impl FrameAllocator {
    /// Builds the bitmap from the firmware memory map: mark everything used,
    /// clear the frames of each usable region, then re-reserve the first
    /// megabyte whatever the map said about it.
    pub fn new(memory_map: &MemoryMap) -> Self {
        let mut max_addr = memory_map.highest_address();
        if max_addr > MAX_PHYS_MEMORY {
            max_addr = MAX_PHYS_MEMORY;
        }
        let total_frames = (max_addr / FRAME_SIZE as u64) as usize;

        let mut allocator = FrameAllocator {
            total_frames,
            used_frames: total_frames,
            bitmap: [u64::MAX; BITMAP_WORDS],
        };

        for entry in memory_map.usable() {
            let mut base = entry.base;
            let mut length = entry.length;

            // Round the base up to a frame boundary. A region shorter than
            // the rounding offset holds no complete frame.
            let misalign = base % FRAME_SIZE as u64;
            if misalign != 0 {
                let offset = FRAME_SIZE as u64 - misalign;
                if offset >= length {
                    continue;
                }
                base += offset;
                length -= offset;
            }

            let start_frame = (base / FRAME_SIZE as u64) as usize;
            let frame_count = (length / FRAME_SIZE as u64) as usize;
            for frame in start_frame..start_frame + frame_count {
                if frame >= total_frames {
                    break;
                }
                allocator.clear_bit(frame);
                // Overlapping usable regions may clear a frame twice; the
                // counter saturates rather than wrapping.
                allocator.used_frames = allocator.used_frames.saturating_sub(1);
            }
        }

        for frame in 0..LOW_MEMORY_FRAMES.min(total_frames) {
            if !allocator.is_bit_set(frame) {
                allocator.set_bit(frame);
                allocator.used_frames += 1;
            }
        }

        allocator
    }

    fn set_bit(&mut self, frame_index: usize) {
        assert!(frame_index < self.total_frames);
        self.bitmap[frame_index / BITMAP_ENTRY_BITS] |= 1 << (frame_index % BITMAP_ENTRY_BITS);
    }

    fn clear_bit(&mut self, frame_index: usize) {
        assert!(frame_index < self.total_frames);
        self.bitmap[frame_index / BITMAP_ENTRY_BITS] &= !(1 << (frame_index % BITMAP_ENTRY_BITS));
    }

    fn is_bit_set(&self, frame_index: usize) -> bool {
        assert!(frame_index < self.total_frames);
        self.bitmap[frame_index / BITMAP_ENTRY_BITS] & (1 << (frame_index % BITMAP_ENTRY_BITS)) != 0
    }

    /// Hands out the lowest free frame, or None when physical memory is
    /// exhausted.
    pub fn allocate_frame(&mut self) -> Option<PhysAddr> {
        for frame in 0..self.total_frames {
            if !self.is_bit_set(frame) {
                self.set_bit(frame);
                self.used_frames += 1;
                return Some(PhysAddr::from_frame_index(frame));
            }
        }
        None
    }

    /// Returns a frame to the pool. Frames below the first megabyte, frames
    /// past the bitmap and frames already free are ignored, which makes a
    /// double free a no-op.
    pub fn deallocate_frame(&mut self, frame: PhysAddr) {
        let index = frame.frame_index();
        if index >= self.total_frames || index < LOW_MEMORY_FRAMES {
            return;
        }
        if self.is_bit_set(index) {
            self.clear_bit(index);
            self.used_frames = self.used_frames.saturating_sub(1);
        }
    }

    /// Frames outside the bitmap count as allocated.
    pub fn is_allocated(&self, frame: PhysAddr) -> bool {
        let index = frame.frame_index();
        if index >= self.total_frames {
            return true;
        }
        self.is_bit_set(index)
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn used_frames(&self) -> usize {
        self.used_frames
    }

    pub fn free_frames(&self) -> usize {
        self.total_frames - self.used_frames
    }

    pub fn total_memory_kb(&self) -> usize {
        self.total_frames * FRAME_SIZE / 1024
    }
}

/// Seeds the global allocator from the firmware memory map.
pub fn init(memory_map: &MemoryMap) {
    let allocator = FrameAllocator::new(memory_map);
    log::info!(
        "physical memory: {} KiB, {} frames ({} free)",
        allocator.total_memory_kb(),
        allocator.total_frames(),
        allocator.free_frames()
    );
    *FRAME_ALLOCATOR.lock() = Some(allocator);
}

pub fn alloc_frame() -> Option<PhysAddr> {
    FRAME_ALLOCATOR.lock().as_mut()?.allocate_frame()
}

pub fn free_frame(frame: PhysAddr) {
    if let Some(allocator) = FRAME_ALLOCATOR.lock().as_mut() {
        allocator.deallocate_frame(frame);
    }
}

pub fn is_frame_allocated(frame: PhysAddr) -> bool {
    match FRAME_ALLOCATOR.lock().as_ref() {
        Some(allocator) => allocator.is_allocated(frame),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::E820Entry;

    fn eight_mib_above_one() -> [E820Entry; 1] {
        [E820Entry::new(0x100000, 8 * 1024 * 1024, 1)]
    }

    #[test]
    fn first_allocation_is_the_first_frame_above_one_mib() {
        let entries = eight_mib_above_one();
        let mut pmm = FrameAllocator::new(&MemoryMap::new(&entries));

        assert_eq!(pmm.total_frames(), (0x100000 + 8 * 1024 * 1024) / FRAME_SIZE);
        assert!(pmm.free_frames() * FRAME_SIZE >= 2 * 1024 * 1024);

        let frame = pmm.allocate_frame().unwrap();
        assert_eq!(frame.as_u32(), 0x100000);
    }

    #[test]
    fn alloc_free_round_trip() {
        let entries = eight_mib_above_one();
        let mut pmm = FrameAllocator::new(&MemoryMap::new(&entries));

        let frame = pmm.allocate_frame().unwrap();
        assert!(pmm.is_allocated(frame));

        pmm.deallocate_frame(frame);
        assert!(!pmm.is_allocated(frame));

        // The scan restarts from frame 0, so the freed frame comes back.
        assert_eq!(pmm.allocate_frame().unwrap(), frame);
    }

    #[test]
    fn double_free_is_a_no_op() {
        let entries = eight_mib_above_one();
        let mut pmm = FrameAllocator::new(&MemoryMap::new(&entries));

        let frame = pmm.allocate_frame().unwrap();
        pmm.deallocate_frame(frame);
        let free_after_one = pmm.free_frames();
        pmm.deallocate_frame(frame);
        assert_eq!(pmm.free_frames(), free_after_one);
    }

    #[test]
    fn low_memory_is_never_handed_out() {
        // The map claims the whole first megabyte is usable; the allocator
        // must keep it reserved anyway.
        let entries = [
            E820Entry::new(0, 1024 * 1024, 1),
            E820Entry::new(0x100000, 1024 * 1024, 1),
        ];
        let mut pmm = FrameAllocator::new(&MemoryMap::new(&entries));

        for _ in 0..pmm.free_frames() {
            let frame = pmm.allocate_frame().unwrap();
            assert!(frame.as_u32() >= 0x100000);
        }
        assert!(pmm.allocate_frame().is_none());

        // Freeing a low frame changes nothing.
        let low = PhysAddr::new(0x5000);
        assert!(pmm.is_allocated(low));
        pmm.deallocate_frame(low);
        assert!(pmm.is_allocated(low));
    }

    #[test]
    fn exhaustion_returns_none_and_recovers() {
        let entries = [E820Entry::new(0x100000, 4 * FRAME_SIZE as u64, 1)];
        let mut pmm = FrameAllocator::new(&MemoryMap::new(&entries));

        let mut frames = alloc::vec::Vec::new();
        while let Some(frame) = pmm.allocate_frame() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 4);
        assert!(pmm.allocate_frame().is_none());

        pmm.deallocate_frame(frames[2]);
        assert_eq!(pmm.allocate_frame(), Some(frames[2]));
    }

    #[test]
    fn unaligned_region_base_is_rounded_up() {
        // Base 0x100800 rounds to 0x101000; the first 2 KiB hold no frame.
        let entries = [E820Entry::new(0x100800, 3 * FRAME_SIZE as u64, 1)];
        let mut pmm = FrameAllocator::new(&MemoryMap::new(&entries));

        let frame = pmm.allocate_frame().unwrap();
        assert_eq!(frame.as_u32(), 0x101000);
        // length 12 KiB minus the 2 KiB offset leaves two whole frames.
        assert_eq!(pmm.allocate_frame().unwrap().as_u32(), 0x102000);
        assert!(pmm.allocate_frame().is_none());
    }

    #[test]
    fn region_shorter_than_rounding_offset_is_dropped() {
        let entries = [E820Entry::new(0x100FFF, 1, 1)];
        let mut pmm = FrameAllocator::new(&MemoryMap::new(&entries));
        assert!(pmm.allocate_frame().is_none());
    }

    #[test]
    fn map_is_clamped_to_supported_maximum() {
        let entries = [E820Entry::new(0, 1024 * 1024 * 1024, 1)];
        let pmm = FrameAllocator::new(&MemoryMap::new(&entries));
        assert_eq!(pmm.total_frames(), MAX_FRAMES);
        // Addresses past the clamp report as allocated.
        assert!(pmm.is_allocated(PhysAddr::new(0xF000_0000)));
    }

    #[test]
    fn overlapping_usable_regions_saturate_the_counter() {
        let entries = [
            E820Entry::new(0x100000, 1024 * 1024, 1),
            E820Entry::new(0x100000, 1024 * 1024, 1),
        ];
        let pmm = FrameAllocator::new(&MemoryMap::new(&entries));
        assert!(pmm.used_frames() <= pmm.total_frames());
    }
}
